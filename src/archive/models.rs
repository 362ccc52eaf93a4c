//! Archive model types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Address prefix of servers reached through the Steam Datagram Relay.
pub const RELAY_PREFIX: &str = "169.254.";

/// Whether an address lies in the relay address space.
pub fn is_relay_address(address: &str) -> bool {
    address.starts_with(RELAY_PREFIX)
}

/// A concrete network endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self { ip: ip.into(), port }
    }

    pub fn is_relay(&self) -> bool {
        is_relay_address(&self.ip)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Private,
}

/// Server state reported by a successful query.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub name: String,
    pub map: String,
    pub online_players: u32,
    pub bots: u32,
    pub max_players: u32,
    pub visibility: Visibility,
    pub address: String,
}

impl ServerInfo {
    /// Human players, excluding bots.
    pub fn active_players(&self) -> u32 {
        self.online_players.saturating_sub(self.bots)
    }

    pub fn is_private(&self) -> bool {
        self.visibility == Visibility::Private
    }
}

/// Why a poll produced no server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No API key to resolve an indirect address or query the relay
    NoCredentials,
    /// The directory had no address for the identifier
    NoAddress,
    /// Transport, timeout or protocol failure
    QueryFailed,
    /// Either relay sub-query failed
    RelayQueryFailed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::NoCredentials => "NO API KEY",
            FailureReason::NoAddress => "NO IP FROM STEAM ID",
            FailureReason::QueryFailed => "QUERY FAILED",
            FailureReason::RelayQueryFailed => "SDR QUERY FAILED",
        };
        f.write_str(text)
    }
}

/// Outcome of one poll of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub time: DateTime<Utc>,
    pub outcome: Result<ServerInfo, FailureReason>,
    /// Where the poll was directed, when an address was known
    pub endpoint: Option<Endpoint>,
}

impl Sample {
    pub fn success(time: DateTime<Utc>, info: ServerInfo, endpoint: Option<Endpoint>) -> Self {
        Self {
            time,
            outcome: Ok(info),
            endpoint,
        }
    }

    pub fn failure(time: DateTime<Utc>, reason: FailureReason, endpoint: Option<Endpoint>) -> Self {
        Self {
            time,
            outcome: Err(reason),
            endpoint,
        }
    }

    pub fn info(&self) -> Option<&ServerInfo> {
        self.outcome.as_ref().ok()
    }

    pub fn is_failure(&self) -> bool {
        self.outcome.is_err()
    }

    /// Active players, or 0 for failures.
    pub fn active_players(&self) -> u32 {
        self.info().map(ServerInfo::active_players).unwrap_or(0)
    }
}

/// A sample flattened for the JSON API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimpleResult {
    pub server_name: String,
    pub server_address: String,
    pub online_players: u32,
    pub bot_count: u32,
    pub max_players: u32,
    pub map: String,
    pub password: bool,
    pub sdr: bool,
}

impl From<&Sample> for SimpleResult {
    fn from(sample: &Sample) -> Self {
        match sample.info() {
            Some(info) => Self {
                server_name: info.name.clone(),
                server_address: info.address.clone(),
                online_players: info.active_players(),
                bot_count: info.bots,
                max_players: info.max_players,
                map: info.map.clone(),
                password: info.is_private(),
                sdr: is_relay_address(&info.address),
            },
            None => Self {
                server_name: String::new(),
                server_address: String::new(),
                online_players: 0,
                bot_count: 0,
                max_players: 0,
                map: "N/A".to_string(),
                password: false,
                sdr: false,
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn info(online: u32, bots: u32, max: u32) -> ServerInfo {
        ServerInfo {
            name: "Test Server".to_string(),
            map: "pl_upward".to_string(),
            online_players: online,
            bots,
            max_players: max,
            visibility: Visibility::Public,
            address: "203.0.113.7:27015".to_string(),
        }
    }

    pub fn ok(time: DateTime<Utc>, online: u32, max: u32) -> Sample {
        Sample::success(time, info(online, 0, max), None)
    }

    pub fn ok_on_map(time: DateTime<Utc>, online: u32, map: &str) -> Sample {
        let mut info = info(online, 0, 24);
        info.map = map.to_string();
        Sample::success(time, info, None)
    }

    pub fn fail(time: DateTime<Utc>) -> Sample {
        Sample::failure(time, FailureReason::QueryFailed, None)
    }
}
