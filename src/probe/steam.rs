//! Steam Web API: Steam ID resolution and relay (fake IP) queries.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::time::Duration;

use super::{QueryError, Resolution, SteamDirectory};
use crate::archive::{Endpoint, ServerInfo, Visibility};

const API_BASE: &str = "https://api.steampowered.com/IGameServersService";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Default, Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<ServerAddr>,
}

#[derive(Debug, Deserialize)]
struct ServerAddr {
    addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PingResponse {
    ping_data: Option<PingData>,
}

#[derive(Debug, Default, Deserialize)]
struct PingData {
    server_name: Option<String>,
    map: Option<String>,
    num_players: Option<u32>,
    max_players: Option<u32>,
    num_bots: Option<u32>,
    password: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayersResponse {
    players_data: Option<PlayersData>,
}

#[derive(Debug, Default, Deserialize)]
struct PlayersData {
    #[serde(default)]
    players: Vec<serde_json::Value>,
}

/// Steam Web API client.
#[derive(Debug, Clone)]
pub struct SteamClient {
    client: reqwest::Client,
    api_key: Option<String>,
    timeout: Duration,
}

impl SteamClient {
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self, QueryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QueryError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
        })
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, params: &[(&str, String)]) -> Result<T, QueryError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QueryError::Timeout(self.timeout)
                } else {
                    QueryError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(QueryError::Api(format!("status {}", response.status())));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| QueryError::Protocol(e.to_string()))
    }

    async fn fake_ip_query<T: DeserializeOwned>(
        &self,
        key: &str,
        ip: &str,
        port: u16,
        app_id: u32,
        query_type: u8,
    ) -> Result<T, QueryError> {
        let fake_ip = relay_ip_to_decimal(ip)?;
        let url = format!("{}/QueryByFakeIP/v1", API_BASE);
        let envelope: Envelope<T> = self
            .get(
                &url,
                &[
                    ("key", key.to_string()),
                    ("format", "json".to_string()),
                    ("fake_ip", fake_ip.to_string()),
                    ("fake_port", port.to_string()),
                    ("app_id", app_id.to_string()),
                    ("query_type", query_type.to_string()),
                ],
            )
            .await?;
        Ok(envelope.response)
    }
}

impl SteamDirectory for SteamClient {
    async fn resolve_steam_id(&self, steam_id: &str) -> Resolution {
        let Some(key) = &self.api_key else {
            return Resolution::NoCredentials;
        };

        let url = format!("{}/GetServerIPsBySteamID/v1", API_BASE);
        let params = [
            ("key", key.clone()),
            ("format", "json".to_string()),
            ("input_json", format!("{{\"server_steamids\":[{}]}}", steam_id)),
        ];

        match self.get::<Envelope<ServerList>>(&url, &params).await {
            Ok(envelope) => envelope
                .response
                .servers
                .into_iter()
                .next()
                .and_then(|s| s.addr)
                .and_then(|addr| parse_addr(&addr))
                .map(Resolution::Resolved)
                .unwrap_or(Resolution::NotFound),
            Err(e) => {
                tracing::error!("Error fetching address for Steam ID {}: {}", steam_id, e);
                Resolution::NotFound
            }
        }
    }

    async fn query_relay(&self, ip: &str, port: u16, app_id: u32) -> Result<ServerInfo, QueryError> {
        let Some(key) = &self.api_key else {
            return Err(QueryError::NoCredentials);
        };

        let (server, players) = tokio::try_join!(
            self.fake_ip_query::<PingResponse>(key, ip, port, app_id, 1),
            self.fake_ip_query::<PlayersResponse>(key, ip, port, app_id, 2),
        )?;

        let data = server.ping_data.unwrap_or_default();
        tracing::trace!(
            "Relay {}:{} reports {} player records",
            ip,
            port,
            players.players_data.map(|p| p.players.len()).unwrap_or(0)
        );

        Ok(ServerInfo {
            name: data.server_name.unwrap_or_else(|| "N/A".to_string()),
            map: data.map.unwrap_or_else(|| "N/A".to_string()),
            online_players: data.num_players.unwrap_or(0),
            bots: data.num_bots.unwrap_or(0),
            max_players: data.max_players.unwrap_or(0),
            visibility: if data.password.unwrap_or(false) {
                Visibility::Private
            } else {
                Visibility::Public
            },
            address: format!("{}:{}", ip, port),
        })
    }
}

/// Relay addresses are passed to the API as a 32-bit integer.
pub fn relay_ip_to_decimal(ip: &str) -> Result<u32, QueryError> {
    ip.parse::<Ipv4Addr>()
        .map(u32::from)
        .map_err(|_| QueryError::Protocol(format!("not an IPv4 address: {}", ip)))
}

/// Parse `ip:port` as returned by the directory.
fn parse_addr(addr: &str) -> Option<Endpoint> {
    let (ip, port) = addr.rsplit_once(':')?;
    Some(Endpoint::new(ip, port.parse().ok()?))
}
