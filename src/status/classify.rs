//! Server status classification from an archive tail.

use crate::archive::{is_relay_address, Sample, ServerInfo};

pub const COLOR_ACTIVE: u32 = 0x00ff00;
pub const COLOR_EMPTY: u32 = 0x008800;
pub const COLOR_DISRUPTED: u32 = 0xffff00;
pub const COLOR_OFFLINE: u32 = 0xff0000;
pub const COLOR_FULL: u32 = 0x00ffaa;

/// Discrete server status shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    PasswordProtected,
    Full,
    Active,
    Empty,
    Disrupted,
    Offline,
}

impl Status {
    pub fn color(&self) -> u32 {
        match self {
            Status::Active => COLOR_ACTIVE,
            Status::Empty => COLOR_EMPTY,
            Status::PasswordProtected | Status::Disrupted => COLOR_DISRUPTED,
            Status::Full => COLOR_FULL,
            Status::Offline => COLOR_OFFLINE,
        }
    }
}

/// Status plus the display data derived alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub status: Status,
    pub title: String,
    pub notice: String,
    pub color: u32,
    pub allow_connections: bool,
    pub is_relay: bool,
    pub consecutive_failures: usize,
}

/// Count trailing failures and find the newest successful result.
pub fn consecutive_failures(archive: &[Sample]) -> (usize, Option<&ServerInfo>) {
    let mut count = 0;
    for sample in archive.iter().rev() {
        match sample.info() {
            Some(info) => return (count, Some(info)),
            None => count += 1,
        }
    }
    (count, None)
}

/// Classify a target from its archive.
///
/// The failure streak is the primary discriminator. Password and full
/// checks only apply while the streak is shorter than two, so one dropped
/// poll cannot hide them but a real outage always reads as offline.
pub fn classify(archive: &[Sample], supports_direct_connect: bool, retention_limit: usize) -> Classification {
    let (failures, most_recent) = consecutive_failures(archive);
    let is_relay = most_recent.map(|i| is_relay_address(&i.address)).unwrap_or(false);

    let build = |status: Status, title: String, notice: String, allow_connections: bool| Classification {
        status,
        title,
        notice,
        color: status.color(),
        allow_connections,
        is_relay,
        consecutive_failures: failures,
    };

    if failures < 2 {
        if let Some(info) = most_recent {
            if info.is_private() {
                return build(
                    Status::PasswordProtected,
                    "Server is password-protected".to_string(),
                    "[PASSWORD]: The server is password-protected for now.".to_string(),
                    false,
                );
            }
            if info.max_players > 0 && info.active_players() >= info.max_players {
                return build(
                    Status::Full,
                    info.name.clone(),
                    "[FULL]: The server has no room for you!".to_string(),
                    false,
                );
            }
        }
    }

    match failures {
        0 => {
            let active = most_recent.map(ServerInfo::active_players).unwrap_or(0);
            build(
                if active > 0 { Status::Active } else { Status::Empty },
                most_recent
                    .map(|i| i.name.clone())
                    .unwrap_or_else(|| "Awaiting initial server query...".to_string()),
                "[ONLINE] Click the server name to instantly connect.".to_string(),
                most_recent.is_some() && supports_direct_connect,
            )
        }
        1 => build(
            Status::Disrupted,
            most_recent
                .map(|i| i.name.clone())
                .unwrap_or_else(|| "Awaiting initial server query...".to_string()),
            "[DISRUPTED]: The server may be changing maps.".to_string(),
            false,
        ),
        n => {
            let shown = if n > retention_limit {
                format!("{}+", retention_limit)
            } else {
                n.to_string()
            };
            build(
                Status::Offline,
                most_recent
                    .map(|i| i.name.clone())
                    .unwrap_or_else(|| "Unavailable".to_string()),
                format!("[OFFLINE] Server failed {} consecutive queries.", shown),
                false,
            )
        }
    }
}
