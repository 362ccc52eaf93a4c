//! Chat embeds for status messages and outage alerts.

use chrono::{DateTime, Utc};

use super::classify::{Classification, COLOR_ACTIVE, COLOR_OFFLINE};
use crate::archive::Sample;
use crate::config::TargetConfig;
use crate::publish::{Embed, EmbedField};

/// Console command players can paste to join.
pub fn connect_string(target: &TargetConfig, classification: &Classification, latest: Option<&Sample>) -> String {
    let address = latest.and_then(|s| s.info()).map(|i| i.address.as_str());

    if classification.is_relay {
        return address
            .map(|a| format!("connect {}", a))
            .unwrap_or_else(|| "SDR IP NOT AVAILABLE".to_string());
    }
    if let Some(connect) = &target.connect_string {
        return format!("connect {}", connect);
    }
    if target.is_indirect() {
        return address
            .map(|a| format!("connect {}", a))
            .unwrap_or_else(|| "IP NOT AVAILABLE".to_string());
    }
    format!("connect {}:{}", target.ip, target.port)
}

fn players_field(latest: Option<&Sample>) -> String {
    let Some(info) = latest.and_then(|s| s.info()) else {
        return "N/A".to_string();
    };
    let mut value = format!("{}/{}", info.active_players(), info.max_players);
    if info.bots > 0 {
        value.push_str(&format!(" ({} bots)", info.bots));
    }
    value
}

fn description(target: &TargetConfig, notice: &str) -> String {
    if notice.is_empty() {
        format!("```{}```", target.description)
    } else {
        format!("```{}\n\n{}```", target.description, notice)
    }
}

/// Status message for one target.
pub fn status_embed(
    target: &TargetConfig,
    classification: &Classification,
    latest: Option<&Sample>,
    ping_activity: Option<String>,
    history: String,
    url: Option<String>,
    now: DateTime<Utc>,
) -> Embed {
    let mut fields = vec![
        EmbedField::new(
            "Connect via console:",
            format!("`{}`", connect_string(target, classification, latest)),
            true,
        ),
        EmbedField::new(
            "Map:",
            latest
                .and_then(|s| s.info())
                .map(|i| i.map.clone())
                .unwrap_or_else(|| "N/A".to_string()),
            true,
        ),
        EmbedField::new("Players:", players_field(latest), true),
    ];

    if let Some(pings) = ping_activity {
        fields.push(EmbedField::new("Activity Pings:", pings, false));
    }
    fields.push(EmbedField::new("Recent History:", history, false));

    Embed {
        title: classification.title.clone(),
        url,
        description: description(target, &classification.notice),
        color: classification.color,
        timestamp: now,
        fields,
    }
}

/// Final status posted when the service stops.
pub fn unavailable_embed(target: &TargetConfig, now: DateTime<Utc>) -> Embed {
    Embed {
        title: "Server status unavailable".to_string(),
        url: None,
        description: description(target, "[UNKNOWN]: The status bot is offline. Status updates will resume shortly."),
        color: COLOR_OFFLINE,
        timestamp: now,
        fields: Vec::new(),
    }
}

/// Outage alert for the alert channel.
pub fn alert_embed(target: &TargetConfig, last_name: Option<&str>, failures: usize, now: DateTime<Utc>) -> Embed {
    let name = last_name.unwrap_or(&target.url_path);
    Embed {
        title: format!("Outage: {}", name),
        url: None,
        description: format!(
            "```{} has been failing queries ({} in a row).```",
            target.url_path, failures
        ),
        color: COLOR_OFFLINE,
        timestamp: now,
        fields: Vec::new(),
    }
}

/// Alert message once the target has recovered.
pub fn resolved_embed(target: &TargetConfig, last_name: Option<&str>, now: DateTime<Utc>) -> Embed {
    let name = last_name.unwrap_or(&target.url_path);
    Embed {
        title: format!("Resolved: {}", name),
        url: None,
        description: format!("```{} is answering queries again.```", target.url_path),
        color: COLOR_ACTIVE,
        timestamp: now,
        fields: Vec::new(),
    }
}
