//! Chat publishing for status messages and outage alerts.

mod discord;

pub use discord::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// Publish error types.
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("chat API returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// A posted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub channel_id: String,
    pub message_id: String,
    /// Whether this process's account authored the message
    pub own: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl EmbedField {
    pub fn new(name: &str, value: impl Into<String>, inline: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            inline,
        }
    }
}

/// Rich message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embed {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub description: String,
    pub color: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
}

/// Chat platform operations the scheduler needs.
pub trait Publisher: Send + Sync + 'static {
    /// Newest message in a channel.
    fn last_message(&self, channel_id: &str) -> impl Future<Output = Result<Option<MessageRef>, PublishError>> + Send;

    fn send(
        &self,
        channel_id: &str,
        content: Option<&str>,
        embed: &Embed,
    ) -> impl Future<Output = Result<MessageRef, PublishError>> + Send;

    fn edit(&self, message: &MessageRef, embed: &Embed) -> impl Future<Output = Result<(), PublishError>> + Send;

    fn delete(&self, message: &MessageRef) -> impl Future<Output = Result<(), PublishError>> + Send;
}

/// Replace a channel's status message.
///
/// Without mentions the previous message is edited in place. Mentions need a
/// fresh message to notify anyone, so the old one is deleted first.
pub async fn publish_status<P: Publisher>(
    publisher: &P,
    channel_id: &str,
    mentions: &str,
    embed: &Embed,
) -> Result<MessageRef, PublishError> {
    let last = publisher.last_message(channel_id).await?.filter(|m| m.own);

    match last {
        Some(message) if mentions.is_empty() => {
            publisher.edit(&message, embed).await?;
            Ok(message)
        }
        last => {
            if let Some(message) = last {
                publisher.delete(&message).await?;
            }
            let content = Some(mentions).filter(|m| !m.is_empty());
            publisher.send(channel_id, content, embed).await
        }
    }
}
