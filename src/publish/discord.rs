//! Discord REST publisher.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Embed, MessageRef, PublishError, Publisher};

const API_BASE: &str = "https://discord.com/api/v10";

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct Message {
    id: String,
    channel_id: String,
    author: User,
}

#[derive(Debug, Serialize)]
struct CreateMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    embeds: [&'a Embed; 1],
}

#[derive(Debug, Serialize)]
struct EditMessage<'a> {
    embeds: [&'a Embed; 1],
}

/// Publishes through the Discord HTTP API with a bot token.
pub struct DiscordPublisher {
    client: reqwest::Client,
    token: String,
    user_id: String,
}

impl DiscordPublisher {
    /// Build a client and look up the bot's own user id.
    pub async fn connect(token: &str) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let response = client
            .get(format!("{}/users/@me", API_BASE))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", token))
            .send()
            .await?;
        let me: User = check(response).await?.json().await?;

        tracing::info!("Logged in as {} ({})", me.username, me.id);

        Ok(Self {
            client,
            token: token.to_string(),
            user_id: me.id,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", API_BASE, path))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {}", self.token))
    }

    fn to_ref(&self, message: Message) -> MessageRef {
        MessageRef {
            own: message.author.id == self.user_id,
            channel_id: message.channel_id,
            message_id: message.id,
        }
    }
}

/// Turn non-success statuses into API errors.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(PublishError::Api {
        status: status.as_u16(),
        body,
    })
}

impl Publisher for DiscordPublisher {
    async fn last_message(&self, channel_id: &str) -> Result<Option<MessageRef>, PublishError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/channels/{}/messages", channel_id))
            .query(&[("limit", "1")])
            .send()
            .await?;
        let messages: Vec<Message> = check(response).await?.json().await?;
        Ok(messages.into_iter().next().map(|m| self.to_ref(m)))
    }

    async fn send(&self, channel_id: &str, content: Option<&str>, embed: &Embed) -> Result<MessageRef, PublishError> {
        let body = CreateMessage {
            content,
            embeds: [embed],
        };
        let response = self
            .request(reqwest::Method::POST, &format!("/channels/{}/messages", channel_id))
            .json(&body)
            .send()
            .await?;
        let message: Message = check(response).await?.json().await?;
        Ok(self.to_ref(message))
    }

    async fn edit(&self, message: &MessageRef, embed: &Embed) -> Result<(), PublishError> {
        let response = self
            .request(
                reqwest::Method::PATCH,
                &format!("/channels/{}/messages/{}", message.channel_id, message.message_id),
            )
            .json(&EditMessage { embeds: [embed] })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> Result<(), PublishError> {
        let response = self
            .request(
                reqwest::Method::DELETE,
                &format!("/channels/{}/messages/{}", message.channel_id, message.message_id),
            )
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}
