//! Connect links for the status message and the redirect routes.

use std::time::Duration;
use tokio::sync::RwLock;

use crate::archive::Endpoint;
use crate::config::Config;

/// Builds links that launch the game client at a server.
pub struct ConnectLinks {
    client: reqwest::Client,
    connect_url_base: String,
    relay_connect_base: Option<String>,
    relay_redirect_url: Option<String>,
    redirect_host: RwLock<Option<String>>,
}

impl ConnectLinks {
    pub fn new(cfg: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            connect_url_base: cfg.connect_url_base.trim_end_matches('/').to_string(),
            relay_connect_base: cfg
                .relay_connect_base
                .as_ref()
                .map(|b| b.trim_end_matches('/').to_string()),
            relay_redirect_url: cfg.relay_redirect_url.clone(),
            redirect_host: RwLock::new(None),
        })
    }

    /// Link to this service's redirect route for a target.
    pub fn direct_link(&self, url_path: &str) -> String {
        format!("{}/{}", self.connect_url_base, url_path)
    }

    /// Redirect host currently used for relay links, if known.
    pub async fn redirect_host(&self) -> Option<String> {
        self.redirect_host.read().await.clone()
    }

    /// Link that joins a relay server through the relay connect service.
    ///
    /// Returns `None` when relay links are not configured or the redirect
    /// host cannot be fetched.
    pub async fn relay_link(&self, endpoint: &Endpoint) -> Option<String> {
        let base = self.relay_connect_base.as_ref()?;

        let Some(url) = &self.relay_redirect_url else {
            return Some(format!("{}/dest={}", base, endpoint));
        };

        if let Some(host) = self.redirect_host().await {
            return Some(format!("{}/{}/dest={}", base, host, endpoint));
        }

        let host = match self.fetch_redirect_host(url).await {
            Ok(host) => host,
            Err(e) => {
                tracing::error!("Error fetching relay redirect host: {}", e);
                return None;
            }
        };
        *self.redirect_host.write().await = Some(host.clone());
        Some(format!("{}/{}/dest={}", base, host, endpoint))
    }

    async fn fetch_redirect_host(&self, url: &str) -> Result<String, reqwest::Error> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body.trim().trim_matches('"').to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            connect_url_base: "https://example.com/tf2/".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_direct_link() {
        let links = ConnectLinks::new(&config()).unwrap();
        assert_eq!(links.direct_link("main"), "https://example.com/tf2/main");
    }

    #[tokio::test]
    async fn test_relay_link_unconfigured() {
        let links = ConnectLinks::new(&config()).unwrap();
        assert_eq!(links.relay_link(&Endpoint::new("169.254.1.1", 27015)).await, None);
    }

    #[tokio::test]
    async fn test_relay_link_without_redirect_lookup() {
        let mut cfg = config();
        cfg.relay_connect_base = Some("https://relay.example.com/connect".to_string());
        let links = ConnectLinks::new(&cfg).unwrap();
        assert_eq!(
            links.relay_link(&Endpoint::new("169.254.1.1", 27015)).await.as_deref(),
            Some("https://relay.example.com/connect/dest=169.254.1.1:27015")
        );
    }

    #[tokio::test]
    async fn test_relay_link_uses_cached_host() {
        let mut cfg = config();
        cfg.relay_connect_base = Some("https://relay.example.com/connect".to_string());
        cfg.relay_redirect_url = Some("http://127.0.0.1:9/redirect".to_string());
        let links = ConnectLinks::new(&cfg).unwrap();
        *links.redirect_host.write().await = Some("10.0.0.1".to_string());
        assert_eq!(
            links.relay_link(&Endpoint::new("169.254.1.1", 27015)).await.as_deref(),
            Some("https://relay.example.com/connect/10.0.0.1/dest=169.254.1.1:27015")
        );
    }
}
