//! Probe module for game server queries.
//!
//! Polls a target through the A2S query protocol, the Steam directory, or
//! the relay query API, and normalizes every outcome into a [`Sample`].

mod a2s;
mod steam;

pub use a2s::*;
pub use steam::*;

use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::archive::{Endpoint, FailureReason, Sample, ServerInfo};
use crate::config::TargetConfig;

/// Probe error types.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("query timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed response: {0}")]
    Protocol(String),
    #[error("no API key configured")]
    NoCredentials,
    #[error("web API error: {0}")]
    Api(String),
}

/// Outcome of resolving an indirect address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Endpoint),
    NotFound,
    NoCredentials,
}

/// Direct game server query.
pub trait ServerQuery: Send + Sync + 'static {
    fn query_info(&self, ip: &str, port: u16) -> impl Future<Output = Result<ServerInfo, QueryError>> + Send;
}

/// Directory lookups and relay queries.
pub trait SteamDirectory: Send + Sync + 'static {
    fn resolve_steam_id(&self, steam_id: &str) -> impl Future<Output = Resolution> + Send;

    fn query_relay(
        &self,
        ip: &str,
        port: u16,
        app_id: u32,
    ) -> impl Future<Output = Result<ServerInfo, QueryError>> + Send;
}

/// Polls targets and turns every outcome into a sample.
pub struct Poller<Q, D> {
    query: Q,
    directory: D,
    jitter: Duration,
}

impl<Q: ServerQuery, D: SteamDirectory> Poller<Q, D> {
    pub fn new(query: Q, directory: D) -> Self {
        Self {
            query,
            directory,
            jitter: Duration::from_millis(100),
        }
    }

    /// Set the upper bound of the random delay before each poll.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Poll one target. Never fails: errors become failure samples.
    pub async fn poll(&self, target: &TargetConfig) -> Sample {
        // Random delay below `jitter`
        let max_jitter = self.jitter.as_millis() as u64;
        if max_jitter > 0 {
            let jitter = rand::random::<u64>() % max_jitter;
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        let endpoint = if target.is_indirect() {
            match self.directory.resolve_steam_id(&target.ip).await {
                Resolution::Resolved(endpoint) => endpoint,
                Resolution::NoCredentials => {
                    return Sample::failure(Utc::now(), FailureReason::NoCredentials, None);
                }
                Resolution::NotFound => {
                    return Sample::failure(Utc::now(), FailureReason::NoAddress, None);
                }
            }
        } else {
            Endpoint::new(target.ip.clone(), target.port)
        };

        if endpoint.is_relay() {
            let result = self
                .directory
                .query_relay(&endpoint.ip, endpoint.port, target.app_id)
                .await;
            return match result {
                Ok(info) => Sample::success(Utc::now(), info, Some(endpoint)),
                Err(QueryError::NoCredentials) => {
                    Sample::failure(Utc::now(), FailureReason::NoCredentials, Some(endpoint))
                }
                Err(e) => {
                    tracing::warn!("Relay query failed for {} ({}): {}", target.url_path, endpoint, e);
                    Sample::failure(Utc::now(), FailureReason::RelayQueryFailed, Some(endpoint))
                }
            };
        }

        match self.query.query_info(&endpoint.ip, endpoint.port).await {
            Ok(info) => Sample::success(Utc::now(), info, Some(endpoint)),
            Err(e) => {
                tracing::debug!("Query failed for {} ({}): {}", target.url_path, endpoint, e);
                Sample::failure(Utc::now(), FailureReason::QueryFailed, Some(endpoint))
            }
        }
    }
}
