//! Statusboard - Game Server Status Monitor
//!
//! Polls game servers on a fixed cadence, keeps a rolling archive of results,
//! and publishes live status messages, player-count pings and outage alerts
//! to a chat channel alongside a small web status page.

mod archive;
mod config;
mod links;
mod probe;
mod publish;
mod scheduler;
mod status;
mod web;

use archive::Registry;
use config::Config;
use links::ConnectLinks;
use probe::{A2sClient, Poller, SteamClient};
use publish::DiscordPublisher;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("statusboard=info".parse()?))
        .init();

    // Load configuration
    let cfg = Arc::new(Config::load()?);
    tracing::info!(
        "Starting Statusboard on port {} with {} servers...",
        cfg.web_port,
        cfg.servers.len()
    );
    if cfg.steam_api_key.is_none() {
        tracing::warn!("No Steam API key configured; Steam ID and relay servers cannot be queried");
    }

    let registry = Arc::new(Registry::from_config(&cfg));
    let links = Arc::new(ConnectLinks::new(&cfg)?);

    let steam = SteamClient::new(cfg.steam_api_key.clone(), cfg.query_timeout())?;
    let poller = Poller::new(A2sClient::new(cfg.query_timeout(), cfg.query_retries), steam);
    let publisher = DiscordPublisher::connect(&cfg.discord_token).await?;

    let scheduler = Scheduler::new(cfg.clone(), registry.clone(), poller, publisher, links.clone());
    let ticker = scheduler.clone();
    let ticks = tokio::spawn(async move { ticker.run().await });

    let server = Server::new(cfg, registry, links);
    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down...");
            ticks.abort();
            let _ = ticks.await;
            scheduler.shutdown().await;
        }
    }

    Ok(())
}
