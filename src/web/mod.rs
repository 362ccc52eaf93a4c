//! Web server module.

mod handlers;

pub use handlers::*;

use crate::archive::Registry;
use crate::config::Config;
use crate::links::ConnectLinks;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub links: Arc<ConnectLinks>,
}

/// Status page, results API and connect redirects.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: Arc<Config>, registry: Arc<Registry>, links: Arc<ConnectLinks>) -> Self {
        Self {
            state: AppState {
                config,
                registry,
                links,
            },
        }
    }

    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/api", get(handlers::handle_api))
            .route("/tf2", get(handlers::handle_missing_path))
            .route("/tf2/{*path}", get(handlers::handle_tf2))
            .route("/favicon.ico", get(handlers::handle_favicon))
            .fallback(handlers::handle_static)
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.web_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
