//! HTTP request handlers.

use super::AppState;
use crate::archive::{Endpoint, SimpleResult};
use crate::config::{ExternalLink, TargetConfig};

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{Html, IntoResponse, Json, Redirect, Response},
};
use chrono::{DateTime, Utc};
use rust_embed::RustEmbed;
use serde::Serialize;
use std::path::{Component, Path as FsPath};
use tower_http::services::ServeFile;

#[derive(RustEmbed)]
#[folder = "static/"]
struct Assets;

// ============================================================================
// API: Results
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResults {
    pub url_path: String,
    pub supports_direct_connect: bool,
    pub results: Vec<SimpleResult>,
    pub mod_name: Option<String>,
    #[serde(rename = "appID")]
    pub app_id: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    pub external_links: Vec<ExternalLink>,
    pub servers: Vec<ServerResults>,
    pub url_base: String,
    #[serde(rename = "redirectIP", skip_serializing_if = "Option::is_none")]
    pub redirect_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,
}

pub async fn handle_api(State(state): State<AppState>) -> Response {
    let snapshot = state.registry.snapshot();
    if snapshot.is_empty() {
        return (StatusCode::NOT_FOUND, "No results available").into_response();
    }

    let servers = state
        .config
        .servers
        .iter()
        .filter_map(|server| {
            let target = snapshot.target(&server.url_path)?;
            Some(ServerResults {
                url_path: server.url_path.clone(),
                supports_direct_connect: server.supports_direct_connect,
                results: target.results.clone(),
                mod_name: server.mod_name.clone(),
                app_id: server.app_id,
            })
        })
        .collect();

    Json(ApiResponse {
        external_links: state.config.external_links.clone(),
        servers,
        url_base: state.config.connect_url_base.clone(),
        redirect_ip: state.links.redirect_host().await,
        last_update: snapshot.last_update,
    })
    .into_response()
}

// ============================================================================
// Connect redirects and fast downloads
// ============================================================================

pub async fn handle_missing_path() -> impl IntoResponse {
    (StatusCode::SERVICE_UNAVAILABLE, "No server selected")
}

pub async fn handle_tf2(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request: Request,
) -> Response {
    let requester = requester(request.headers());

    match state.config.target(&path) {
        Some(target) => redirect_to_target(&state, target, &requester).await,
        None => serve_asset(&state, &path, &requester, request).await,
    }
}

async fn redirect_to_target(state: &AppState, target: &TargetConfig, requester: &str) -> Response {
    let endpoint = state.registry.endpoint(&target.url_path).or_else(|| {
        (!target.is_indirect()).then(|| Endpoint::new(target.ip.clone(), target.port))
    });

    let Some(endpoint) = endpoint else {
        return error_page("Could not resolve server IP address. Wait a few seconds and refresh.");
    };

    if !target.supports_direct_connect {
        tracing::info!("Connect instructions for {} to {}", target.url_path, requester);
        return Html(format!(
            "<p>This server does not support direct connect links.</p>\
             <p>Open the console in game and enter: <code>connect {}</code></p>",
            endpoint
        ))
        .into_response();
    }

    let link = if endpoint.is_relay() {
        match state.links.relay_link(&endpoint).await {
            Some(link) => link,
            None => return error_page("Could not build a relay connect link. Wait a few seconds and refresh."),
        }
    } else {
        format!("steam://connect/{}", endpoint)
    };

    tracing::info!("Redirecting {} to {} ({})", requester, target.url_path, link);
    Redirect::temporary(&link).into_response()
}

async fn serve_asset(state: &AppState, path: &str, requester: &str, request: Request) -> Response {
    let Some(root) = &state.config.fastdl_path else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };

    let relative = FsPath::new(path);
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    }

    let file = root.join(relative);
    match tokio::fs::metadata(&file).await {
        Ok(meta) if meta.is_file() => {}
        _ => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    }

    // Streamed from disk, never buffered whole
    let mut response = match ServeFile::new(&file).try_call(request).await {
        Ok(response) => response.map(Body::new),
        Err(e) => {
            tracing::error!("Failed to serve {}: {}", path, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file").into_response();
        }
    };

    if response.status().is_success() {
        let filename = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename)) {
            response.headers_mut().insert(header::CONTENT_DISPOSITION, value);
        }
        tracing::info!("Serving {} to {}", path, requester);
    }

    response
}

fn error_page(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("<p>{}</p>", message)),
    )
        .into_response()
}

/// Client address, preferring the first `x-forwarded-for` hop.
fn requester(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_static(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };

    match Assets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            ([(header::CONTENT_TYPE, mime.to_string())], content.data.into_owned()).into_response()
        }
        None => (StatusCode::NOT_FOUND, "Not found").into_response(),
    }
}

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <rect x="10" y="10" width="80" height="80" rx="12" fill="#2b2d31"/>
        <circle cx="50" cy="50" r="18" fill="#00ff00"/>
    </svg>"##;

    ([(header::CONTENT_TYPE, "image/svg+xml")], svg)
}
