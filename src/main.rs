//! dbx-gateway server binary.
//!
//! A small demo gateway whose HTTP routes translate 1:1 into Dropbox API
//! calls. Each authenticated route resolves an OAuth token (session value
//! first, static fallback second), redirects the browser to the Dropbox
//! authorization URL when none exists, and otherwise forwards exactly one
//! remote call, returning the remote response body unmodified.

mod account;
mod auth;
mod background;
mod config;
mod dropbox;
mod error;
mod files;
mod folders;
mod http;
mod links;
mod logging;
mod session;
mod version;

use axum::extract::{Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::get;
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::{Args, GatewayConfig};
use crate::session::SessionStore;

shadow!(build);

/// Builds the route table shared by the server and the tests.
pub(crate) fn app_router(config: Arc<GatewayConfig>, sessions: Arc<SessionStore>) -> Router {
    Router::new()
        .route("/", get(account::me))
        .route("/me", get(account::me))
        .route("/files", get(files::files_list))
        .route("/files/{id}", get(files::file_get))
        .route("/files/insert/{message}", get(files::file_insert))
        .route("/files/session/{message}", get(files::file_session_insert))
        .route("/files/large/{message}", get(files::file_large))
        .route("/files/upload", get(files::file_upload))
        .route("/files/download", get(files::file_download))
        .route("/children", get(files::children))
        .route("/folders/list", get(folders::folders_list))
        .route("/folders/insert/{title}", get(folders::folder_insert))
        .route("/links/share", get(links::link_share))
        .route("/oauth", get(auth::oauth_callback))
        .route("/logout", get(auth::logout))
        .route("/version", get(version::get_version_info))
        .layer(middleware::from_fn(auth::recover_rejected_token))
        .layer(Extension(config))
        .layer(Extension(sessions))
}

/// Starts the gateway and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let config = Arc::new(GatewayConfig::from_args(&args));
    let sessions = Arc::new(SessionStore::new(config.session_ttl));

    let mut app = app_router(config, sessions.clone()).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let forwarded_ip = request
                    .headers()
                    .get("x-forwarded-for")
                    .and_then(|v| v.to_str().ok())
                    .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                let connect_ip = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.to_string());
                let client_ip = forwarded_ip
                    .or(connect_ip)
                    .unwrap_or_else(|| "unknown".to_string());

                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip,
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    if let Some(cors_layer) = http::build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("starting http server at {}", addr);

    background::spawn_session_prune(sessions);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
