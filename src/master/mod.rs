//! Master listeners: the watcher WebSocket endpoint and the public query API

use std::io;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::Level;

use crate::protocol::FilesResponse;
use crate::registry::SessionRegistry;

/// Path watchers connect to
pub const WATCHER_PATH: &str = "/watchers/notifications";

/// Upgrade a single watcher connection and run its session to completion
pub async fn handle_connection(stream: TcpStream, registry: Arc<SessionRegistry>) {
    let peer = stream.peer_addr().ok();

    let check_path = |request: &Request, response: Response| {
        if request.uri().path() == WATCHER_PATH {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws_stream = match accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!("WebSocket handshake failed for {:?}: {}", peer, e);
            return;
        }
    };

    registry.accept_session(ws_stream, peer).await;
}

/// Accept watcher connections until the listener fails fatally.
///
/// Each connection runs on its own task; accept errors are logged and skipped.
pub async fn serve_watchers(listener: TcpListener, registry: Arc<SessionRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!("Accepted connection from {}", addr);
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    handle_connection(stream, registry).await;
                });
            }
            Err(e) => {
                tracing::error!("Failed to accept connection: {}", e);
            }
        }
    }
}

/// Router for the public query API
pub fn query_router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/files", get(files_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(registry)
}

/// Serve the query API until the server fails
pub async fn serve_queries(listener: TcpListener, registry: Arc<SessionRegistry>) -> io::Result<()> {
    axum::serve(listener, query_router(registry)).await
}

async fn files_handler(State(registry): State<Arc<SessionRegistry>>) -> Json<FilesResponse> {
    Json(FilesResponse::from_names(registry.current_files()))
}
