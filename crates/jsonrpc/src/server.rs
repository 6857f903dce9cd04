use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use pythian_telemetry::PublishMetrics;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::connection::run_connection;
use crate::mux::{handle_requests, Mux};
use crate::types::parse_requests;

const MAX_REQUEST_SIZE: usize = 128_000;

/// JSON-RPC transport: HTTP POST for one-shot requests and batches, GET for
/// WebSocket upgrade, OPTIONS for method advertisement. Everything else is
/// rejected.
pub struct RpcServer {
    mux: Arc<Mux>,
    cancel: CancellationToken,
    metrics: Arc<PublishMetrics>,
    max_request_size: usize,
}

impl RpcServer {
    pub fn new(mux: Mux, cancel: CancellationToken, metrics: Arc<PublishMetrics>) -> Arc<Self> {
        Arc::new(Self {
            mux: Arc::new(mux),
            cancel,
            metrics,
            max_request_size: MAX_REQUEST_SIZE,
        })
    }

    pub fn router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(
                "/",
                get(serve_websocket)
                    .post(serve_post)
                    .options(serve_options)
                    .fallback(method_not_allowed),
            )
            .layer(DefaultBodyLimit::max(self.max_request_size))
            .with_state(self.clone())
    }

    pub async fn serve(self: Arc<Self>, listen_address: &str) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(listen_address)
            .await
            .with_context(|| format!("failed to bind rpc server on {listen_address}"))?;
        info!(listen = %listen_address, "rpc server started");
        let cancel = self.cancel.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("rpc server failed")?;
        info!("rpc server stopped");
        Ok(())
    }
}

async fn serve_post(State(server): State<Arc<RpcServer>>, body: Bytes) -> Response {
    let (requests, batch) = match parse_requests(&body) {
        Ok(parsed) => parsed,
        Err(_) => return (StatusCode::BAD_REQUEST, "Bad request").into_response(),
    };
    for _ in &requests {
        server.metrics.record_rpc_request();
    }
    match handle_requests(&server.mux, None, requests, batch).await {
        Ok(Some(response_body)) => (
            StatusCode::OK,
            [("content-type", "application/json; charset=utf-8")],
            response_body,
        )
            .into_response(),
        Ok(None) => StatusCode::OK.into_response(),
        Err(marshal_error) => {
            error!(error = %marshal_error, "failed to marshal results");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
        }
    }
}

async fn serve_websocket(State(server): State<Arc<RpcServer>>, ws: WebSocketUpgrade) -> Response {
    let mux = server.mux.clone();
    let cancel = server.cancel.clone();
    let metrics = server.metrics.clone();
    ws.max_message_size(server.max_request_size)
        .on_upgrade(move |socket| run_connection(socket, mux, cancel, metrics))
}

async fn serve_options() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            ("allow", "OPTIONS, GET, POST"),
            ("access-control-request-method", "OPTIONS, GET, POST"),
            ("access-control-request-headers", "content-type"),
        ],
    )
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        "Only JSON-RPC 2.0 over HTTP and WebSocket supported",
    )
}
