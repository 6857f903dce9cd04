//! One WebSocket session: a reader that dispatches requests, a writer that
//! drains the outbound queue, and a close signal that tears both down. Server
//! push (notifications) goes through the same queue via [`Peer`].

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use pythian_telemetry::PublishMetrics;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::mux::{handle_requests, Mux};
use crate::types::{parse_error, parse_requests, VERSION};

const OUTBOUND_QUEUE_DEPTH: usize = 32;

/// Handle for pushing server-initiated notifications into a connection's
/// outbound queue. Cloneable; owned by subscription workers.
#[derive(Clone)]
pub struct Peer {
    out: mpsc::Sender<Message>,
    conn_closed: CancellationToken,
    cancel: CancellationToken,
}

/// Why a notification could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyError {
    /// The connection's outbound queue is gone; the subscription should end.
    Closed,
    /// The server is shutting down.
    Cancelled,
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("connection closed"),
            Self::Cancelled => f.write_str("server shutting down"),
        }
    }
}

impl std::error::Error for NotifyError {}

impl Peer {
    pub(crate) fn new(
        out: mpsc::Sender<Message>,
        conn_closed: CancellationToken,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            out,
            conn_closed,
            cancel,
        }
    }

    /// Peer backed by a bare channel instead of a socket; the receiver sees
    /// the prepared frames. Lets subscription flows run against an in-process
    /// queue.
    pub fn standalone(depth: usize) -> (Self, mpsc::Receiver<Message>, CancellationToken) {
        let (out, rx) = mpsc::channel(depth);
        let conn_closed = CancellationToken::new();
        let peer = Self::new(out, conn_closed.clone(), CancellationToken::new());
        (peer, rx, conn_closed)
    }

    /// Sends a JSON-RPC notification (`id: null`) to the client. Blocks while
    /// the queue is full; fails fast once the connection or server is gone.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), NotifyError> {
        let frame = json!({
            "jsonrpc": VERSION,
            "id": Value::Null,
            "method": method,
            "params": params,
        });
        let message = Message::Text(frame.to_string().into());
        tokio::select! {
            biased;
            _ = self.conn_closed.cancelled() => Err(NotifyError::Closed),
            _ = self.cancel.cancelled() => Err(NotifyError::Cancelled),
            sent = self.out.send(message) => sent.map_err(|_| NotifyError::Closed),
        }
    }
}

pub(crate) async fn run_connection(
    socket: WebSocket,
    mux: Arc<Mux>,
    cancel: CancellationToken,
    metrics: Arc<PublishMetrics>,
) {
    metrics.websocket_opened();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_DEPTH);
    let conn_closed = CancellationToken::new();

    let writer_closed = conn_closed.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_closed.cancelled() => break,
                maybe = out_rx.recv() => match maybe {
                    Some(message) => {
                        if sink.send(message).await.is_err() {
                            writer_closed.cancel();
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let peer = Peer::new(out_tx.clone(), conn_closed.clone(), cancel.clone());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = conn_closed.cancelled() => break,
            maybe = stream.next() => match maybe {
                Some(Ok(Message::Text(text))) => {
                    if !serve_payload(text.as_bytes(), &mux, &peer, &out_tx, &metrics).await {
                        break;
                    }
                }
                Some(Ok(Message::Binary(payload))) => {
                    if !serve_payload(&payload, &mux, &peer, &out_tx, &metrics).await {
                        break;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if out_tx.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "websocket closed by client");
                    break;
                }
                Some(Err(read_error)) => {
                    debug!(error = %read_error, "websocket read failed");
                    break;
                }
                None => break,
            },
        }
    }

    conn_closed.cancel();
    drop(out_tx);
    drop(peer);
    if let Err(join_error) = writer.await {
        warn!(error = %join_error, "websocket writer task failed");
    }
    metrics.websocket_closed();
}

/// Parses and dispatches one inbound frame. Returns `false` when the
/// connection should close.
async fn serve_payload(
    payload: &[u8],
    mux: &Mux,
    peer: &Peer,
    out_tx: &mpsc::Sender<Message>,
    metrics: &PublishMetrics,
) -> bool {
    let (requests, batch) = match parse_requests(payload) {
        Ok(parsed) => parsed,
        Err(parse_failure) => {
            let response = parse_error(parse_failure.to_string());
            let body = match serde_json::to_string(&response) {
                Ok(body) => body,
                Err(marshal_error) => {
                    error!(error = %marshal_error, "failed to marshal parse error");
                    return false;
                }
            };
            return out_tx.send(Message::Text(body.into())).await.is_ok();
        }
    };

    for _ in &requests {
        metrics.record_rpc_request();
    }
    match handle_requests(mux, Some(peer), requests, batch).await {
        Ok(Some(body)) => out_tx.send(Message::Text(body.into())).await.is_ok(),
        Ok(None) => true,
        Err(marshal_error) => {
            error!(error = %marshal_error, "failed to marshal results");
            false
        }
    }
}
