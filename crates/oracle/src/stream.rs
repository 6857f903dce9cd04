//! Streaming view of price accounts: a program subscription over the chain
//! WebSocket endpoint, or a timer-driven synthetic feed for the mock source.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use pythian_chain::Pubkey;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::layout::{self, ACCOUNT_TYPE_PRICE};
use crate::types::PriceAccountEntry;

const STREAM_QUEUE_DEPTH: usize = 64;
const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Sequence of decoded price-account writes. Dropping the stream tears down
/// the producer task.
pub struct PriceStream {
    rx: mpsc::Receiver<PriceAccountEntry>,
    cancel: CancellationToken,
}

impl PriceStream {
    pub async fn recv(&mut self) -> Option<PriceAccountEntry> {
        self.rx.recv().await
    }
}

impl Drop for PriceStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) fn spawn_program_stream(ws_url: String, program: Pubkey) -> PriceStream {
    let (tx, rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                result = stream_once(&ws_url, program, &tx) => {
                    match result {
                        Ok(()) => return,
                        Err(error) => {
                            warn!(error = %error, "price stream failed, reconnecting");
                        }
                    }
                }
            }
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                _ = time::sleep(RECONNECT_DELAY) => {}
            }
        }
    });
    PriceStream { rx, cancel }
}

/// Runs one WebSocket session. Returns `Ok` when the consumer went away and
/// `Err` on any transport failure, which the outer loop retries.
async fn stream_once(
    ws_url: &str,
    program: Pubkey,
    tx: &mpsc::Sender<PriceAccountEntry>,
) -> Result<()> {
    let (mut ws, _) = connect_async(ws_url)
        .await
        .context("price stream connect failed")?;
    let subscribe = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "programSubscribe",
        "params": [
            program.to_string(),
            { "encoding": "base64", "commitment": "confirmed" }
        ],
    });
    ws.send(Message::Text(subscribe.to_string().into()))
        .await
        .context("price stream subscribe failed")?;

    loop {
        let message = ws
            .next()
            .await
            .ok_or_else(|| anyhow!("price stream ended"))?
            .context("price stream read failed")?;
        match message {
            Message::Text(text) => {
                if let Some(entry) = parse_program_notification(&text) {
                    if tx.send(entry).await.is_err() {
                        return Ok(());
                    }
                }
            }
            Message::Ping(payload) => {
                ws.send(Message::Pong(payload))
                    .await
                    .context("price stream pong failed")?;
            }
            Message::Close(frame) => {
                return Err(anyhow!("price stream closed: {frame:?}"));
            }
            _ => {}
        }
    }
}

fn parse_program_notification(text: &str) -> Option<PriceAccountEntry> {
    let value: Value = serde_json::from_str(text).ok()?;
    if value.get("method").and_then(Value::as_str) != Some("programNotification") {
        return None;
    }
    let keyed = value.get("params")?.get("result")?.get("value")?;
    let pubkey: Pubkey = keyed.get("pubkey")?.as_str()?.parse().ok()?;
    let encoded = keyed.get("account")?.get("data")?.get(0)?.as_str()?;
    let data = BASE64_STANDARD.decode(encoded).ok()?;
    if layout::account_type(&data) != Some(ACCOUNT_TYPE_PRICE) {
        return None;
    }
    match layout::decode_price(pubkey, &data) {
        Ok(entry) => Some(entry),
        Err(error) => {
            debug!(account = %pubkey, error = %error, "skipping undecodable price update");
            None
        }
    }
}

/// Synthetic feed for the mock source: replays the given price accounts on an
/// interval, advancing `pub_slot` and nudging the aggregate price each round.
pub(crate) fn spawn_mock_stream(
    mut entries: Vec<PriceAccountEntry>,
    interval: Duration,
) -> PriceStream {
    let (tx, rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        let mut round: u64 = 0;
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            round = round.wrapping_add(1);
            for entry in &mut entries {
                entry.agg.pub_slot += 1;
                entry.valid_slot = entry.agg.pub_slot;
                entry.agg.price += if round % 2 == 0 { 1 } else { -1 };
                if tx.send(entry.clone()).await.is_err() {
                    return;
                }
            }
        }
    });
    PriceStream { rx, cancel }
}
