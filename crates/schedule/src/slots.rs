use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use pythian_telemetry::PublishMetrics;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::SlotTick;

/// Paces the publish pipeline off the chain's slot clock.
///
/// Holds one live slot-updates subscription, keeps the current slot readable
/// without locking, and forwards `first-shred-received` events as ticks on a
/// depth-1 channel: when the consumer has not drained the previous tick, the
/// new one is dropped, so a slow scheduler coalesces ticks instead of
/// queueing them.
pub struct SlotMonitor {
    ws_url: String,
    read_timeout: Duration,
    reconnect_delay: Duration,
    metrics: Arc<PublishMetrics>,
    current_slot: AtomicU64,
    tick_tx: Mutex<Option<mpsc::Sender<SlotTick>>>,
}

impl SlotMonitor {
    pub fn new(
        ws_url: String,
        read_timeout: Duration,
        reconnect_delay: Duration,
        metrics: Arc<PublishMetrics>,
    ) -> (Self, mpsc::Receiver<SlotTick>) {
        let (tick_tx, tick_rx) = mpsc::channel(1);
        (
            Self {
                ws_url,
                read_timeout,
                reconnect_delay,
                metrics,
                current_slot: AtomicU64::new(0),
                tick_tx: Mutex::new(Some(tick_tx)),
            },
            tick_rx,
        )
    }

    /// Slot the cluster is currently processing; 0 until the first update
    /// arrives.
    pub fn current_slot(&self) -> u64 {
        self.current_slot.load(Ordering::Relaxed)
    }

    /// Streams slot updates until cancellation, reconnecting on any transport
    /// failure after a constant delay. On return the tick channel is closed,
    /// which lets the scheduler drain and exit.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.run_conn(&cancel).await {
                Ok(()) => break,
                Err(error) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    warn!(error = %error, "slot stream failed, restarting");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }
        if let Ok(mut tick_tx) = self.tick_tx.lock() {
            *tick_tx = None;
        }
    }

    /// One WebSocket session. `Ok` means cancellation; any `Err` is handed to
    /// the reconnect loop.
    async fn run_conn(&self, cancel: &CancellationToken) -> Result<()> {
        let (mut ws, _) = tokio_tungstenite::connect_async(self.ws_url.as_str())
            .await
            .context("slot stream connect failed")?;
        let subscribe = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "slotsUpdatesSubscribe",
        });
        ws.send(Message::Text(subscribe.to_string().into()))
            .await
            .context("slot stream subscribe failed")?;

        let mut subscription_id: Option<u64> = None;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = time::timeout(self.read_timeout, ws.next()) => next,
            };
            match next {
                Err(_elapsed) => {
                    warn!(
                        timeout_secs = self.read_timeout.as_secs(),
                        "read deadline exceeded, terminating slot stream"
                    );
                    if let Some(id) = subscription_id {
                        let unsubscribe = json!({
                            "jsonrpc": "2.0",
                            "id": 2,
                            "method": "slotsUpdatesUnsubscribe",
                            "params": [id],
                        });
                        let _ = ws.send(Message::Text(unsubscribe.to_string().into())).await;
                    }
                    let _ = ws.close(None).await;
                    return Err(anyhow!(
                        "no slot update within {}s",
                        self.read_timeout.as_secs()
                    ));
                }
                Ok(None) => return Err(anyhow!("slot stream ended")),
                Ok(Some(Err(read_error))) => {
                    return Err(read_error).context("slot stream read failed")
                }
                Ok(Some(Ok(Message::Text(text)))) => {
                    self.handle_message(&text, &mut subscription_id)
                }
                Ok(Some(Ok(Message::Ping(payload)))) => {
                    ws.send(Message::Pong(payload))
                        .await
                        .context("slot stream pong failed")?;
                }
                Ok(Some(Ok(Message::Close(frame)))) => {
                    return Err(anyhow!("slot stream closed: {frame:?}"));
                }
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    fn handle_message(&self, text: &str, subscription_id: &mut Option<u64>) {
        let Ok(value) = serde_json::from_str::<Value>(text) else {
            debug!("discarding unparsable slot stream message");
            return;
        };
        if value.get("id").and_then(Value::as_u64) == Some(1) {
            *subscription_id = value.get("result").and_then(Value::as_u64);
            return;
        }
        if value.get("method").and_then(Value::as_str) != Some("slotsUpdatesNotification") {
            return;
        }
        let Some(result) = value.pointer("/params/result") else {
            return;
        };
        // Only first-shred-received pings pace the pipeline.
        if result.get("type").and_then(Value::as_str) != Some("firstShredReceived") {
            return;
        }
        let Some(slot) = result.get("slot").and_then(Value::as_u64) else {
            return;
        };
        let timestamp = result
            .get("timestamp")
            .and_then(Value::as_i64)
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        self.current_slot.store(slot, Ordering::Relaxed);
        self.metrics.record_slot_update();
        self.forward_tick(SlotTick { slot, timestamp });
    }

    fn forward_tick(&self, tick: SlotTick) {
        let Ok(tick_tx) = self.tick_tx.lock() else {
            return;
        };
        let Some(tick_tx) = tick_tx.as_ref() else {
            return;
        };
        match tick_tx.try_send(tick) {
            Ok(()) => debug!(slot = tick.slot, "slot update"),
            Err(mpsc::error::TrySendError::Full(tick)) => {
                warn!(slot = tick.slot, "dropping slot update");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> (SlotMonitor, mpsc::Receiver<SlotTick>) {
        SlotMonitor::new(
            "ws://127.0.0.1:1/unreachable".to_string(),
            Duration::from_secs(20),
            Duration::from_secs(3),
            Arc::new(PublishMetrics::new()),
        )
    }

    fn first_shred_message(slot: u64, timestamp: Option<i64>) -> String {
        let mut result = json!({ "type": "firstShredReceived", "slot": slot });
        if let Some(timestamp) = timestamp {
            result["timestamp"] = json!(timestamp);
        }
        json!({
            "jsonrpc": "2.0",
            "method": "slotsUpdatesNotification",
            "params": { "result": result, "subscription": 0 }
        })
        .to_string()
    }

    #[test]
    fn current_slot_starts_at_zero() {
        let (monitor, _rx) = monitor();
        assert_eq!(monitor.current_slot(), 0);
    }

    #[test]
    fn first_shred_event_updates_slot_and_ticks() {
        let (monitor, mut rx) = monitor();
        let mut subscription_id = None;
        monitor.handle_message(&first_shred_message(42, Some(1_700_000_000_000)), &mut subscription_id);

        assert_eq!(monitor.current_slot(), 42);
        let tick = rx.try_recv().expect("tick");
        assert_eq!(tick.slot, 42);
        assert_eq!(tick.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn missing_timestamp_is_synthesized() {
        let (monitor, mut rx) = monitor();
        let before = Utc::now();
        monitor.handle_message(&first_shred_message(42, None), &mut None);
        let tick = rx.try_recv().expect("tick");
        assert!(tick.timestamp >= before);
    }

    #[test]
    fn other_event_kinds_are_discarded() {
        let (monitor, mut rx) = monitor();
        let message = json!({
            "jsonrpc": "2.0",
            "method": "slotsUpdatesNotification",
            "params": { "result": { "type": "completed", "slot": 7 }, "subscription": 0 }
        })
        .to_string();
        monitor.handle_message(&message, &mut None);
        assert_eq!(monitor.current_slot(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn subscription_confirmation_is_captured() {
        let (monitor, _rx) = monitor();
        let mut subscription_id = None;
        monitor.handle_message(
            &json!({ "jsonrpc": "2.0", "id": 1, "result": 99 }).to_string(),
            &mut subscription_id,
        );
        assert_eq!(subscription_id, Some(99));
        assert_eq!(monitor.current_slot(), 0);
    }

    #[test]
    fn backpressure_drops_the_newer_tick() {
        let (monitor, mut rx) = monitor();
        monitor.handle_message(&first_shred_message(10, None), &mut None);
        monitor.handle_message(&first_shred_message(11, None), &mut None);

        // the slot reading always advances, but only the first tick queued
        assert_eq!(monitor.current_slot(), 11);
        assert_eq!(rx.try_recv().expect("tick").slot, 10);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancelled_run_closes_the_tick_stream() {
        let (monitor, mut rx) = monitor();
        let cancel = CancellationToken::new();
        cancel.cancel();
        monitor.run(cancel).await;
        assert!(rx.recv().await.is_none());
    }
}
