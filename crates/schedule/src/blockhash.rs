use anyhow::{Context, Result};
use pythian_chain::{BlockhashSnapshot, Commitment, RpcClient};
use pythian_telemetry::PublishMetrics;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Keeps a fresh "recent blockhash" available for non-blocking read.
///
/// Construction performs one synchronous fetch, so a monitor always holds a
/// valid snapshot; the pipeline must not start without one. The refresh loop
/// replaces the snapshot wholesale and leaves the last-known-good value in
/// place when a poll fails.
pub struct BlockhashMonitor {
    rpc: Arc<RpcClient>,
    interval: Duration,
    metrics: Arc<PublishMetrics>,
    snapshot: RwLock<BlockhashSnapshot>,
}

impl BlockhashMonitor {
    pub async fn new(
        rpc: Arc<RpcClient>,
        interval: Duration,
        metrics: Arc<PublishMetrics>,
    ) -> Result<Self> {
        let snapshot = rpc
            .get_latest_blockhash(Commitment::Confirmed)
            .await
            .context("failed to get initial recent blockhash")?;
        metrics.record_blockhash_refresh();
        Ok(Self {
            rpc,
            interval,
            metrics,
            snapshot: RwLock::new(snapshot),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_snapshot(
        rpc: Arc<RpcClient>,
        interval: Duration,
        metrics: Arc<PublishMetrics>,
        snapshot: BlockhashSnapshot,
    ) -> Self {
        Self {
            rpc,
            interval,
            metrics,
            snapshot: RwLock::new(snapshot),
        }
    }

    pub fn current(&self) -> BlockhashSnapshot {
        self.snapshot
            .read()
            .map(|snapshot| *snapshot)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    /// Periodic refresh loop; each poll is bounded by the refresh interval.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            match time::timeout(
                self.interval,
                self.rpc.get_latest_blockhash(Commitment::Confirmed),
            )
            .await
            {
                Err(_) => {
                    warn!(
                        timeout_ms = self.interval.as_millis() as u64,
                        "recent blockhash fetch timed out"
                    );
                }
                Ok(Err(error)) => {
                    warn!(error = %error, "failed to get recent blockhash");
                }
                Ok(Ok(snapshot)) => {
                    debug!(blockhash = %snapshot.blockhash, "updated recent blockhash");
                    if let Ok(mut current) = self.snapshot.write() {
                        *current = snapshot;
                    }
                    self.metrics.record_blockhash_refresh();
                }
            }
        }
    }
}
