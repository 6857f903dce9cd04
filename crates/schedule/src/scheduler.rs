use pythian_chain::{Commitment, RpcClient};
use pythian_signer::Signer;
use pythian_telemetry::PublishMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time;
use tracing::{error, info};

use crate::blockhash::BlockhashMonitor;
use crate::buffer::Buffer;
use crate::SlotTick;

/// Drives the publish pipeline from slot ticks: drain the buffer, assemble
/// and sign one transaction, and fire off the submission on a detached task.
/// Ticks are processed one at a time; submissions overlap freely.
pub struct Scheduler {
    buffer: Arc<Buffer>,
    blockhash: Arc<BlockhashMonitor>,
    signer: Arc<Signer>,
    rpc: Arc<RpcClient>,
    stale_horizon: u64,
    submit_timeout: Duration,
    metrics: Arc<PublishMetrics>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buffer: Arc<Buffer>,
        blockhash: Arc<BlockhashMonitor>,
        signer: Arc<Signer>,
        rpc: Arc<RpcClient>,
        stale_horizon: u64,
        submit_timeout: Duration,
        metrics: Arc<PublishMetrics>,
    ) -> Self {
        Self {
            buffer,
            blockhash,
            signer,
            rpc,
            stale_horizon,
            submit_timeout,
            metrics,
        }
    }

    /// Consumes ticks until the stream closes, then waits for every in-flight
    /// submission before returning.
    pub async fn run(&self, mut ticks: mpsc::Receiver<SlotTick>) {
        let mut submissions: JoinSet<()> = JoinSet::new();
        while let Some(tick) = ticks.recv().await {
            while submissions.try_join_next().is_some() {}
            self.process_tick(tick, &mut submissions);
        }
        while submissions.join_next().await.is_some() {}
    }

    fn process_tick(&self, tick: SlotTick, submissions: &mut JoinSet<()>) {
        let min_slot = tick.slot.saturating_sub(self.stale_horizon);
        let Some(mut builder) = self.buffer.flush(min_slot) else {
            return;
        };
        builder
            .set_fee_payer(self.signer.pubkey())
            .set_recent_blockhash(self.blockhash.current().blockhash);
        let mut transaction = match builder.build() {
            Ok(transaction) => transaction,
            Err(build_error) => {
                error!(error = %build_error, "failed to build transaction");
                return;
            }
        };
        if let Err(sign_error) = self.signer.sign_price_update(&mut transaction) {
            error!(error = %sign_error, "failed to sign transaction");
            return;
        }

        let updates = transaction.message.instructions.len();
        info!(updates, slot = tick.slot, "submitting price update");
        self.metrics.record_price_updates_sent(updates as u64);

        let rpc = self.rpc.clone();
        let metrics = self.metrics.clone();
        let submit_timeout = self.submit_timeout;
        submissions.spawn(async move {
            match time::timeout(
                submit_timeout,
                rpc.send_transaction(&transaction, Commitment::Processed),
            )
            .await
            {
                Err(_elapsed) => {
                    error!(
                        timeout_ms = submit_timeout.as_millis() as u64,
                        "transaction submission timed out"
                    );
                }
                Ok(Err(send_error)) => {
                    error!(error = %send_error, "failed to send transaction");
                }
                Ok(Ok(signature)) => {
                    metrics.record_transaction_sent();
                    info!(signature = %signature, "sent transaction");
                }
            }
        });
    }
}
