use pythian_chain::{Instruction, Pubkey, TransactionBuilder};
use pythian_oracle::UpdPriceCommand;
use pythian_telemetry::PublishMetrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Coalesces pending price-update instructions between slot ticks. At most
/// one entry per price account; a newer update for the same account replaces
/// the older one without merging.
pub struct Buffer {
    metrics: Arc<PublishMetrics>,
    updates: Mutex<HashMap<Pubkey, PendingUpdate>>,
}

struct PendingUpdate {
    instruction: Instruction,
    pub_slot: u64,
}

impl Buffer {
    pub fn new(metrics: Arc<PublishMetrics>) -> Self {
        Self {
            metrics,
            updates: Mutex::new(HashMap::new()),
        }
    }

    /// Stores or overwrites the pending update for the instruction's price
    /// account. Instructions that are not well-formed `upd_price` calls
    /// (payload kind, exactly 3 referenced accounts) are silently ignored.
    pub fn push_update(&self, instruction: Instruction) {
        let Ok(command) = UpdPriceCommand::decode(&instruction.data) else {
            return;
        };
        if instruction.accounts.len() != 3 {
            return;
        }
        let price_account = instruction.accounts[1].pubkey;
        if let Ok(mut updates) = self.updates.lock() {
            updates.insert(
                price_account,
                PendingUpdate {
                    instruction,
                    pub_slot: command.pub_slot,
                },
            );
        }
    }

    /// Takes every queued instruction into an unsigned-transaction builder,
    /// emptying the buffer. Updates published before `min_slot` are dropped
    /// with a warning. Returns `None` when nothing survives the filter.
    /// Instruction order follows map iteration and is unspecified.
    pub fn flush(&self, min_slot: u64) -> Option<TransactionBuilder> {
        let drained: Vec<(Pubkey, PendingUpdate)> = match self.updates.lock() {
            Ok(mut updates) => updates.drain().collect(),
            Err(_) => return None,
        };

        let mut builder = TransactionBuilder::new();
        for (price_account, update) in drained {
            if update.pub_slot < min_slot {
                warn!(
                    price = %price_account,
                    pub_slot = update.pub_slot,
                    min_slot,
                    "dropping price update"
                );
                self.metrics.record_price_update_dropped();
                continue;
            }
            builder.add_instruction(update.instruction);
        }
        if builder.is_empty() {
            None
        } else {
            Some(builder)
        }
    }

    pub fn pending(&self) -> usize {
        self.updates.lock().map(|updates| updates.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pythian_chain::AccountMeta;
    use pythian_oracle::{upd_price, PriceStatus};

    fn metrics() -> Arc<PublishMetrics> {
        Arc::new(PublishMetrics::new())
    }

    fn update_instruction(price_account: Pubkey, price: i64, pub_slot: u64) -> Instruction {
        upd_price(
            Pubkey::new([0xaa; 32]),
            Pubkey::new([1; 32]),
            price_account,
            &UpdPriceCommand {
                status: PriceStatus::Trading,
                price,
                conf: 1,
                pub_slot,
            },
        )
    }

    #[test]
    fn last_update_per_price_account_wins() {
        let buffer = Buffer::new(metrics());
        let price_account = Pubkey::new([5; 32]);
        for (price, pub_slot) in [(100, 10), (101, 11), (102, 12)] {
            buffer.push_update(update_instruction(price_account, price, pub_slot));
        }
        assert_eq!(buffer.pending(), 1);

        let builder = buffer.flush(0).expect("one update");
        assert_eq!(builder.instruction_count(), 1);
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn coalesced_entry_carries_the_newest_payload() {
        let buffer = Buffer::new(metrics());
        let price_account = Pubkey::new([5; 32]);
        buffer.push_update(update_instruction(price_account, 100, 10));
        buffer.push_update(update_instruction(price_account, 102, 12));

        let mut builder = buffer.flush(0).expect("one update");
        builder
            .set_fee_payer(Pubkey::new([1; 32]))
            .set_recent_blockhash(pythian_chain::Blockhash::new([9; 32]));
        let tx = builder.build().expect("build");
        let command =
            UpdPriceCommand::decode(&tx.message.instructions[0].data).expect("payload decodes");
        assert_eq!(command.price, 102);
        assert_eq!(command.pub_slot, 12);
    }

    #[test]
    fn distinct_price_accounts_keep_distinct_entries() {
        let buffer = Buffer::new(metrics());
        buffer.push_update(update_instruction(Pubkey::new([5; 32]), 100, 10));
        buffer.push_update(update_instruction(Pubkey::new([6; 32]), 200, 10));
        assert_eq!(buffer.pending(), 2);
        let builder = buffer.flush(0).expect("two updates");
        assert_eq!(builder.instruction_count(), 2);
    }

    #[test]
    fn stale_updates_are_dropped_on_flush() {
        let buffer = Buffer::new(metrics());
        buffer.push_update(update_instruction(Pubkey::new([5; 32]), 100, 10));
        assert!(buffer.flush(11).is_none());
    }

    #[test]
    fn flush_keeps_fresh_and_drops_stale() {
        let counters = metrics();
        let buffer = Buffer::new(counters.clone());
        let fresh_account = Pubkey::new([5; 32]);
        buffer.push_update(update_instruction(fresh_account, 100, 990));
        buffer.push_update(update_instruction(Pubkey::new([6; 32]), 200, 960));

        let mut builder = buffer.flush(968).expect("one survivor");
        assert_eq!(builder.instruction_count(), 1);
        assert_eq!(counters.snapshot().price_updates_dropped, 1);

        builder
            .set_fee_payer(Pubkey::new([1; 32]))
            .set_recent_blockhash(pythian_chain::Blockhash::new([9; 32]));
        let tx = builder.build().expect("build");
        let command =
            UpdPriceCommand::decode(&tx.message.instructions[0].data).expect("payload decodes");
        assert_eq!(command.pub_slot, 990);
    }

    #[test]
    fn boundary_slot_is_not_stale() {
        let buffer = Buffer::new(metrics());
        buffer.push_update(update_instruction(Pubkey::new([5; 32]), 100, 968));
        assert!(buffer.flush(968).is_some());
    }

    #[test]
    fn malformed_pushes_are_ignored() {
        let buffer = Buffer::new(metrics());

        // wrong payload kind
        buffer.push_update(Instruction::new(
            Pubkey::new([0xaa; 32]),
            vec![
                AccountMeta::writable(Pubkey::new([1; 32]), true),
                AccountMeta::writable(Pubkey::new([5; 32]), false),
                AccountMeta::readonly(Pubkey::new([3; 32]), false),
            ],
            vec![0; 40],
        ));

        // wrong account count
        let mut truncated = update_instruction(Pubkey::new([5; 32]), 100, 10);
        truncated.accounts.truncate(2);
        buffer.push_update(truncated);

        assert_eq!(buffer.pending(), 0);
        assert!(buffer.flush(0).is_none());
    }

    #[test]
    fn flush_on_empty_buffer_returns_none() {
        let buffer = Buffer::new(metrics());
        assert!(buffer.flush(0).is_none());
    }
}
