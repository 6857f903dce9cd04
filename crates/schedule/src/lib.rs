//! The publish pipeline: slot and blockhash monitors feeding a scheduler
//! that drains the update buffer into signed transactions.

use chrono::{DateTime, Utc};

mod blockhash;
mod buffer;
mod scheduler;
mod slots;

pub use self::blockhash::BlockhashMonitor;
pub use self::buffer::Buffer;
pub use self::scheduler::Scheduler;
pub use self::slots::SlotMonitor;

/// One pacer event from the slot stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTick {
    pub slot: u64,
    pub timestamp: DateTime<Utc>,
}
