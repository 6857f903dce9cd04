use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide publish counters. Constructed once at startup and shared by
/// `Arc`; components record into whichever counters concern them. There is no
/// scrape endpoint; the counters surface through periodic snapshot logging.
#[derive(Debug, Default)]
pub struct PublishMetrics {
    slot_updates: AtomicU64,
    blockhash_refreshes: AtomicU64,
    transactions_sent: AtomicU64,
    price_updates_sent: AtomicU64,
    price_updates_dropped: AtomicU64,
    rpc_requests: AtomicU64,
    notifications_delivered: AtomicU64,
    websocket_connections: AtomicI64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub slot_updates: u64,
    pub blockhash_refreshes: u64,
    pub transactions_sent: u64,
    pub price_updates_sent: u64,
    pub price_updates_dropped: u64,
    pub rpc_requests: u64,
    pub notifications_delivered: u64,
    pub websocket_connections: i64,
}

impl PublishMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_slot_update(&self) {
        self.slot_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blockhash_refresh(&self) {
        self.blockhash_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_transaction_sent(&self) {
        self.transactions_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_price_updates_sent(&self, count: u64) {
        self.price_updates_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_price_update_dropped(&self) {
        self.price_updates_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rpc_request(&self) {
        self.rpc_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_delivered(&self) {
        self.notifications_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_opened(&self) {
        self.websocket_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn websocket_closed(&self) {
        self.websocket_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            slot_updates: self.slot_updates.load(Ordering::Relaxed),
            blockhash_refreshes: self.blockhash_refreshes.load(Ordering::Relaxed),
            transactions_sent: self.transactions_sent.load(Ordering::Relaxed),
            price_updates_sent: self.price_updates_sent.load(Ordering::Relaxed),
            price_updates_dropped: self.price_updates_dropped.load(Ordering::Relaxed),
            rpc_requests: self.rpc_requests.load(Ordering::Relaxed),
            notifications_delivered: self.notifications_delivered.load(Ordering::Relaxed),
            websocket_connections: self.websocket_connections.load(Ordering::Relaxed),
        }
    }
}
