//! EventSink 実装
//!
//! - BroadcastSink: tokio broadcast で複数の購読者に配る
//! - NoopSink: 何もしない（購読者がいない場合のデフォルト）

use tokio::sync::broadcast;
use tracing::trace;

use crate::domain::StoreEvent;
use crate::ports::EventSink;

/// Fans events out to every live subscriber.
///
/// Publishing never blocks. A subscriber that falls more than `capacity`
/// events behind loses the oldest ones (`RecvError::Lagged`).
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<StoreEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: StoreEvent) {
        // no subscribers is not an error
        if self.tx.send(event).is_err() {
            trace!("store event dropped, no subscribers");
        }
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: StoreEvent) {}
}
