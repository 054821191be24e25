//! EventSink port - ストアイベントの通知先

use crate::domain::StoreEvent;

/// EventSink receives store events (publish/subscribe).
///
/// `publish` must not block: it is called on the caller's path right after a
/// failed operation.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: StoreEvent);
}
