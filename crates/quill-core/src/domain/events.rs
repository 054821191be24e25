//! Events - ストアから発行される通知
//!
//! 例外として呼び出し元に伝播させず、EventSink 経由で購読者に知らせるもの。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// StoreEvent is published through an `EventSink`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreEvent {
    /// Two operations used one handle at the same time.
    ///
    /// This is a bug in the calling code, not a transient condition, so the
    /// call that detected it returns an empty result instead of an error.
    ConcurrentHandleUse {
        /// Name of the operation that detected the misuse.
        context: String,
        /// Thread the operation ran on.
        thread: String,
        message: String,
        occurred_at: DateTime<Utc>,
    },
}

impl StoreEvent {
    pub fn concurrent_handle_use(
        context: impl Into<String>,
        thread: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        StoreEvent::ConcurrentHandleUse {
            context: context.into(),
            thread: thread.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn context(&self) -> &str {
        match self {
            StoreEvent::ConcurrentHandleUse { context, .. } => context,
        }
    }
}
