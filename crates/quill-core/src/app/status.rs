//! Status - writer の稼働状況

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of a writer's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterStats {
    /// Jobs accepted into the queue.
    pub submitted: u64,
    pub succeeded: u64,
    /// Jobs rejected after exhausting their attempts.
    pub failed: u64,
    /// Failed attempts that were followed by another attempt.
    pub retried: u64,
    /// Submissions refused because the writer was closed.
    pub rejected: u64,
    /// Queued jobs dropped by `abort`.
    pub abandoned: u64,
    /// Jobs waiting in the queue right now.
    pub pending: usize,
    pub started_at: Option<DateTime<Utc>>,
}

/// Live counters shared by the writer handle and its worker.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, pending: usize, started_at: DateTime<Utc>) -> WriterStats {
        WriterStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            pending,
            started_at: Some(started_at),
        }
    }
}
