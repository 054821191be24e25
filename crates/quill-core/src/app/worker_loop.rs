//! WorkerLoop - 書き込みジョブの直列実行ループ
//!
//! # フロー（1 ジョブあたり）
//! 1. HandleFactory::open() で新しいハンドルを取得（試行ごとに新規）
//! 2. ジョブの操作を実行。ハンドルは試行のスコープを抜けた時点で drop
//! 3. 成功 → 結果を書き込んで次のジョブへ
//!    失敗 → attempts < max なら固定遅延を挟んで 1 へ、max に達したら reject
//!
//! 失敗もパニックも試行の中で捕まえる。ループ自体が落ちると以降の書き込みが
//! 全て止まるため、境界は網羅的でなければならない。

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{Instrument, debug, debug_span, info, warn};

use super::status::StatsCounters;
use crate::domain::{BoxError, WriteError};
use crate::ports::HandleFactory;
use crate::queue::{JobQueue, QueueEntry, QueuedJob};
use crate::retry::RetryPolicy;

/// The single consumer of a writer's queue.
pub(crate) struct WorkerLoop<F: HandleFactory> {
    pub(crate) factory: Arc<F>,
    pub(crate) queue: Arc<JobQueue<F::Handle>>,
    pub(crate) policy: RetryPolicy,
    pub(crate) stats: Arc<StatsCounters>,
    pub(crate) abort_rx: watch::Receiver<bool>,
}

impl<F: HandleFactory> WorkerLoop<F> {
    /// Run until the queue is closed and drained, or until abort is signalled.
    pub(crate) async fn run(mut self) {
        info!("writer worker started");
        let mut watch_abort = true;
        loop {
            // abort は次の取り出しの前にだけ確認する（実行中のジョブは止めない）
            if *self.abort_rx.borrow() {
                break;
            }

            let entry = tokio::select! {
                biased;
                changed = self.abort_rx.changed(), if watch_abort => {
                    // writer dropped without abort: its Drop closed the queue,
                    // so drain until take() returns None
                    if changed.is_err() {
                        watch_abort = false;
                    }
                    continue;
                }
                entry = self.queue.take() => entry,
            };

            let Some(entry) = entry else {
                break;
            };

            let span = debug_span!("write_job", job = %entry.id);
            self.process(entry).instrument(span).await;
        }

        self.abandon_remaining();
        info!("writer worker stopped");
    }

    async fn process(&self, entry: QueueEntry<F::Handle>) {
        let QueueEntry { id, mut job } = entry;
        loop {
            match self.attempt(job.as_mut()).await {
                Ok(()) => {
                    self.stats.succeeded();
                    debug!(attempts = job.attempts(), "write job succeeded");
                    return;
                }
                Err(err) => {
                    let attempts = job.attempts();
                    if attempts < self.policy.max_attempts {
                        self.stats.retried();
                        debug!(attempt = attempts, error = %err, "write attempt failed, retrying");
                        tokio::time::sleep(self.policy.next_delay(attempts)).await;
                    } else {
                        warn!(job = %id, attempts, error = %err, "write job failed");
                        self.stats.failed();
                        job.fail(WriteError::Failed {
                            attempts,
                            source: err,
                        });
                        return;
                    }
                }
            }
        }
    }

    /// One attempt against a fresh handle.
    async fn attempt(&self, job: &mut dyn QueuedJob<F::Handle>) -> Result<(), BoxError> {
        job.begin_attempt();

        let factory = self.factory.as_ref();
        let mut handle = match std::panic::catch_unwind(AssertUnwindSafe(|| factory.open())) {
            Ok(opened) => opened?,
            Err(payload) => return Err(panic_error("opening a storage handle", payload)),
        };

        let result = AssertUnwindSafe(job.execute(&mut handle))
            .catch_unwind()
            .await;
        drop(handle);

        match result {
            Ok(outcome) => outcome,
            Err(payload) => Err(panic_error("write operation", payload)),
        }
    }

    /// Reject whatever is still queued. Only reached with jobs left on abort.
    fn abandon_remaining(&self) {
        // close first so nothing can be pushed after the drain
        self.queue.close();
        for QueueEntry { id, mut job } in self.queue.drain() {
            debug!(job = %id, "abandoning queued write");
            job.fail(WriteError::Abandoned);
            self.stats.abandoned();
        }
    }
}

fn panic_error(what: &str, payload: Box<dyn Any + Send>) -> BoxError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("{what} panicked: {message}").into()
}
