//! BackgroundWriter - 書き込みの直列化とライフサイクル
//!
//! # 使用例
//! ```ignore
//! let writer = WriterBuilder::new().spawn(factory)?;
//! let id = writer
//!     .enqueue_write_with(|db| Box::pin(async move { Ok::<_, BoxError>(db.insert("row")?) }))
//!     .await?;
//! writer.shutdown();
//! ```
//!
//! # shutdown と abort
//! - shutdown: 受付を止め、投入済みのジョブを全て実行し終えてからスレッドを join する
//! - abort: 受付を止め、実行中のジョブだけ完了させる。残りは `WriteError::Abandoned` で reject
//!
//! どちらの場合も、呼び出し元の future が解決されないまま残ることはない。

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::{debug, error, trace};

use super::builder::{BuildError, WriterConfig};
use super::status::{StatsCounters, WriterStats};
use super::worker_loop::WorkerLoop;
use crate::domain::{BoxError, WriteError};
use crate::ports::HandleFactory;
use crate::queue::{Job, JobQueue, QueuedJob, WriteTicket};
use crate::retry::RetryPolicy;

/// Serializes writes onto one dedicated worker thread.
///
/// Each instance owns its own queue and thread; instances never share state.
/// Dropping the writer performs [`shutdown`](Self::shutdown).
pub struct BackgroundWriter<F: HandleFactory> {
    factory: Arc<F>,
    queue: Arc<JobQueue<F::Handle>>,
    abort_tx: watch::Sender<bool>,
    stats: Arc<StatsCounters>,
    policy: RetryPolicy,
    started_at: DateTime<Utc>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<F: HandleFactory> BackgroundWriter<F> {
    pub(crate) fn start(config: WriterConfig, factory: Arc<F>) -> Result<Self, BuildError> {
        let queue = Arc::new(JobQueue::new());
        let stats = Arc::new(StatsCounters::default());
        let (abort_tx, abort_rx) = watch::channel(false);
        let policy = config.retry_policy();

        let worker_loop = WorkerLoop {
            factory: Arc::clone(&factory),
            queue: Arc::clone(&queue),
            policy,
            stats: Arc::clone(&stats),
            abort_rx,
        };

        // The worker owns a current-thread runtime so its operations can await
        // without depending on the caller's runtime. Operations are host code
        // and may use tokio I/O as well as timers.
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let worker = thread::Builder::new()
            .name(config.thread_name.clone())
            .spawn(move || runtime.block_on(worker_loop.run()))?;

        debug!(thread = %config.thread_name, "writer started");

        Ok(Self {
            factory,
            queue,
            abort_tx,
            stats,
            policy,
            started_at: Utc::now(),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queue a write whose only result is success or failure.
    pub fn enqueue_write<Op>(&self, op: Op) -> WriteTicket<()>
    where
        Op: for<'a> FnMut(&'a mut F::Handle) -> BoxFuture<'a, Result<(), BoxError>>
            + Send
            + 'static,
    {
        self.enqueue_write_with(op)
    }

    /// Queue a write that produces a value (e.g. a new row id).
    ///
    /// Never blocks. If the writer is already shut down the returned ticket
    /// resolves to [`WriteError::Closed`] and `op` is never called.
    pub fn enqueue_write_with<T, Op>(&self, op: Op) -> WriteTicket<T>
    where
        T: Send + 'static,
        Op: for<'a> FnMut(&'a mut F::Handle) -> BoxFuture<'a, Result<T, BoxError>>
            + Send
            + 'static,
    {
        let (job, rx) = Job::<F::Handle, T>::new(Box::new(op));
        match self.queue.push(Box::new(job)) {
            Ok(id) => {
                self.stats.submitted();
                trace!(job = %id, "write queued");
                WriteTicket::new(Some(id), rx)
            }
            Err(mut job) => {
                self.stats.rejected();
                debug!("writer is closed, rejecting write");
                job.fail(WriteError::Closed);
                WriteTicket::new(None, rx)
            }
        }
    }

    /// Stop accepting writes, run everything already queued, then wait for
    /// the worker thread to exit.
    ///
    /// Blocks the calling thread. Calling it again is a no-op.
    pub fn shutdown(&self) {
        self.queue.close();
        if let Some(worker) = self.take_worker() {
            join_worker(worker);
        }
    }

    /// [`shutdown`](Self::shutdown) for async callers: the join runs on the
    /// blocking pool instead of the caller's executor thread.
    pub async fn shutdown_async(&self) {
        self.queue.close();
        let Some(worker) = self.take_worker() else {
            return;
        };
        if let Err(err) = tokio::task::spawn_blocking(move || join_worker(worker)).await {
            error!(%err, "failed to join writer worker");
        }
    }

    /// Stop after the job in flight. Jobs still queued are rejected with
    /// [`WriteError::Abandoned`].
    pub fn abort(&self) {
        let _ = self.abort_tx.send(true);
        self.queue.close();
        if let Some(worker) = self.take_worker() {
            join_worker(worker);
        }
    }

    /// True once shutdown or abort has been requested.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats.snapshot(self.queue.len(), self.started_at)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;

        // An operation that shuts down its own writer cannot wait for itself.
        if worker.thread().id() == thread::current().id() {
            error!("writer shut down from its own worker thread; not joining");
            return None;
        }
        Some(worker)
    }
}

fn join_worker(worker: JoinHandle<()>) {
    if worker.join().is_err() {
        error!("writer worker thread panicked");
    }
}

impl<F: HandleFactory> Drop for BackgroundWriter<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<F: HandleFactory> fmt::Debug for BackgroundWriter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundWriter")
            .field("closed", &self.is_closed())
            .field("pending", &self.pending())
            .field("policy", &self.policy)
            .finish()
    }
}
