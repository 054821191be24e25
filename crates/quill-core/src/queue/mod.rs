//! Queue module: job model and the FIFO write queue.
//!
//! # 設計
//! - 投入（push）は同期・非ブロッキング。上限なし。
//! - 取り出し（take）は単一のコンシューマ（Worker Loop）だけが呼ぶ。
//! - close 後の push は拒否し、take は残りを吐き切ってから None を返す。
//! - JobId はロック内で採番するので、ID 順 = キュー順。

mod job;

pub use job::{Completion, Job, QueuedJob, WriteOp, WriteTicket, write_op};

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::domain::JobId;

/// A dequeued job together with the id it was queued under.
pub struct QueueEntry<H: Send + 'static> {
    pub id: JobId,
    pub job: Box<dyn QueuedJob<H>>,
}

struct QueueState<H: Send + 'static> {
    jobs: VecDeque<QueueEntry<H>>,
    closed: bool,
    next_id: JobId,
}

/// Unbounded multi-producer / single-consumer FIFO of write jobs.
pub struct JobQueue<H: Send + 'static> {
    state: Mutex<QueueState<H>>,
    notify: Notify,
}

impl<H: Send + 'static> JobQueue<H> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
                next_id: JobId::new(1),
            }),
            notify: Notify::new(),
        }
    }

    // The lock is never held across an await or a user callback, so a
    // poisoned state is still consistent.
    fn lock(&self) -> MutexGuard<'_, QueueState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a job. Hands the job back if the queue is closed.
    pub fn push(&self, job: Box<dyn QueuedJob<H>>) -> Result<JobId, Box<dyn QueuedJob<H>>> {
        let id = {
            let mut state = self.lock();
            if state.closed {
                return Err(job);
            }
            let id = state.next_id;
            state.next_id = id.next();
            state.jobs.push_back(QueueEntry { id, job });
            id
        };

        // Single consumer: a stored permit is enough if nobody is waiting yet.
        self.notify.notify_one();
        Ok(id)
    }

    /// Wait for the next job.
    ///
    /// Returns `None` once the queue is closed and empty. Cancel safe: a job
    /// is only removed when it is returned.
    pub async fn take(&self) -> Option<QueueEntry<H>> {
        loop {
            {
                let mut state = self.lock();
                if let Some(entry) = state.jobs.pop_front() {
                    return Some(entry);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting new jobs. Jobs already queued stay queued.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove every queued job at once.
    pub fn drain(&self) -> Vec<QueueEntry<H>> {
        self.lock().jobs.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().jobs.is_empty()
    }
}

impl<H: Send + 'static> Default for JobQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}
