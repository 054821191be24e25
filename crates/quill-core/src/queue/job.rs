//! Job model: operation + attempt count + single-assignment result channel.
//!
//! # 二層構造
//! - **表層（Typed）**: `Job<H, T>` - 結果の型 `T` を知っている（確認だけの書き込みは `T = ()`）
//! - **内部（Dyn）**: `QueuedJob<H>` - object-safe, キューに `Box<dyn QueuedJob<H>>` として積む
//!
//! Worker Loop だけがジョブを変更する（attempts の加算と完了の書き込み）。

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::domain::{BoxError, JobId, WriteError};

/// A write operation: borrows a handle for one attempt and produces a value.
///
/// It may be called once per attempt, so anything it moves into the returned
/// future has to be cloned per call.
pub type WriteOp<H, T> =
    Box<dyn for<'a> FnMut(&'a mut H) -> BoxFuture<'a, Result<T, BoxError>> + Send>;

/// Box a closure as a [`WriteOp`].
///
/// Passing the closure through this bound lets the compiler infer the
/// higher-ranked signature, so callers can write
/// `write_op(|h| Box::pin(async move { ... }))`.
pub fn write_op<H, T, F>(op: F) -> WriteOp<H, T>
where
    F: for<'a> FnMut(&'a mut H) -> BoxFuture<'a, Result<T, BoxError>> + Send + 'static,
{
    Box::new(op)
}

/// Single-assignment completion of a job's result.
///
/// The first `complete` wins; later calls are ignored and return `false`.
#[derive(Debug)]
pub struct Completion<T> {
    tx: Option<oneshot::Sender<Result<T, WriteError>>>,
}

impl<T> Completion<T> {
    pub fn channel() -> (Self, oneshot::Receiver<Result<T, WriteError>>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Write the result. Never blocks; a caller that dropped its ticket
    /// simply never sees the value.
    pub fn complete(&mut self, result: Result<T, WriteError>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Object-safe view of a queued job, independent of its result type.
#[async_trait]
pub trait QueuedJob<H: Send + 'static>: Send {
    /// Executions started so far (including the one in flight).
    fn attempts(&self) -> u32;

    /// Count a new execution; returns the updated count.
    fn begin_attempt(&mut self) -> u32;

    /// Run the operation once. On success the value is written to the
    /// result channel before returning.
    async fn execute(&mut self, handle: &mut H) -> Result<(), BoxError>;

    /// Reject the job. Returns `false` if it was already completed.
    fn fail(&mut self, error: WriteError) -> bool;

    fn is_completed(&self) -> bool;
}

/// A queued write with result type `T`.
pub struct Job<H, T> {
    op: WriteOp<H, T>,
    attempts: u32,
    completion: Completion<T>,
}

impl<H, T> Job<H, T> {
    pub fn new(op: WriteOp<H, T>) -> (Self, oneshot::Receiver<Result<T, WriteError>>) {
        let (completion, rx) = Completion::channel();
        let job = Self {
            op,
            attempts: 0,
            completion,
        };
        (job, rx)
    }
}

#[async_trait]
impl<H, T> QueuedJob<H> for Job<H, T>
where
    H: Send + 'static,
    T: Send + 'static,
{
    fn attempts(&self) -> u32 {
        self.attempts
    }

    fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    async fn execute(&mut self, handle: &mut H) -> Result<(), BoxError> {
        let value = (self.op)(handle).await?;
        self.completion.complete(Ok(value));
        Ok(())
    }

    fn fail(&mut self, error: WriteError) -> bool {
        self.completion.complete(Err(error))
    }

    fn is_completed(&self) -> bool {
        self.completion.is_completed()
    }
}

/// Caller-side future of a queued write.
///
/// Awaiting it yields the operation's value or the final error. Dropping it
/// does not cancel the write.
#[derive(Debug)]
pub struct WriteTicket<T> {
    job_id: Option<JobId>,
    rx: oneshot::Receiver<Result<T, WriteError>>,
}

impl<T> WriteTicket<T> {
    pub(crate) fn new(job_id: Option<JobId>, rx: oneshot::Receiver<Result<T, WriteError>>) -> Self {
        Self { job_id, rx }
    }

    /// Id assigned by the queue; `None` when the submission was rejected.
    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }
}

impl<T> Future for WriteTicket<T> {
    type Output = Result<T, WriteError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // sender dropped without a result
            Poll::Ready(Err(_)) => Poll::Ready(Err(WriteError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}
