//! StoreService - 読み書きの入口
//!
//! # 経路
//! - 書き込み: BackgroundWriter に投入（直列化 + 固定遅延リトライ）
//! - 読み込み: 呼び出し元で新しいハンドルを開き、retry_with_backoff で実行
//!   （ロック競合だけをリトライ）
//!
//! # Misuse guard
//! 一つのハンドルを二つの操作が同時に使った場合（ConcurrentUse）は呼び出し元の
//! バグなので、エラーとして返さずに EventSink へ通知し `Ok(None)` を返す。
//! それ以外のエラーはそのまま呼び出し元へ伝播する。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::status::WriterStats;
use super::writer::BackgroundWriter;
use crate::domain::{BoxError, Classify, ErrorClass, RetryError, StoreEvent, WriteError};
use crate::ports::{EventSink, HandleFactory};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Facade over one store: its handle factory, its writer and its event sink.
pub struct StoreService<F: HandleFactory> {
    factory: Arc<F>,
    writer: BackgroundWriter<F>,
    sink: Arc<dyn EventSink>,
    read_policy: RetryPolicy,
    initialized: AtomicBool,
}

impl<F: HandleFactory> StoreService<F> {
    /// `writer` should have been spawned from the same factory
    /// (see [`WriterBuilder::spawn_shared`](super::WriterBuilder::spawn_shared)).
    pub fn new(factory: Arc<F>, writer: BackgroundWriter<F>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            factory,
            writer,
            sink,
            read_policy: RetryPolicy::lock_contention_default(),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn with_read_policy(mut self, policy: RetryPolicy) -> Self {
        self.read_policy = policy;
        self
    }

    /// Run one-off setup (schema, journal mode) on a fresh handle.
    ///
    /// Runs on the calling thread, outside the writer queue. Calling it again
    /// runs `setup` again.
    pub fn initialize<Op>(&self, setup: Op) -> Result<(), BoxError>
    where
        Op: FnOnce(&mut F::Handle) -> Result<(), BoxError>,
    {
        let mut handle = self.factory.open()?;
        setup(&mut handle)?;
        self.initialized.store(true, Ordering::Release);
        debug!("store initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Read on a fresh handle, retrying lock contention.
    ///
    /// `Ok(None)` means the misuse guard fired and an event was published.
    pub async fn read<T, Op>(&self, context: &str, op: Op) -> Result<Option<T>, RetryError>
    where
        Op: for<'a> Fn(&'a mut F::Handle) -> BoxFuture<'a, Result<T, BoxError>>,
    {
        let op = &op;
        let factory = self.factory.as_ref();
        let result = retry_with_backoff(&self.read_policy, || async move {
            let mut handle = factory.open()?;
            op(&mut handle).await
        })
        .await;

        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.classify() == ErrorClass::ConcurrentUse => {
                self.report_misuse(context, err.into_source().as_ref());
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Write through the background writer.
    ///
    /// `Ok(None)` means the misuse guard fired and an event was published.
    pub async fn write<T, Op>(&self, context: &str, op: Op) -> Result<Option<T>, WriteError>
    where
        T: Send + 'static,
        Op: for<'a> FnMut(&'a mut F::Handle) -> BoxFuture<'a, Result<T, BoxError>>
            + Send
            + 'static,
    {
        match self.writer.enqueue_write_with(op).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.classify() == ErrorClass::ConcurrentUse => {
                self.report_misuse(context, &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn writer(&self) -> &BackgroundWriter<F> {
        &self.writer
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    pub fn stats(&self) -> WriterStats {
        self.writer.stats()
    }

    pub fn shutdown(&self) {
        self.writer.shutdown();
    }

    pub async fn shutdown_async(&self) {
        self.writer.shutdown_async().await;
    }

    fn report_misuse(&self, context: &str, err: &dyn std::error::Error) {
        let current = std::thread::current();
        let thread = match current.name() {
            Some(name) => name.to_string(),
            None => format!("{:?}", current.id()),
        };
        warn!(context, thread = %thread, error = %err, "storage handle used concurrently");
        self.sink
            .publish(StoreEvent::concurrent_handle_use(context, thread, err.to_string()));
    }
}
