//! quill-core
//!
//! Write serialization for single-writer embedded stores.
//!
//! 全ての書き込みを一本のバックグラウンドスレッドに直列化し、失敗した書き込みは
//! 固定遅延で決まった回数だけリトライする。呼び出し元は待つことも、結果を捨てる
//! ことも、別の処理を続けることもできる。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, errors, events）
//! - **ports**: 抽象化レイヤー（HandleFactory, EventSink）
//! - **queue**: ジョブとキュー（Job, WriteTicket, JobQueue）
//! - **retry**: リトライポリシーとスタンドアロンの retry_with_backoff
//! - **app**: BackgroundWriter, WorkerLoop, StoreService, WriterBuilder
//! - **impls**: MemoryStore, BroadcastSink など（テスト・デモ用）

pub mod app;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod retry;

pub use app::{BackgroundWriter, BuildError, StoreService, WriterBuilder, WriterConfig, WriterStats};
pub use domain::{BoxError, ErrorClass, JobId, RetryError, StoreError, StoreEvent, WriteError};
pub use ports::{EventSink, HandleFactory};
pub use queue::{WriteTicket, write_op};
pub use retry::{Backoff, RetryPolicy, retry_with_backoff};
