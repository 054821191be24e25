//! App - アプリケーション層
//!
//! # 主要コンポーネント
//! - **WriterBuilder**: 設定の検証と writer の起動
//! - **BackgroundWriter**: 書き込みの受付とライフサイクル（shutdown / abort）
//! - **WorkerLoop**: 専用スレッド上でジョブを一つずつ実行するループ
//! - **StoreService**: 読み書きの入口（misuse guard 付き）
//! - **WriterStats**: 稼働状況のスナップショット

pub mod builder;
pub mod service;
pub mod status;
pub mod writer;
pub(crate) mod worker_loop;

pub use self::builder::{BuildError, WriterBuilder, WriterConfig};
pub use self::service::StoreService;
pub use self::status::WriterStats;
pub use self::writer::BackgroundWriter;
