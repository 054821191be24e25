//! Impls - ports の実装（テスト・デモ用）
//!
//! # 含まれる実装
//! - **MemoryStore**: HandleFactory を実装したインメモリの単一書き込みストア
//! - **BroadcastSink / NoopSink**: EventSink の実装
//!
//! 実際のデータベースへのアダプタはホスト側で HandleFactory を実装して渡す。

pub mod broadcast_sink;
pub mod memory_store;

pub use self::broadcast_sink::{BroadcastSink, NoopSink};
pub use self::memory_store::{
    HandleStats, JournalMode, MemoryHandle, MemoryStore, MemoryStoreBuilder, Record,
};
