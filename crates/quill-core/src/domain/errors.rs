//! Errors - エラー型と分類
//!
//! # 分類
//! - Busy: ストアが一時的にロックされている（リトライで解消する見込み）
//! - ConcurrentUse: 同じハンドルを二つの操作が同時に使った（呼び出し側のバグ）
//! - Other: それ以外
//!
//! Worker Loop は分類に関係なく全ての失敗をリトライする。
//! 分類を見るのはスタンドアロンの retry helper と misuse guard だけ。

use std::error::Error as StdError;

use thiserror::Error;

/// Error type carried by write and read operations.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// SQLite-style result code: the database file is locked by another connection.
pub const SQLITE_BUSY: i32 = 5;

/// SQLite-style result code: a table is locked within the same connection.
pub const SQLITE_LOCKED: i32 = 6;

const BUSY_PATTERNS: &[&str] = &[
    "database is locked",
    "database is busy",
    "database table is locked",
    "sqlite_busy",
    "sqlite_locked",
];

const CONCURRENT_USE_PATTERN: &str = "second operation was started on this";

/// Failure class of a storage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Busy,
    ConcurrentUse,
    Other,
}

impl ErrorClass {
    /// Classify a raw result code, if it carries a known meaning.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            SQLITE_BUSY | SQLITE_LOCKED => Some(ErrorClass::Busy),
            _ => None,
        }
    }

    /// Classify by message signature (case-insensitive).
    pub fn from_message(message: &str) -> Self {
        let lowered = message.to_ascii_lowercase();
        if lowered.contains(CONCURRENT_USE_PATTERN) {
            ErrorClass::ConcurrentUse
        } else if BUSY_PATTERNS.iter().any(|p| lowered.contains(p)) {
            ErrorClass::Busy
        } else {
            ErrorClass::Other
        }
    }

    /// Only lock contention is worth retrying outside the writer.
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorClass::Busy)
    }
}

/// Anything that can report its failure class.
pub trait Classify {
    fn classify(&self) -> ErrorClass;
}

/// Walk the source chain and return the first class that is not `Other`.
///
/// `StoreError` levels are classified by result code first, every other level
/// by its message.
pub fn classify_chain(err: &(dyn StdError + 'static)) -> ErrorClass {
    let mut current = Some(err);
    while let Some(level) = current {
        let class = match level.downcast_ref::<StoreError>() {
            Some(store) => store.classify(),
            None => ErrorClass::from_message(&level.to_string()),
        };
        if class != ErrorClass::Other {
            return class;
        }
        current = level.source();
    }
    ErrorClass::Other
}

/// Error reported by a storage handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StoreError {
    code: Option<i32>,
    message: String,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    pub fn busy() -> Self {
        Self::with_code(SQLITE_BUSY, "database is locked")
    }

    pub fn concurrent_use() -> Self {
        Self::new(
            "a second operation was started on this handle before a previous operation completed",
        )
    }

    pub fn code(&self) -> Option<i32> {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Classify for StoreError {
    fn classify(&self) -> ErrorClass {
        self.code
            .and_then(ErrorClass::from_code)
            .unwrap_or_else(|| ErrorClass::from_message(&self.message))
    }
}

impl Classify for BoxError {
    fn classify(&self) -> ErrorClass {
        classify_chain(self.as_ref())
    }
}

/// Final result of a queued write, as seen by the submitting caller.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The writer was shut down before the job was submitted.
    #[error("writer is closed; the write was not accepted")]
    Closed,

    /// The job was dropped without running (abort, or the worker went away).
    #[error("write was abandoned before it completed")]
    Abandoned,

    /// Every attempt failed; `source` is the last observed error.
    #[error("write failed after {attempts} attempt(s): {source}")]
    Failed {
        attempts: u32,
        #[source]
        source: BoxError,
    },
}

impl WriteError {
    /// Number of executions made before giving up; 0 if the job never ran.
    pub fn attempts(&self) -> u32 {
        match self {
            WriteError::Failed { attempts, .. } => *attempts,
            WriteError::Closed | WriteError::Abandoned => 0,
        }
    }
}

impl Classify for WriteError {
    fn classify(&self) -> ErrorClass {
        match self {
            WriteError::Failed { source, .. } => source.classify(),
            WriteError::Closed | WriteError::Abandoned => ErrorClass::Other,
        }
    }
}

/// Failure of [`crate::retry::retry_with_backoff`].
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt hit lock contention.
    #[error("max retries exceeded after {attempts} attempt(s)")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// A non-transient failure; returned on first sight, without retrying.
    #[error(transparent)]
    Permanent(BoxError),
}

impl RetryError {
    pub fn into_source(self) -> BoxError {
        match self {
            RetryError::MaxRetriesExceeded { source, .. } | RetryError::Permanent(source) => source,
        }
    }
}

impl Classify for RetryError {
    fn classify(&self) -> ErrorClass {
        match self {
            RetryError::MaxRetriesExceeded { .. } => ErrorClass::Busy,
            RetryError::Permanent(source) => source.classify(),
        }
    }
}
