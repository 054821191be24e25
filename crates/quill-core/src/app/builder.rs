//! WriterBuilder - writer の構築と起動
//!
//! # Fail-fast 設計
//! - 設定は spawn 前に検証する（max_attempts = 0 や空のスレッド名は BuildError）
//! - ワーカー用ランタイムはスレッドを起こす前に作る。失敗すれば spawn が Err を返し、
//!   誰も待たないキューが残ることはない

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::writer::BackgroundWriter;
use crate::ports::HandleFactory;
use crate::retry::{Backoff, RetryPolicy};

/// Writer configuration.
///
/// ```ignore
/// let config = WriterConfig::from_json_str(r#"{ "max_attempts": 5 }"#)?;
/// let writer = WriterBuilder::new().with_config(config).spawn(factory)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Total executions per job, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts of one job.
    pub retry_delay_ms: u64,
    /// Name of the worker thread.
    pub thread_name: String,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: 300,
            thread_name: "quill-writer".to_string(),
        }
    }
}

impl WriterConfig {
    pub fn from_json_str(json: &str) -> Result<Self, BuildError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, BuildError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::ZeroAttempts);
        }
        if self.thread_name.trim().is_empty() {
            return Err(BuildError::EmptyThreadName);
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Backoff::Fixed {
                delay_ms: self.retry_delay_ms,
            },
        }
    }
}

/// BuildError は writer 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("thread_name must not be empty")]
    EmptyThreadName,

    #[error("invalid writer config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("writer I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds and starts a [`BackgroundWriter`].
#[derive(Debug, Clone, Default)]
pub struct WriterBuilder {
    config: WriterConfig,
}

impl WriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: WriterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Validate the config and start the worker thread.
    pub fn spawn<F: HandleFactory>(self, factory: F) -> Result<BackgroundWriter<F>, BuildError> {
        self.spawn_shared(Arc::new(factory))
    }

    /// Like [`spawn`](Self::spawn), for a factory that is also used elsewhere
    /// (e.g. by read-path callers).
    pub fn spawn_shared<F: HandleFactory>(
        self,
        factory: Arc<F>,
    ) -> Result<BackgroundWriter<F>, BuildError> {
        self.config.validate()?;
        BackgroundWriter::start(self.config, factory)
    }
}
