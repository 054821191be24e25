//! Job identifiers.
//!
//! JobId は writer インスタンスごとの連番で、キューのロック内で採番される。
//! そのため ID の大小 = 投入順 = 実行順 が常に成り立つ。

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one queued write job.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The id that follows this one.
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}
