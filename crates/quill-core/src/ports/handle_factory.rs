//! HandleFactory port - ストレージハンドルの生成
//!
//! ホスト側が提供する「新しい接続を一つ作る」能力。
//! writer は試行ごとに open() を呼び、試行が終わればハンドルを drop する。

use crate::domain::BoxError;

/// Produces a fresh, independent storage handle on demand.
///
/// Dropping the handle releases it. A failure to open is treated exactly like
/// a failed operation by the writer (retried, then surfaced).
pub trait HandleFactory: Send + Sync + 'static {
    type Handle: Send + 'static;

    fn open(&self) -> Result<Self::Handle, BoxError>;
}

impl<F, H, E> HandleFactory for F
where
    F: Fn() -> Result<H, E> + Send + Sync + 'static,
    H: Send + 'static,
    E: Into<BoxError>,
{
    type Handle = H;

    fn open(&self) -> Result<H, BoxError> {
        self().map_err(Into::into)
    }
}
