//! Domain model (ids, errors, events).

pub mod errors;
pub mod events;
pub mod ids;

pub use self::errors::{
    BoxError, Classify, ErrorClass, RetryError, SQLITE_BUSY, SQLITE_LOCKED, StoreError,
    WriteError, classify_chain,
};
pub use self::events::StoreEvent;
pub use self::ids::JobId;
