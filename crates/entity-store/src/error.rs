//! Store error types.

use thiserror::Error;

use crate::{Entity, Pool};

/// Store error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Every slot of the pool is in use.
    #[error("{0} entity pool exhausted")]
    PoolExhausted(Pool),

    /// Entity slot is not active.
    #[error("entity {0} is not active")]
    Inactive(Entity),

    /// Index outside every pool.
    #[error("entity index {0} is out of range")]
    OutOfRange(u32),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
