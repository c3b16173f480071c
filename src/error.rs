use std::sync::Arc;

use thiserror::Error;

use pairledger_core::{RowId, StorageError};

use crate::models::BatchState;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Every failure the engine reports. Operations either succeed with a value
/// or fail with exactly one of these; there is no "returned false" channel.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Local validation failed; nothing was written.
    #[error("invalid pair: {0}")]
    InvalidPair(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The optimistic find-or-create path kept losing to concurrent inserters.
    #[error("find-or-create of {kind} '{key}' still conflicted after {attempts} attempts")]
    DuplicateKeyRace {
        kind: Arc<str>,
        key: Arc<str>,
        attempts: u32,
    },

    /// Storage-level contention. The whole batch may be retried.
    #[error("transaction conflict: {0}")]
    TransactionConflict(String),

    /// The object was touched by a transaction that rolled back.
    #[error("stale reference to {what} (cached identity {id:?}); reload before use")]
    StaleReference {
        what: &'static str,
        id: Option<RowId>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("batch is no longer pending (state: {0:?})")]
    BatchFinalized(BatchState),

    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },

    #[error("storage error: {0}")]
    Storage(StorageError),
}

impl LedgerError {
    /// Whether retrying the whole `commit_batch` call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::TransactionConflict(_))
    }
}

impl From<StorageError> for LedgerError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Conflict(reason) => LedgerError::TransactionConflict(reason),
            StorageError::NotFound { table, id } => LedgerError::NotFound(format!("{} row {}", table, id)),
            StorageError::SchemaMismatch { expected, found } => LedgerError::SchemaMismatch { expected, found },
            other => LedgerError::Storage(other),
        }
    }
}
