use std::sync::Arc;

use crate::models::{
    read::{EntityRow, LedgerRow},
    write::{LedgerRowUpdate, NewEntityRow, NewLedgerRow},
    RowId,
};
use crate::schema::SchemaDescriptor;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{table} row not found: {id}")]
    NotFound { table: Arc<str>, id: RowId },
    #[error("unique constraint violated for {kind} '{key}'")]
    UniqueViolation { kind: Arc<str>, key: Arc<str> },
    #[error("transaction conflict: {0}")]
    Conflict(String),
    #[error("no active transaction: {0}")]
    NoActiveTransaction(TransactionId),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
    #[error("schema version mismatch: expected {expected}, found {found}")]
    SchemaMismatch { expected: u32, found: u32 },
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

pub type TransactionId = u64;

/// The transactional store the ledger engine runs against.
///
/// Every mutation takes the id of a transaction opened with
/// `begin_transaction`, except entity inserts, which also run in autocommit
/// mode when `tx` is `None`. Reads through a transaction observe that
/// transaction's own writes plus committed data, never the writes of another
/// open transaction.
pub trait StorageBackend: Send + Sync {
    fn schema(&self) -> &SchemaDescriptor;

    fn begin_transaction(&self) -> Result<TransactionId, StorageError>;
    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;
    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError>;

    // Ledger rows
    fn insert_ledger_entry(&self, tx_id: TransactionId, row: &NewLedgerRow) -> Result<LedgerRow, StorageError>;
    fn update_ledger_entry(&self, tx_id: TransactionId, id: RowId, update: &LedgerRowUpdate) -> Result<LedgerRow, StorageError>;
    fn read_ledger_entry(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<LedgerRow, StorageError>;
    fn count_ledger_entries(&self, tx_id: Option<TransactionId>) -> Result<u64, StorageError>;

    // Uniquely keyed entities
    fn insert_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<EntityRow, StorageError>;
    fn find_entity_by_key(&self, tx_id: Option<TransactionId>, kind: &str, key: &str) -> Result<Option<EntityRow>, StorageError>;
    fn read_entity(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<EntityRow, StorageError>;

    /// Inserts the row or, when `(kind, key)` is already taken, returns the
    /// existing row. The flag is `true` only for the caller whose insert won.
    ///
    /// Must be safe against concurrent callers on the same key. Backends
    /// without such a primitive keep the default, and callers fall back to an
    /// optimistic insert that reports `UniqueViolation`.
    fn insert_or_get_entity(&self, _tx_id: Option<TransactionId>, _row: &NewEntityRow) -> Result<(EntityRow, bool), StorageError> {
        Err(StorageError::Unsupported("insert_or_get_entity"))
    }
}
