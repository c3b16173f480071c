//! In-memory domain objects and their persistence state.

pub mod batch;
pub mod entity;
pub mod entry;

pub use batch::{BatchState, EntryPair, TransactionBatch};
pub use entity::Entity;
pub use entry::LedgerEntry;

/// Where an in-memory object stands relative to its storage row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceState {
    /// Never written; has no identity.
    Unpersisted,
    /// Written to storage, or freshly read. An object written by a
    /// transaction that later rolls back moves on to `Stale`.
    Persisted,
    /// Touched by a transaction that rolled back. Any cached identity may
    /// point at a row that no longer exists.
    Stale,
}
