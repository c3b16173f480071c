//! Core types and traits for PairLedger storage backends.
//!
//! This crate provides the `StorageBackend` trait, the row types that cross it
//! and the `SchemaDescriptor` every backend is opened with, so that storage
//! implementations can live in separate crates.

pub mod models;
pub mod schema;
pub mod storage;

// Re-export key types at crate root for convenience
pub use models::{from_micros, now_micros, RowId, ACCOUNT_KIND};
pub use models::write::{NewEntityRow, NewLedgerRow, LedgerRowUpdate};
pub use models::read::{EntityRow, LedgerRow};
pub use schema::SchemaDescriptor;
pub use storage::{StorageBackend, StorageError, TransactionId};
