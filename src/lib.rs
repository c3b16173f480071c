//! Atomic persistence of double-entry ledger pairs.
//!
//! A `TransactionBatch` of entry pairs is committed through the
//! `TransactionCoordinator` in a single storage transaction. Accounts are
//! resolved with the race-free `EntityFinder`, pairs are written and linked
//! by the `LedgerRepository`, and after a rollback the `InvalidationGuard`
//! marks every touched in-memory object `Stale`.

pub mod balancing;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod finder;
pub mod guard;
pub mod models;
pub mod repository;
pub mod storage;

pub use balancing::{BalancingConfig, BalancingRule, FixedTotal, NetZero};
pub use coordinator::{ActiveTransaction, BatchReceipt, RetryPolicy, TransactionCoordinator};
pub use error::{LedgerError, LedgerResult};
pub use finder::{EntityFinder, FindOrCreateStrategy};
pub use guard::{InvalidationGuard, TouchSet, Tracked};
pub use models::{BatchState, Entity, EntryPair, LedgerEntry, PersistenceState, TransactionBatch};
pub use repository::LedgerRepository;
pub use pairledger_core::{RowId, SchemaDescriptor, ACCOUNT_KIND};
