//! Reconciles in-memory objects with storage after a rollback.
//!
//! A rollback removes rows but cannot reach the objects that were built from
//! them. The coordinator records which objects each transaction touched; on
//! rollback the guard forces exactly those objects to `Stale`, after which
//! they refuse persistence queries until reloaded. Reloading an object whose
//! row is gone fails with `NotFound`.

use std::{collections::BTreeSet, sync::Arc};

use pairledger_core::{RowId, StorageBackend, TransactionId};

use crate::error::{LedgerError, LedgerResult};
use crate::models::{Entity, LedgerEntry, PersistenceState};

/// An in-memory object whose persistence state the guard can revoke.
pub trait Tracked {
    fn label(&self) -> &'static str;
    fn identity(&self) -> Option<RowId>;
    fn persistence_state(&self) -> PersistenceState;
    fn invalidate(&mut self);
}

impl Tracked for LedgerEntry {
    fn label(&self) -> &'static str {
        "ledger entry"
    }

    fn identity(&self) -> Option<RowId> {
        LedgerEntry::identity(self)
    }

    fn persistence_state(&self) -> PersistenceState {
        self.state()
    }

    fn invalidate(&mut self) {
        self.mark_stale();
    }
}

impl Tracked for Entity {
    fn label(&self) -> &'static str {
        "entity"
    }

    fn identity(&self) -> Option<RowId> {
        Entity::identity(self)
    }

    fn persistence_state(&self) -> PersistenceState {
        self.state()
    }

    fn invalidate(&mut self) {
        self.mark_stale();
    }
}

/// What one transaction touched: pair indices within its batch and the
/// account keys it resolved.
#[derive(Debug, Default, Clone)]
pub struct TouchSet {
    pairs: BTreeSet<usize>,
    accounts: BTreeSet<Arc<str>>,
}

impl TouchSet {
    pub fn touch_pair(&mut self, index: usize) {
        self.pairs.insert(index);
    }

    pub fn touch_account(&mut self, key: Arc<str>) {
        self.accounts.insert(key);
    }

    pub fn has_pair(&self, index: usize) -> bool {
        self.pairs.contains(&index)
    }

    pub fn has_account(&self, key: &str) -> bool {
        self.accounts.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.accounts.is_empty()
    }
}

pub struct InvalidationGuard {
    storage: Arc<dyn StorageBackend>,
}

impl InvalidationGuard {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Forces every object in `touched` to `Stale`. Returns how many objects
    /// were invalidated.
    pub fn invalidate<'a, I>(&self, tx_id: TransactionId, touched: I) -> usize
    where
        I: IntoIterator<Item = &'a mut dyn Tracked>,
    {
        let mut count = 0;
        for object in touched {
            tracing::debug!(
                tx_id,
                kind = object.label(),
                identity = ?object.identity(),
                previous = ?object.persistence_state(),
                "Invalidating object touched by rolled back transaction"
            );
            object.invalidate();
            count += 1;
        }
        metrics::counter!("pairledger_entities_invalidated_total", count as u64);
        tracing::debug!(tx_id, count, "Invalidation complete");
        count
    }

    /// Re-reads an entity by its cached identity.
    ///
    /// On success the entity is `Persisted` again. If the row no longer exists,
    /// or the identity now belongs to a different row, this fails with
    /// `NotFound` and the entity keeps its current state.
    pub fn reload_entity(&self, entity: &mut Entity) -> LedgerResult<()> {
        let id = entity.identity().ok_or_else(|| {
            LedgerError::NotFound(format!("{} '{}' has no identity", entity.kind(), entity.key()))
        })?;
        let row = self.storage.read_entity(None, id)?;
        if row.kind != *entity.kind() || row.key != *entity.key() {
            return Err(LedgerError::NotFound(format!(
                "{} '{}' (identity {} now holds {} '{}')",
                entity.kind(), entity.key(), id, row.kind, row.key
            )));
        }
        entity.record_row(&row);
        Ok(())
    }

    /// Re-reads a ledger entry by its cached identity, with the same
    /// guarantees as `reload_entity`.
    pub fn reload_entry(&self, entry: &mut LedgerEntry) -> LedgerResult<()> {
        let id = entry.identity().ok_or_else(|| {
            LedgerError::NotFound(format!("ledger entry on '{}' has no identity", entry.account()))
        })?;
        let row = self.storage.read_ledger_entry(None, id)?;
        let same_row = row.amount == entry.amount()
            && entry.account_id().map_or(true, |account_id| account_id == row.account_id)
            && entry.batch_id().map_or(true, |batch_id| batch_id == row.batch_id);
        if !same_row {
            return Err(LedgerError::NotFound(format!(
                "ledger entry {} no longer matches the row stored under that identity",
                id
            )));
        }
        entry.resolve_account(row.account_id);
        entry.record_row(&row);
        Ok(())
    }
}
