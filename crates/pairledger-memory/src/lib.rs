//! In-memory transactional store.
//!
//! Writes made inside a transaction are buffered per transaction and become
//! visible to everyone else only on commit; rollback simply drops them.
//! Unique entity keys are reserved by the first transaction that inserts
//! them, and any other inserter of the same key waits until that transaction
//! finishes (or the lock timeout elapses), which mirrors how a relational
//! engine treats a uniqueness constraint under READ COMMITTED.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use time::OffsetDateTime;

use pairledger_core::{
    EntityRow, LedgerRow, LedgerRowUpdate, NewEntityRow, NewLedgerRow, RowId, SchemaDescriptor,
    StorageBackend, StorageError, TransactionId,
};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type EntityKey = (Arc<str>, Arc<str>);

#[derive(Default)]
struct PendingWrites {
    ledger: BTreeMap<RowId, LedgerRow>,
    entities: BTreeMap<RowId, EntityRow>,
}

#[derive(Default)]
struct StoreState {
    ledger: BTreeMap<RowId, LedgerRow>,
    entities: BTreeMap<RowId, EntityRow>,
    entity_keys: HashMap<EntityKey, RowId>,
    pending: HashMap<TransactionId, PendingWrites>,
    reservations: HashMap<EntityKey, TransactionId>,
}

impl StoreState {
    fn pending(&self, tx_id: TransactionId) -> Result<&PendingWrites, StorageError> {
        self.pending.get(&tx_id).ok_or(StorageError::NoActiveTransaction(tx_id))
    }

    fn pending_mut(&mut self, tx_id: TransactionId) -> Result<&mut PendingWrites, StorageError> {
        self.pending.get_mut(&tx_id).ok_or(StorageError::NoActiveTransaction(tx_id))
    }

    fn visible_ledger(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<Option<&LedgerRow>, StorageError> {
        if let Some(tx_id) = tx_id {
            if let Some(row) = self.pending(tx_id)?.ledger.get(&id) {
                return Ok(Some(row));
            }
        }
        Ok(self.ledger.get(&id))
    }

    fn visible_entity(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<Option<&EntityRow>, StorageError> {
        if let Some(tx_id) = tx_id {
            if let Some(row) = self.pending(tx_id)?.entities.get(&id) {
                return Ok(Some(row));
            }
        }
        Ok(self.entities.get(&id))
    }

    fn visible_entity_by_key(&self, tx_id: Option<TransactionId>, kind: &str, key: &str) -> Result<Option<&EntityRow>, StorageError> {
        if let Some(tx_id) = tx_id {
            let own = self.pending(tx_id)?
                .entities
                .values()
                .find(|e| e.kind.as_ref() == kind && e.key.as_ref() == key);
            if own.is_some() {
                return Ok(own);
            }
        }
        let committed = self.entity_keys
            .get(&(Arc::from(kind), Arc::from(key)))
            .and_then(|id| self.entities.get(id));
        Ok(committed)
    }

    fn release(&mut self, tx_id: TransactionId) {
        self.reservations.retain(|_, owner| *owner != tx_id);
    }
}

enum EntityInsert {
    Created(EntityRow),
    Existing(EntityRow),
}

pub struct InMemoryStorage {
    schema: SchemaDescriptor,
    state: Mutex<StoreState>,
    released: Condvar,
    id_counter: AtomicI64,
    tx_counter: AtomicU64,
    lock_timeout: Duration,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::with_schema(SchemaDescriptor::default(), DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_schema(schema: SchemaDescriptor, lock_timeout: Duration) -> Self {
        Self {
            schema,
            state: Mutex::new(StoreState::default()),
            released: Condvar::new(),
            id_counter: AtomicI64::new(1),
            tx_counter: AtomicU64::new(1),
            lock_timeout,
        }
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self::with_schema(SchemaDescriptor::default(), lock_timeout)
    }

    fn next_id(&self) -> RowId {
        self.id_counter.fetch_add(1, Ordering::SeqCst)
    }

    fn entity_not_found(&self, id: RowId) -> StorageError {
        StorageError::NotFound { table: self.schema.entity_table.clone(), id }
    }

    fn ledger_not_found(&self, id: RowId) -> StorageError {
        StorageError::NotFound { table: self.schema.ledger_table.clone(), id }
    }

    fn insert_entity_inner(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<EntityInsert, StorageError> {
        let deadline = Instant::now() + self.lock_timeout;
        let key: EntityKey = (row.kind.clone(), row.key.clone());
        let mut state = self.state.lock();

        loop {
            if let Some(existing) = state.visible_entity_by_key(tx_id, &row.kind, &row.key)? {
                return Ok(EntityInsert::Existing(existing.clone()));
            }
            match state.reservations.get(&key).copied() {
                Some(owner) if Some(owner) != tx_id => {
                    tracing::debug!(owner, kind = %row.kind, key = %row.key, "Waiting on key reserved by another transaction");
                    if self.released.wait_until(&mut state, deadline).timed_out() {
                        return Err(StorageError::Conflict(format!(
                            "lock timeout waiting for {} '{}'",
                            row.kind, row.key
                        )));
                    }
                }
                _ => break,
            }
        }

        let created = EntityRow {
            id: self.next_id(),
            kind: row.kind.clone(),
            key: row.key.clone(),
            created_at: OffsetDateTime::now_utc(),
        };

        match tx_id {
            Some(tx_id) => {
                state.pending_mut(tx_id)?.entities.insert(created.id, created.clone());
                state.reservations.insert(key, tx_id);
            }
            None => {
                state.entity_keys.insert(key, created.id);
                state.entities.insert(created.id, created.clone());
            }
        }
        Ok(EntityInsert::Created(created))
    }
}

impl StorageBackend for InMemoryStorage {
    fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        self.state.lock().pending.insert(tx_id, PendingWrites::default());
        tracing::debug!(tx_id, "Transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let writes = state.pending.remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction(tx_id))?;
        for (id, row) in writes.ledger {
            state.ledger.insert(id, row);
        }
        for (id, row) in writes.entities {
            state.entity_keys.insert((row.kind.clone(), row.key.clone()), id);
            state.entities.insert(id, row);
        }
        state.release(tx_id);
        drop(state);
        self.released.notify_all();
        tracing::debug!(tx_id, "Transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        state.pending.remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction(tx_id))?;
        state.release(tx_id);
        drop(state);
        self.released.notify_all();
        tracing::debug!(tx_id, "Transaction rolled back");
        Ok(())
    }

    fn insert_ledger_entry(&self, tx_id: TransactionId, row: &NewLedgerRow) -> Result<LedgerRow, StorageError> {
        let mut state = self.state.lock();
        if state.visible_entity(Some(tx_id), row.account_id)?.is_none() {
            return Err(self.entity_not_found(row.account_id));
        }
        if let Some(pair_id) = row.pair_id {
            if state.visible_ledger(Some(tx_id), pair_id)?.is_none() {
                return Err(self.ledger_not_found(pair_id));
            }
        }
        let inserted = LedgerRow::from_new(self.next_id(), row, OffsetDateTime::now_utc());
        state.pending_mut(tx_id)?.ledger.insert(inserted.id, inserted.clone());
        Ok(inserted)
    }

    fn update_ledger_entry(&self, tx_id: TransactionId, id: RowId, update: &LedgerRowUpdate) -> Result<LedgerRow, StorageError> {
        let mut state = self.state.lock();
        if let Some(pair_id) = update.pair_id {
            if state.visible_ledger(Some(tx_id), pair_id)?.is_none() {
                return Err(self.ledger_not_found(pair_id));
            }
        }
        let mut row = state.visible_ledger(Some(tx_id), id)?
            .cloned()
            .ok_or_else(|| self.ledger_not_found(id))?;
        row.apply(update);
        state.pending_mut(tx_id)?.ledger.insert(id, row.clone());
        Ok(row)
    }

    fn read_ledger_entry(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<LedgerRow, StorageError> {
        let state = self.state.lock();
        state.visible_ledger(tx_id, id)?
            .cloned()
            .ok_or_else(|| self.ledger_not_found(id))
    }

    fn count_ledger_entries(&self, tx_id: Option<TransactionId>) -> Result<u64, StorageError> {
        let state = self.state.lock();
        let mut count = state.ledger.len();
        if let Some(tx_id) = tx_id {
            count += state.pending(tx_id)?
                .ledger
                .keys()
                .filter(|id| !state.ledger.contains_key(id))
                .count();
        }
        Ok(count as u64)
    }

    fn insert_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<EntityRow, StorageError> {
        match self.insert_entity_inner(tx_id, row)? {
            EntityInsert::Created(created) => Ok(created),
            EntityInsert::Existing(_) => Err(StorageError::UniqueViolation {
                kind: row.kind.clone(),
                key: row.key.clone(),
            }),
        }
    }

    fn find_entity_by_key(&self, tx_id: Option<TransactionId>, kind: &str, key: &str) -> Result<Option<EntityRow>, StorageError> {
        let state = self.state.lock();
        Ok(state.visible_entity_by_key(tx_id, kind, key)?.cloned())
    }

    fn read_entity(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<EntityRow, StorageError> {
        let state = self.state.lock();
        state.visible_entity(tx_id, id)?
            .cloned()
            .ok_or_else(|| self.entity_not_found(id))
    }

    fn insert_or_get_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<(EntityRow, bool), StorageError> {
        match self.insert_entity_inner(tx_id, row)? {
            EntityInsert::Created(created) => Ok((created, true)),
            EntityInsert::Existing(existing) => Ok((existing, false)),
        }
    }
}
