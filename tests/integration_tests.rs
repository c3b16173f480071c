use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use pairledger::config::LedgerConfig;
use pairledger::storage::{InMemoryStorage, PostgresStorage, SqliteStorage, StorageBackend, StorageError, TransactionId};
use pairledger::{
    BalancingConfig, BatchState, EntityFinder, FindOrCreateStrategy, LedgerEntry, LedgerError,
    PersistenceState, SchemaDescriptor, TransactionBatch, TransactionCoordinator, ACCOUNT_KIND,
};
use pairledger_core::{EntityRow, LedgerRow, LedgerRowUpdate, NewEntityRow, NewLedgerRow, RowId};

/// Wraps a real backend and injects failures or hides capabilities.
#[derive(Default)]
struct Faults {
    /// Fail the n-th ledger update (1-based).
    fail_update_at: Option<usize>,
    /// Fail this many commits with a conflict.
    commit_conflicts: AtomicUsize,
    /// Fail every commit with a non-retryable error.
    broken_commit: bool,
    /// Hide the atomic insert-or-get primitive.
    no_upsert: bool,
    /// Never find an entity and reject every insert as a duplicate.
    always_race: bool,
    /// Park each commit between two waits on this barrier.
    commit_gate: Option<Arc<Barrier>>,
    /// Report the first entity lookup as a miss, as if a concurrent
    /// inserter had not committed yet.
    miss_first_find: AtomicBool,
}

struct TestStorage<S> {
    inner: S,
    faults: Faults,
    updates: AtomicUsize,
    commit_gated: AtomicBool,
}

impl<S: StorageBackend> TestStorage<S> {
    fn new(inner: S, faults: Faults) -> Arc<Self> {
        Arc::new(Self {
            inner,
            faults,
            updates: AtomicUsize::new(0),
            commit_gated: AtomicBool::new(false),
        })
    }
}

impl<S: StorageBackend> StorageBackend for TestStorage<S> {
    fn schema(&self) -> &SchemaDescriptor {
        self.inner.schema()
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        self.inner.begin_transaction()
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        if let Some(gate) = &self.faults.commit_gate {
            if !self.commit_gated.swap(true, Ordering::SeqCst) {
                gate.wait();
                gate.wait();
            }
        }
        if self.faults.broken_commit {
            return Err(StorageError::Other("disk full".to_string()));
        }
        let pending = self.faults.commit_conflicts.load(Ordering::SeqCst);
        if pending > 0 {
            self.faults.commit_conflicts.store(pending - 1, Ordering::SeqCst);
            return Err(StorageError::Conflict("deadlock detected".to_string()));
        }
        self.inner.commit_transaction(tx_id)
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        self.inner.rollback_transaction(tx_id)
    }

    fn insert_ledger_entry(&self, tx_id: TransactionId, row: &NewLedgerRow) -> Result<LedgerRow, StorageError> {
        self.inner.insert_ledger_entry(tx_id, row)
    }

    fn update_ledger_entry(&self, tx_id: TransactionId, id: RowId, update: &LedgerRowUpdate) -> Result<LedgerRow, StorageError> {
        let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        if self.faults.fail_update_at == Some(n) {
            return Err(StorageError::Other("connection reset".to_string()));
        }
        self.inner.update_ledger_entry(tx_id, id, update)
    }

    fn read_ledger_entry(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<LedgerRow, StorageError> {
        self.inner.read_ledger_entry(tx_id, id)
    }

    fn count_ledger_entries(&self, tx_id: Option<TransactionId>) -> Result<u64, StorageError> {
        self.inner.count_ledger_entries(tx_id)
    }

    fn insert_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<EntityRow, StorageError> {
        if self.faults.always_race {
            return Err(StorageError::UniqueViolation { kind: row.kind.clone(), key: row.key.clone() });
        }
        self.inner.insert_entity(tx_id, row)
    }

    fn find_entity_by_key(&self, tx_id: Option<TransactionId>, kind: &str, key: &str) -> Result<Option<EntityRow>, StorageError> {
        if self.faults.always_race || self.faults.miss_first_find.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.find_entity_by_key(tx_id, kind, key)
    }

    fn read_entity(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<EntityRow, StorageError> {
        self.inner.read_entity(tx_id, id)
    }

    fn insert_or_get_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<(EntityRow, bool), StorageError> {
        if self.faults.no_upsert || self.faults.always_race {
            return Err(StorageError::Unsupported("insert_or_get_entity"));
        }
        self.inner.insert_or_get_entity(tx_id, row)
    }
}

fn coordinator(storage: Arc<dyn StorageBackend>) -> TransactionCoordinator {
    TransactionCoordinator::from_config(storage, SchemaDescriptor::default(), &LedgerConfig::default())
        .expect("Failed to build coordinator")
}

fn memory() -> Arc<InMemoryStorage> {
    Arc::new(InMemoryStorage::new())
}

#[test]
fn test_single_pair_round_trip() {
    let storage = memory();
    let coordinator = coordinator(storage.clone());
    let mut batch = TransactionBatch::new()
        .with_pair(LedgerEntry::new("X", dec!(100)), LedgerEntry::new("Y", dec!(-100)));

    coordinator.commit_batch(&mut batch).unwrap();

    let pair = batch.pair(0).unwrap();
    let (a, b) = (pair.first(), pair.second());
    assert_eq!(a.pair_id(), b.identity());
    assert_eq!(b.pair_id(), a.identity());
    assert_eq!(a.state(), PersistenceState::Persisted);
    assert_eq!(b.state(), PersistenceState::Persisted);

    let fresh = coordinator.repository().fetch(a.identity().unwrap()).unwrap();
    assert_eq!(fresh.amount(), dec!(100));
    assert_eq!(&**fresh.account(), "X");
    assert_eq!(fresh.pair_id(), b.identity());
    assert_eq!(fresh.batch_id(), Some(batch.id()));
}

#[test]
fn test_unbalanced_pair_writes_nothing() {
    let storage = memory();
    let coordinator = coordinator(storage.clone());
    let mut batch = TransactionBatch::new()
        .with_pair(LedgerEntry::new("X", dec!(100)), LedgerEntry::new("Y", dec!(-99.99)));

    let err = coordinator.commit_batch(&mut batch).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidPair(_)));
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 0);
    assert!(storage.find_entity_by_key(None, ACCOUNT_KIND, "X").unwrap().is_none());
}

#[test]
fn test_mid_batch_failure_rolls_back_and_invalidates_everything() {
    let inner = InMemoryStorage::new();
    let existing = inner.insert_entity(None, &NewEntityRow::new(ACCOUNT_KIND, "bank")).unwrap();
    // third update is the first link of the second pair
    let storage = TestStorage::new(inner, Faults { fail_update_at: Some(3), ..Faults::default() });
    let coordinator = coordinator(storage.clone());

    let mut batch = TransactionBatch::new();
    batch.transfer("bank", "equity", dec!(500), "Investment");
    batch.transfer("loans", "bank", dec!(200), "Loan");

    let err = coordinator.commit_batch(&mut batch).unwrap_err();
    assert!(matches!(err, LedgerError::Storage(StorageError::Other(_))));
    assert_eq!(batch.state(), BatchState::RolledBack);
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 0);

    for pair in batch.pairs() {
        for entry in [pair.first(), pair.second()] {
            assert_eq!(entry.state(), PersistenceState::Stale);
            assert!(matches!(entry.is_persisted(), Err(LedgerError::StaleReference { .. })));
        }
    }
    // the first pair held identities of rows that no longer exist
    let mut written = batch.pair(0).unwrap().first().clone();
    assert!(written.identity().is_some());
    assert!(matches!(coordinator.guard().reload_entry(&mut written), Err(LedgerError::NotFound(_))));
    assert_eq!(written.state(), PersistenceState::Stale);

    // accounts created in the transaction are gone, the pre-existing one reloads
    let mut equity = batch.account("equity").unwrap().clone();
    assert!(matches!(coordinator.guard().reload_entity(&mut equity), Err(LedgerError::NotFound(_))));
    let mut bank = batch.account("bank").unwrap().clone();
    assert_eq!(bank.state(), PersistenceState::Stale);
    coordinator.guard().reload_entity(&mut bank).unwrap();
    assert_eq!(bank.identity(), Some(existing.id));
    assert!(bank.is_persisted().unwrap());

    assert!(matches!(
        coordinator.commit_batch(&mut batch),
        Err(LedgerError::BatchFinalized(BatchState::RolledBack))
    ));
}

#[test]
fn test_failed_commit_is_rolled_back() {
    let storage = TestStorage::new(
        InMemoryStorage::with_lock_timeout(Duration::from_millis(100)),
        Faults { broken_commit: true, ..Faults::default() },
    );
    let coordinator = coordinator(storage.clone());
    let mut batch = TransactionBatch::new();
    batch.transfer("cash", "sales", dec!(12.50), "Sale");

    let err = coordinator.commit_batch(&mut batch).unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(batch.state(), BatchState::RolledBack);
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 0);
    // key reservations were released by the rollback, so this does not time out
    let (_, created) = coordinator.finder().find_or_create_account("cash").unwrap();
    assert!(created);
}

#[test]
fn test_conflict_is_retried_as_whole_batch() {
    let storage = TestStorage::new(InMemoryStorage::new(), Faults {
        commit_conflicts: AtomicUsize::new(1),
        ..Faults::default()
    });
    let coordinator = coordinator(storage.clone());
    let mut template = TransactionBatch::new();
    template.transfer("X", "Y", dec!(1), "retry");

    let (committed, receipt) = coordinator.commit_with_retry(&template).unwrap();
    assert_eq!(committed.state(), BatchState::Committed);
    assert_eq!(receipt.batch_id, template.id());
    assert_eq!(receipt.created_accounts, 2);
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 2);
    assert_eq!(template.state(), BatchState::Pending);
}

#[test]
fn test_conflicts_beyond_retry_budget_surface() {
    let storage = TestStorage::new(InMemoryStorage::new(), Faults {
        commit_conflicts: AtomicUsize::new(10),
        ..Faults::default()
    });
    let config = LedgerConfig { commit_attempts: 2, retry_backoff_ms: 1, ..LedgerConfig::default() };
    let coordinator = TransactionCoordinator::from_config(storage.clone(), SchemaDescriptor::default(), &config).unwrap();
    let mut template = TransactionBatch::new();
    template.transfer("X", "Y", dec!(1), "");

    let err = coordinator.commit_with_retry(&template).unwrap_err();
    assert!(matches!(err, LedgerError::TransactionConflict(_)));
    assert_eq!(storage.faults.commit_conflicts.load(Ordering::SeqCst), 8);
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 0);
}

#[test]
fn test_concurrent_batches_share_new_account() {
    let storage = memory();
    let coordinator = Arc::new(coordinator(storage.clone()));
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["A", "B"]
        .into_iter()
        .map(|other| {
            let coordinator = coordinator.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let mut batch = TransactionBatch::new();
                batch.transfer("Q", other, dec!(10), "concurrent");
                barrier.wait();
                coordinator.commit_batch(&mut batch).unwrap();
                batch.account("Q").unwrap().identity()
            })
        })
        .collect();
    let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let stored = storage.find_entity_by_key(None, ACCOUNT_KIND, "Q").unwrap().unwrap();
    assert_eq!(ids, vec![Some(stored.id), Some(stored.id)]);
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 4);
}

fn concurrent_find_or_create(storage: Arc<dyn StorageBackend>, strategy: FindOrCreateStrategy) {
    let finder = Arc::new(EntityFinder::new(storage, &SchemaDescriptor::default(), strategy, 3).unwrap());
    let callers = 16;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let finder = finder.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                let (entity, created) = finder.find_or_create_account("Q").unwrap();
                (entity.identity().unwrap(), created)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
    assert!(results.iter().all(|(id, _)| *id == results[0].0));
}

#[test]
fn test_concurrent_find_or_create_creates_once() {
    concurrent_find_or_create(memory(), FindOrCreateStrategy::Auto);
}

#[test]
fn test_optimistic_fallback_creates_once() {
    let storage = TestStorage::new(InMemoryStorage::new(), Faults { no_upsert: true, ..Faults::default() });
    concurrent_find_or_create(storage.clone(), FindOrCreateStrategy::Auto);

    let strict = EntityFinder::new(storage, &SchemaDescriptor::default(), FindOrCreateStrategy::Atomic, 3).unwrap();
    assert!(matches!(
        strict.find_or_create_account("Z"),
        Err(LedgerError::Storage(StorageError::Unsupported(_)))
    ));
}

#[test]
fn test_find_or_create_is_idempotent() {
    let coordinator = coordinator(memory());
    let (first, created) = coordinator.finder().find_or_create_account("rent").unwrap();
    let (second, created_again) = coordinator.finder().find_or_create_account("rent").unwrap();
    assert!(created);
    assert!(!created_again);
    assert_eq!(first.identity(), second.identity());
}

#[test]
fn test_exhausted_race_surfaces_duplicate_key_race() {
    let storage = TestStorage::new(InMemoryStorage::new(), Faults { always_race: true, ..Faults::default() });
    let finder = EntityFinder::new(storage, &SchemaDescriptor::default(), FindOrCreateStrategy::Auto, 3).unwrap();
    match finder.find_or_create_account("Q") {
        Err(LedgerError::DuplicateKeyRace { key, attempts, .. }) => {
            assert_eq!(&*key, "Q");
            assert_eq!(attempts, 3);
        }
        other => panic!("Expected DuplicateKeyRace, got {:?}", other),
    }
}

#[test]
fn test_open_batch_is_invisible_to_readers() {
    let gate = Arc::new(Barrier::new(2));
    let storage = TestStorage::new(InMemoryStorage::new(), Faults {
        commit_gate: Some(gate.clone()),
        ..Faults::default()
    });
    let coordinator = Arc::new(coordinator(storage.clone()));

    let writer = {
        let coordinator = coordinator.clone();
        thread::spawn(move || {
            let mut batch = TransactionBatch::new();
            batch.transfer("X", "Y", dec!(3), "first");
            batch.transfer("Y", "Z", dec!(3), "second");
            coordinator.commit_batch(&mut batch).unwrap();
        })
    };

    gate.wait();
    // all pairs are written, the transaction has not committed yet
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 0);
    assert!(coordinator.finder().find(ACCOUNT_KIND, "X").unwrap().is_none());
    gate.wait();
    writer.join().unwrap();
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 4);
}

#[test]
fn test_sqlite_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let entry_id = {
        let storage = Arc::new(SqliteStorage::open(&path, SchemaDescriptor::default(), Duration::from_secs(1)).unwrap());
        let coordinator = coordinator(storage);
        let mut batch = TransactionBatch::new();
        batch.transfer("bank", "equity", dec!(10000), "Investment");
        let receipt = coordinator.commit_batch(&mut batch).unwrap();
        receipt.pairs[0].0
    };

    let storage = Arc::new(SqliteStorage::open(&path, SchemaDescriptor::default(), Duration::from_secs(1)).unwrap());
    let coordinator = coordinator(storage);
    let (entry, pair) = coordinator.repository().fetch_pair(entry_id).unwrap();
    assert_eq!(&**entry.account(), "bank");
    assert_eq!(entry.amount(), dec!(10000));
    assert_eq!(&**pair.account(), "equity");
    assert_eq!(pair.amount(), dec!(-10000));
    assert_eq!(pair.pair_id(), Some(entry_id));
    assert_eq!(&**entry.description(), "Investment");
}

#[test]
fn test_sqlite_mid_batch_failure_leaves_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let inner = SqliteStorage::open(dir.path().join("ledger.db"), SchemaDescriptor::default(), Duration::from_secs(1)).unwrap();
    let storage = TestStorage::new(inner, Faults { fail_update_at: Some(4), ..Faults::default() });
    let coordinator = coordinator(storage.clone());

    let mut batch = TransactionBatch::new();
    batch.transfer("a", "b", dec!(1), "");
    batch.transfer("b", "c", dec!(1), "");
    assert!(coordinator.commit_batch(&mut batch).is_err());
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 0);
    assert!(storage.find_entity_by_key(None, ACCOUNT_KIND, "a").unwrap().is_none());
    assert_eq!(batch.pair(1).unwrap().second().state(), PersistenceState::Stale);
}

#[test]
fn test_components_refuse_mismatched_schema() {
    let storage: Arc<dyn StorageBackend> = memory();
    let other = SchemaDescriptor::new(2, "ledger_entries", "entities").unwrap();
    let err = TransactionCoordinator::from_config(storage, other, &LedgerConfig::default()).err().unwrap();
    assert!(matches!(err, LedgerError::SchemaMismatch { expected: 2, found: 1 }));
}

#[test]
fn test_cancelled_batch_writes_nothing() {
    let storage = memory();
    let coordinator = coordinator(storage.clone());
    let mut batch = TransactionBatch::new();
    batch.transfer("X", "Y", dec!(5), "");
    batch.cancel().unwrap();
    assert!(matches!(coordinator.commit_batch(&mut batch), Err(LedgerError::BatchFinalized(_))));
    assert!(matches!(coordinator.commit_with_retry(&batch), Err(LedgerError::BatchFinalized(_))));
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 0);
}

#[test]
fn test_fixed_total_rule_from_config() {
    let config = LedgerConfig { balancing: BalancingConfig::FixedTotal(dec!(1)), ..LedgerConfig::default() };
    let coordinator = TransactionCoordinator::from_config(memory(), SchemaDescriptor::default(), &config).unwrap();

    let mut balanced = TransactionBatch::new()
        .with_pair(LedgerEntry::new("fees", dec!(101)), LedgerEntry::new("clearing", dec!(-100)));
    coordinator.commit_batch(&mut balanced).unwrap();

    let mut net_zero = TransactionBatch::new();
    net_zero.transfer("fees", "clearing", dec!(100), "");
    assert!(matches!(coordinator.commit_batch(&mut net_zero), Err(LedgerError::InvalidPair(_))));
}

fn optimistic_config() -> LedgerConfig {
    LedgerConfig { find_or_create: FindOrCreateStrategy::Optimistic, ..LedgerConfig::default() }
}

fn commit_after_lost_insert(storage: Arc<TestStorage<impl StorageBackend + 'static>>) {
    let existing = storage.insert_entity(None, &NewEntityRow::new(ACCOUNT_KIND, "Q")).unwrap();
    let coordinator = TransactionCoordinator::from_config(storage.clone(), storage.schema().clone(), &optimistic_config()).unwrap();
    storage.faults.miss_first_find.store(true, Ordering::SeqCst);

    let mut batch = TransactionBatch::new();
    batch.transfer("Q", "R", dec!(7), "after lost insert");
    let receipt = coordinator.commit_batch(&mut batch).unwrap();
    assert_eq!(receipt.created_accounts, 1);
    assert_eq!(batch.account("Q").unwrap().identity(), Some(existing.id));
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 2);
}

#[test]
fn test_optimistic_lost_insert_inside_batch_finds_winner() {
    commit_after_lost_insert(TestStorage::new(InMemoryStorage::new(), Faults::default()));
}

#[test]
fn test_postgres_optimistic_lost_insert_inside_batch_finds_winner() {
    let Ok(url) = std::env::var("PAIRLEDGER_TEST_POSTGRES") else { return };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let schema = SchemaDescriptor::new(
        1,
        &format!("ledger_{}", &suffix[..12]),
        &format!("entities_{}", &suffix[..12]),
    )
    .unwrap();
    let inner = PostgresStorage::new(&url, schema, Duration::from_secs(5)).unwrap();
    commit_after_lost_insert(TestStorage::new(inner, Faults::default()));
}

#[test]
fn test_opposite_key_orders_never_wait_on_each_other() {
    let storage = Arc::new(InMemoryStorage::with_lock_timeout(Duration::from_millis(200)));
    let coordinator = Arc::new(coordinator(storage.clone()));
    for round in 0..50 {
        let (left, right) = (format!("left-{}", round), format!("right-{}", round));
        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = [(left.clone(), right.clone()), (right, left)]
            .into_iter()
            .map(|(debit, credit)| {
                let coordinator = coordinator.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    let mut batch = TransactionBatch::new();
                    batch.transfer(&debit, &credit, dec!(1), "");
                    barrier.wait();
                    coordinator.commit_batch(&mut batch).map(|_| ())
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
    }
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 200);
}

#[test]
fn test_extreme_amounts_surface_invalid_pair() {
    let storage = memory();
    let coordinator = coordinator(storage.clone());

    let mut overflow = TransactionBatch::new()
        .with_pair(LedgerEntry::new("X", Decimal::MAX), LedgerEntry::new("Y", Decimal::MAX));
    assert!(matches!(coordinator.commit_batch(&mut overflow), Err(LedgerError::InvalidPair(_))));

    let mut same_sign = TransactionBatch::new()
        .with_pair(LedgerEntry::new("X", dec!(-5)), LedgerEntry::new("Y", dec!(-5)));
    assert!(matches!(coordinator.commit_batch(&mut same_sign), Err(LedgerError::InvalidPair(_))));

    let fixed = LedgerConfig { balancing: BalancingConfig::FixedTotal(Decimal::MAX), ..LedgerConfig::default() };
    let fixed = TransactionCoordinator::from_config(storage.clone(), SchemaDescriptor::default(), &fixed).unwrap();
    let mut past_max = TransactionBatch::new()
        .with_pair(LedgerEntry::new("X", Decimal::MAX), LedgerEntry::new("Y", dec!(1)));
    assert!(matches!(fixed.commit_batch(&mut past_max), Err(LedgerError::InvalidPair(_))));

    let mut largest_balanced = TransactionBatch::new();
    largest_balanced.transfer("X", "Y", Decimal::MAX, "");
    coordinator.commit_batch(&mut largest_balanced).unwrap();
    let (entry, pair) = coordinator.repository().fetch_pair(largest_balanced.pair(0).unwrap().first().identity().unwrap()).unwrap();
    assert_eq!(entry.amount(), Decimal::MAX);
    assert_eq!(pair.amount(), -Decimal::MAX);
    assert_eq!(storage.count_ledger_entries(None).unwrap(), 2);
}
