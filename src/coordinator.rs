//! Commits a whole batch of entry pairs in one storage transaction.
//!
//! A batch moves `Pending -> Open -> Committed` or `Pending -> Open ->
//! RolledBack`. While open, the coordinator records every object the
//! transaction touches; on any failure it rolls the transaction back and hands
//! exactly that set to the invalidation guard before returning the error.

use std::{sync::Arc, thread, time::Duration};

use uuid::Uuid;

use pairledger_core::{RowId, SchemaDescriptor, StorageBackend, StorageError, TransactionId, ACCOUNT_KIND};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::finder::EntityFinder;
use crate::guard::{InvalidationGuard, TouchSet};
use crate::models::{BatchState, TransactionBatch};
use crate::repository::LedgerRepository;

/// Handle to a storage transaction opened by the coordinator.
#[derive(Debug)]
pub struct ActiveTransaction {
    id: TransactionId,
}

impl ActiveTransaction {
    pub(crate) fn new(id: TransactionId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }
}

/// Whole-batch retry on `TransactionConflict`. The delay grows linearly with
/// the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.backoff.checked_mul(attempt).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceipt {
    pub batch_id: Uuid,
    pub transaction_id: TransactionId,
    /// Identities of each pair's two rows, in batch order.
    pub pairs: Vec<(RowId, RowId)>,
    /// Accounts that did not exist before this batch.
    pub created_accounts: usize,
}

pub struct TransactionCoordinator {
    storage: Arc<dyn StorageBackend>,
    finder: EntityFinder,
    repository: LedgerRepository,
    guard: InvalidationGuard,
    retry: RetryPolicy,
}

impl TransactionCoordinator {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        finder: EntityFinder,
        repository: LedgerRepository,
        guard: InvalidationGuard,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            storage,
            finder,
            repository,
            guard,
            retry,
        }
    }

    /// Wires every component against one backend.
    pub fn from_config(storage: Arc<dyn StorageBackend>, schema: SchemaDescriptor, config: &LedgerConfig) -> LedgerResult<Self> {
        let finder = EntityFinder::new(
            storage.clone(),
            &schema,
            config.find_or_create,
            config.find_or_create_attempts,
        )?;
        let repository = LedgerRepository::new(storage.clone(), schema, config.balancing.rule())?;
        let guard = InvalidationGuard::new(storage.clone());
        Ok(Self::new(storage, finder, repository, guard, config.retry_policy()))
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn finder(&self) -> &EntityFinder {
        &self.finder
    }

    pub fn repository(&self) -> &LedgerRepository {
        &self.repository
    }

    pub fn guard(&self) -> &InvalidationGuard {
        &self.guard
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Persists every pair of `batch` or none of them.
    ///
    /// Pairs are checked before the transaction opens, so a batch with an
    /// invalid pair fails with `InvalidPair` and stays `Pending`. Any later
    /// failure rolls the transaction back, marks everything it touched
    /// `Stale` and leaves the batch `RolledBack`.
    pub fn commit_batch(&self, batch: &mut TransactionBatch) -> LedgerResult<BatchReceipt> {
        if batch.state() != BatchState::Pending {
            return Err(LedgerError::BatchFinalized(batch.state()));
        }
        if batch.is_empty() {
            return Err(LedgerError::InvalidPair("batch has no pairs".to_string()));
        }
        for pair in batch.pairs() {
            self.repository.validate_pair(pair.first(), pair.second())?;
        }

        let tx = ActiveTransaction::new(self.storage.begin_transaction()?);
        batch.set_state(BatchState::Open);
        tracing::debug!(tx_id = tx.id(), batch_id = %batch.id(), pairs = batch.len(), "Batch opened");

        let mut touched = TouchSet::default();
        let result = self.write_batch(&tx, batch, &mut touched).and_then(|receipt| {
            self.storage.commit_transaction(tx.id())?;
            Ok(receipt)
        });

        match result {
            Ok(receipt) => {
                batch.set_state(BatchState::Committed);
                metrics::counter!("pairledger_batches_committed_total", 1);
                tracing::info!(
                    tx_id = tx.id(),
                    batch_id = %receipt.batch_id,
                    pairs = receipt.pairs.len(),
                    created_accounts = receipt.created_accounts,
                    "Batch committed"
                );
                Ok(receipt)
            }
            Err(e) => {
                self.abort(&tx, batch, &touched, &e);
                Err(e)
            }
        }
    }

    /// Commits fresh copies of `template` until one succeeds, a
    /// non-retryable error occurs, or the retry policy is exhausted. Returns
    /// the committed copy with its receipt.
    pub fn commit_with_retry(&self, template: &TransactionBatch) -> LedgerResult<(TransactionBatch, BatchReceipt)> {
        match template.state() {
            BatchState::Pending | BatchState::RolledBack => {}
            other => return Err(LedgerError::BatchFinalized(other)),
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut batch = template.fresh_copy();
            match self.commit_batch(&mut batch) {
                Ok(receipt) => return Ok((batch, receipt)),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    metrics::counter!("pairledger_commit_retries_total", 1);
                    tracing::warn!(batch_id = %template.id(), attempt, ?delay, error = %e, "Retrying batch after conflict");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn write_batch(&self, tx: &ActiveTransaction, batch: &mut TransactionBatch, touched: &mut TouchSet) -> LedgerResult<BatchReceipt> {
        let mut created_accounts = 0;
        for key in batch.account_keys() {
            let (account, created) = self.finder.find_or_create_in(tx, ACCOUNT_KIND, &key)?;
            if created {
                created_accounts += 1;
            }
            touched.touch_account(key);
            for index in batch.attach_account(account) {
                touched.touch_pair(index);
            }
        }

        let batch_id = batch.id();
        let mut pairs = Vec::with_capacity(batch.len());
        for index in 0..batch.len() {
            touched.touch_pair(index);
            if let Some(pair) = batch.pair_mut(index) {
                let (first, second) = pair.sides_mut();
                pairs.push(self.repository.persist_pair(tx, batch_id, first, second)?);
            }
        }

        Ok(BatchReceipt {
            batch_id,
            transaction_id: tx.id(),
            pairs,
            created_accounts,
        })
    }

    fn abort(&self, tx: &ActiveTransaction, batch: &mut TransactionBatch, touched: &TouchSet, cause: &LedgerError) {
        match self.storage.rollback_transaction(tx.id()) {
            // a failed COMMIT may already have closed the transaction
            Ok(()) | Err(StorageError::NoActiveTransaction(_)) => {}
            Err(e) => tracing::error!(tx_id = tx.id(), error = %e, "Rollback failed"),
        }
        let invalidated = self.guard.invalidate(tx.id(), batch.touched_mut(touched));
        batch.set_state(BatchState::RolledBack);
        metrics::counter!("pairledger_batches_rolled_back_total", 1);
        tracing::warn!(
            tx_id = tx.id(),
            batch_id = %batch.id(),
            invalidated,
            error = %cause,
            "Batch rolled back"
        );
    }
}
