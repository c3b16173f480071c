//! Idempotent lookup-or-creation of uniquely keyed entities.
//!
//! Concurrent callers asking for the same `(kind, key)` all end up with the
//! same stored row, and exactly one row is created. The guarantee comes from
//! the backend: either an atomic insert-or-get primitive, or a unique
//! constraint that makes the losing inserter fail and look the winner up.

use std::sync::Arc;

use serde::Deserialize;

use pairledger_core::{NewEntityRow, SchemaDescriptor, StorageBackend, StorageError, TransactionId, ACCOUNT_KIND};

use crate::coordinator::ActiveTransaction;
use crate::error::{LedgerError, LedgerResult};
use crate::models::Entity;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindOrCreateStrategy {
    /// Atomic insert-or-get when the backend has one, optimistic otherwise.
    #[default]
    Auto,
    /// Atomic insert-or-get only; backends without it report `Unsupported`.
    Atomic,
    /// Look up, insert, and on a unique violation look up again.
    Optimistic,
}

pub struct EntityFinder {
    storage: Arc<dyn StorageBackend>,
    strategy: FindOrCreateStrategy,
    max_attempts: u32,
}

impl EntityFinder {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        schema: &SchemaDescriptor,
        strategy: FindOrCreateStrategy,
        max_attempts: u32,
    ) -> LedgerResult<Self> {
        schema.ensure_matches(storage.schema())?;
        Ok(Self {
            storage,
            strategy,
            max_attempts: max_attempts.max(1),
        })
    }

    pub fn strategy(&self) -> FindOrCreateStrategy {
        self.strategy
    }

    /// Finds or creates in autocommit mode; a created row is committed on
    /// return. The flag is `true` only when this call created the row.
    pub fn find_or_create(&self, kind: &str, key: &str) -> LedgerResult<(Entity, bool)> {
        self.resolve(None, kind, key)
    }

    /// Finds or creates inside `tx`. A created row becomes visible to others
    /// only when `tx` commits and disappears if it rolls back.
    pub fn find_or_create_in(&self, tx: &ActiveTransaction, kind: &str, key: &str) -> LedgerResult<(Entity, bool)> {
        self.resolve(Some(tx.id()), kind, key)
    }

    pub fn find_or_create_account(&self, key: &str) -> LedgerResult<(Entity, bool)> {
        self.find_or_create(ACCOUNT_KIND, key)
    }

    /// Looks an entity up without creating it.
    pub fn find(&self, kind: &str, key: &str) -> LedgerResult<Option<Entity>> {
        let row = self.storage.find_entity_by_key(None, kind, key)?;
        Ok(row.as_ref().map(Entity::from_row))
    }

    fn resolve(&self, tx_id: Option<TransactionId>, kind: &str, key: &str) -> LedgerResult<(Entity, bool)> {
        if kind.trim().is_empty() {
            return Err(LedgerError::InvalidKey("entity kind is empty".to_string()));
        }
        if key.trim().is_empty() {
            return Err(LedgerError::InvalidKey(format!("{} key is empty", kind)));
        }
        let row = NewEntityRow::new(kind, key);
        match self.strategy {
            FindOrCreateStrategy::Atomic => self.atomic(tx_id, &row),
            FindOrCreateStrategy::Optimistic => self.optimistic(tx_id, &row),
            FindOrCreateStrategy::Auto => match self.atomic(tx_id, &row) {
                Err(LedgerError::Storage(StorageError::Unsupported(_))) => self.optimistic(tx_id, &row),
                other => other,
            },
        }
    }

    fn atomic(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> LedgerResult<(Entity, bool)> {
        let (stored, created) = self.storage.insert_or_get_entity(tx_id, row)?;
        tracing::debug!(?tx_id, kind = %row.kind, key = %row.key, id = stored.id, created, "Resolved entity");
        Ok((Entity::from_row(&stored), created))
    }

    fn optimistic(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> LedgerResult<(Entity, bool)> {
        for attempt in 1..=self.max_attempts {
            if let Some(existing) = self.storage.find_entity_by_key(tx_id, &row.kind, &row.key)? {
                return Ok((Entity::from_row(&existing), false));
            }
            match self.storage.insert_entity(tx_id, row) {
                Ok(created) => {
                    tracing::debug!(?tx_id, kind = %row.kind, key = %row.key, id = created.id, "Created entity");
                    return Ok((Entity::from_row(&created), true));
                }
                Err(StorageError::UniqueViolation { .. }) => {
                    metrics::counter!("pairledger_find_or_create_retries_total", 1);
                    tracing::debug!(?tx_id, kind = %row.kind, key = %row.key, attempt, "Lost insert race, looking up again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::warn!(kind = %row.kind, key = %row.key, attempts = self.max_attempts, "Find-or-create gave up");
        Err(LedgerError::DuplicateKeyRace {
            kind: row.kind.clone(),
            key: row.key.clone(),
            attempts: self.max_attempts,
        })
    }
}
