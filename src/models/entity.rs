use std::sync::Arc;

use time::OffsetDateTime;

use pairledger_core::{EntityRow, RowId, ACCOUNT_KIND};

use crate::error::{LedgerError, LedgerResult};

use super::PersistenceState;

/// A uniquely keyed domain object, resolved through the finder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    id: Option<RowId>,
    kind: Arc<str>,
    key: Arc<str>,
    created_at: Option<OffsetDateTime>,
    state: PersistenceState,
}

impl Entity {
    pub fn new(kind: impl Into<Arc<str>>, key: impl Into<Arc<str>>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            key: key.into(),
            created_at: None,
            state: PersistenceState::Unpersisted,
        }
    }

    pub fn account(key: impl Into<Arc<str>>) -> Self {
        Self::new(ACCOUNT_KIND, key)
    }

    pub fn from_row(row: &EntityRow) -> Self {
        let mut entity = Self::new(row.kind.clone(), row.key.clone());
        entity.record_row(row);
        entity
    }

    /// The cached identity, whatever the state. Use `is_persisted` before
    /// trusting it.
    pub fn identity(&self) -> Option<RowId> {
        self.id
    }

    pub fn kind(&self) -> &Arc<str> {
        &self.kind
    }

    pub fn key(&self) -> &Arc<str> {
        &self.key
    }

    pub fn created_at(&self) -> Option<OffsetDateTime> {
        self.created_at
    }

    pub fn state(&self) -> PersistenceState {
        self.state
    }

    pub fn is_persisted(&self) -> LedgerResult<bool> {
        match self.state {
            PersistenceState::Unpersisted => Ok(false),
            PersistenceState::Persisted => Ok(true),
            PersistenceState::Stale => Err(LedgerError::StaleReference { what: "entity", id: self.id }),
        }
    }

    pub(crate) fn record_row(&mut self, row: &EntityRow) {
        self.id = Some(row.id);
        self.created_at = Some(row.created_at);
        self.state = PersistenceState::Persisted;
    }

    pub(crate) fn mark_stale(&mut self) {
        self.state = PersistenceState::Stale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: RowId) -> EntityRow {
        EntityRow {
            id,
            kind: Arc::from(ACCOUNT_KIND),
            key: Arc::from("bank"),
            created_at: OffsetDateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_persistence_query_follows_state() {
        let mut entity = Entity::account("bank");
        assert!(!entity.is_persisted().unwrap());

        entity.record_row(&row(3));
        assert!(entity.is_persisted().unwrap());
        assert_eq!(entity.identity(), Some(3));

        entity.mark_stale();
        assert!(matches!(
            entity.is_persisted(),
            Err(LedgerError::StaleReference { what: "entity", id: Some(3) })
        ));
        // the stale identity is still visible, just not trusted
        assert_eq!(entity.identity(), Some(3));
    }
}
