use std::sync::Arc;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use pairledger_core::{LedgerRow, RowId};

use crate::error::{LedgerError, LedgerResult};

use super::PersistenceState;

/// One side of a double-entry pair.
///
/// `account` is the account's unique key; `account_id` is filled in once the
/// coordinator has resolved that key to a stored account. `pair_id` is only
/// set after both sides of the pair have identities.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    id: Option<RowId>,
    account: Arc<str>,
    account_id: Option<RowId>,
    amount: Decimal,
    description: Arc<str>,
    pair_id: Option<RowId>,
    batch_id: Option<Uuid>,
    created_at: Option<OffsetDateTime>,
    state: PersistenceState,
}

impl LedgerEntry {
    pub fn new(account: impl Into<Arc<str>>, amount: Decimal) -> Self {
        Self {
            id: None,
            account: account.into(),
            account_id: None,
            amount,
            description: Arc::from(""),
            pair_id: None,
            batch_id: None,
            created_at: None,
            state: PersistenceState::Unpersisted,
        }
    }

    /// Positive side of a transfer.
    pub fn debit(account: impl Into<Arc<str>>, amount: Decimal) -> Self {
        Self::new(account, amount.abs())
    }

    /// Negative side of a transfer.
    pub fn credit(account: impl Into<Arc<str>>, amount: Decimal) -> Self {
        Self::new(account, -amount.abs())
    }

    pub fn with_description(mut self, description: impl Into<Arc<str>>) -> Self {
        self.description = description.into();
        self
    }

    /// Builds a persisted entry from a row read straight from storage.
    pub fn from_row(row: &LedgerRow, account: Arc<str>) -> Self {
        let mut entry = Self::new(account, row.amount).with_description(row.description.clone());
        entry.account_id = Some(row.account_id);
        entry.record_row(row);
        entry
    }

    /// A new unpersisted entry with the same account, amount and description.
    pub fn respecified(&self) -> Self {
        Self::new(self.account.clone(), self.amount).with_description(self.description.clone())
    }

    pub fn identity(&self) -> Option<RowId> {
        self.id
    }

    pub fn account(&self) -> &Arc<str> {
        &self.account
    }

    pub fn account_id(&self) -> Option<RowId> {
        self.account_id
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn description(&self) -> &Arc<str> {
        &self.description
    }

    pub fn pair_id(&self) -> Option<RowId> {
        self.pair_id
    }

    pub fn batch_id(&self) -> Option<Uuid> {
        self.batch_id
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
            PersistenceState::Stale => Err(LedgerError::StaleReference { what: "ledger entry", id: self.id }),
        }
    }

    pub(crate) fn resolve_account(&mut self, account_id: RowId) {
        self.account_id = Some(account_id);
    }

    /// Takes identity, link and timestamps from a row this entry was written
    /// to (or re-read from).
    pub(crate) fn record_row(&mut self, row: &LedgerRow) {
        self.id = Some(row.id);
        self.pair_id = row.pair_id;
        self.batch_id = Some(row.batch_id);
        self.created_at = Some(row.created_at);
        self.state = PersistenceState::Persisted;
    }

    pub(crate) fn mark_stale(&mut self) {
        self.state = PersistenceState::Stale;
    }
}
