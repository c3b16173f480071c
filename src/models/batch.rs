use std::{collections::{BTreeMap, BTreeSet}, sync::Arc};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::guard::{TouchSet, Tracked};

use super::{Entity, LedgerEntry};

/// Lifecycle of a batch. `Committed`, `RolledBack` and `Cancelled` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchState {
    Pending,
    Open,
    Committed,
    RolledBack,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPair {
    first: LedgerEntry,
    second: LedgerEntry,
}

impl EntryPair {
    pub fn new(first: LedgerEntry, second: LedgerEntry) -> Self {
        Self { first, second }
    }

    pub fn first(&self) -> &LedgerEntry {
        &self.first
    }

    pub fn second(&self) -> &LedgerEntry {
        &self.second
    }

    /// Both sides hold identities and point at each other.
    pub fn is_linked(&self) -> bool {
        match (self.first.identity(), self.second.identity()) {
            (Some(a), Some(b)) => self.first.pair_id() == Some(b) && self.second.pair_id() == Some(a),
            _ => false,
        }
    }

    pub(crate) fn sides_mut(&mut self) -> (&mut LedgerEntry, &mut LedgerEntry) {
        (&mut self.first, &mut self.second)
    }
}

/// An ordered set of entry pairs that is committed all together or not at all.
#[derive(Debug, Clone)]
pub struct TransactionBatch {
    id: Uuid,
    pairs: Vec<EntryPair>,
    accounts: BTreeMap<Arc<str>, Entity>,
    state: BatchState,
}

impl Default for TransactionBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionBatch {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            pairs: Vec::new(),
            accounts: BTreeMap::new(),
            state: BatchState::Pending,
        }
    }

    pub fn push_pair(&mut self, first: LedgerEntry, second: LedgerEntry) -> &mut Self {
        self.pairs.push(EntryPair::new(first, second));
        self
    }

    pub fn with_pair(mut self, first: LedgerEntry, second: LedgerEntry) -> Self {
        self.push_pair(first, second);
        self
    }

    /// Debits `debit_account` and credits `credit_account` by `amount`.
    pub fn transfer(&mut self, debit_account: &str, credit_account: &str, amount: Decimal, description: &str) -> &mut Self {
        self.push_pair(
            LedgerEntry::debit(debit_account, amount).with_description(description),
            LedgerEntry::credit(credit_account, amount).with_description(description),
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[EntryPair] {
        &self.pairs
    }

    pub fn pair(&self, index: usize) -> Option<&EntryPair> {
        self.pairs.get(index)
    }

    /// The stored account a key resolved to during the last commit attempt.
    pub fn account(&self, key: &str) -> Option<&Entity> {
        self.accounts.get(key)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Entity> {
        self.accounts.values()
    }

    /// Abandons a batch that has not been committed. Nothing was written, so
    /// there is nothing to undo.
    pub fn cancel(&mut self) -> LedgerResult<()> {
        if self.state != BatchState::Pending {
            return Err(LedgerError::BatchFinalized(self.state));
        }
        self.state = BatchState::Cancelled;
        Ok(())
    }

    /// A pending batch with the same id and pair specifications and none of
    /// the persistence state, for retrying a failed commit.
    pub fn fresh_copy(&self) -> Self {
        Self {
            id: self.id,
            pairs: self.pairs
                .iter()
                .map(|p| EntryPair::new(p.first.respecified(), p.second.respecified()))
                .collect(),
            accounts: BTreeMap::new(),
            state: BatchState::Pending,
        }
    }

    /// Distinct account keys in sorted order. Every batch resolves (and so
    /// locks) its accounts in this one global order.
    pub(crate) fn account_keys(&self) -> Vec<Arc<str>> {
        let keys: BTreeSet<Arc<str>> = self.pairs
            .iter()
            .flat_map(|pair| [pair.first.account().clone(), pair.second.account().clone()])
            .collect();
        keys.into_iter().collect()
    }

    pub(crate) fn set_state(&mut self, state: BatchState) {
        self.state = state;
    }

    pub(crate) fn pair_mut(&mut self, index: usize) -> Option<&mut EntryPair> {
        self.pairs.get_mut(index)
    }

    /// Records a resolved account and points every entry on it at its
    /// identity. Returns the indices of the pairs that changed.
    pub(crate) fn attach_account(&mut self, entity: Entity) -> Vec<usize> {
        let mut changed = Vec::new();
        if let Some(account_id) = entity.identity() {
            for (index, pair) in self.pairs.iter_mut().enumerate() {
                let (first, second) = pair.sides_mut();
                let mut hit = false;
                for entry in [first, second] {
                    if entry.account() == entity.key() {
                        entry.resolve_account(account_id);
                        hit = true;
                    }
                }
                if hit {
                    changed.push(index);
                }
            }
        }
        self.accounts.insert(entity.key().clone(), entity);
        changed
    }

    /// Mutable views of every object a transaction touched.
    pub(crate) fn touched_mut(&mut self, touched: &TouchSet) -> Vec<&mut dyn Tracked> {
        let mut objects: Vec<&mut dyn Tracked> = Vec::new();
        for (index, pair) in self.pairs.iter_mut().enumerate() {
            if touched.has_pair(index) {
                let (first, second) = pair.sides_mut();
                objects.push(first);
                objects.push(second);
            }
        }
        for (key, entity) in self.accounts.iter_mut() {
            if touched.has_account(key) {
                objects.push(entity);
            }
        }
        objects
    }
}
