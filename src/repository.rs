use std::sync::Arc;

use uuid::Uuid;

use pairledger_core::{LedgerRowUpdate, NewLedgerRow, RowId, SchemaDescriptor, StorageBackend};

use crate::balancing::BalancingRule;
use crate::coordinator::ActiveTransaction;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{LedgerEntry, PersistenceState};

/// Creates and links ledger entry rows. Never commits or rolls back; every
/// write happens inside a transaction owned by the caller.
pub struct LedgerRepository {
    storage: Arc<dyn StorageBackend>,
    schema: SchemaDescriptor,
    rule: Arc<dyn BalancingRule>,
}

impl LedgerRepository {
    pub fn new(storage: Arc<dyn StorageBackend>, schema: SchemaDescriptor, rule: Arc<dyn BalancingRule>) -> LedgerResult<Self> {
        schema.ensure_matches(storage.schema())?;
        Ok(Self { storage, schema, rule })
    }

    pub fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    pub fn rule(&self) -> &Arc<dyn BalancingRule> {
        &self.rule
    }

    /// Checks that don't need storage: state, amounts, accounts and the
    /// balancing rule.
    pub fn validate_pair(&self, first: &LedgerEntry, second: &LedgerEntry) -> LedgerResult<()> {
        for entry in [first, second] {
            if entry.state() != PersistenceState::Unpersisted {
                return Err(LedgerError::InvalidPair(format!(
                    "entry on '{}' is {:?}; only unpersisted entries can be written",
                    entry.account(),
                    entry.state()
                )));
            }
            if entry.account().trim().is_empty() {
                return Err(LedgerError::InvalidPair("entry has no account".to_string()));
            }
            if entry.amount().is_zero() {
                return Err(LedgerError::InvalidPair(format!("zero amount on '{}'", entry.account())));
            }
        }
        if first.account() == second.account() {
            return Err(LedgerError::InvalidPair(format!(
                "both sides post to '{}'",
                first.account()
            )));
        }
        self.rule.check(first, second).map_err(LedgerError::InvalidPair)
    }

    /// Writes both entries and links them to each other.
    ///
    /// Both rows are inserted before either is updated, since neither
    /// identity exists until its row does. On success both entries hold
    /// their identity and their partner's identity. On failure the caller
    /// must roll the transaction back; entries may already carry identities
    /// of rows that will vanish with it.
    pub fn persist_pair(
        &self,
        tx: &ActiveTransaction,
        batch_id: Uuid,
        first: &mut LedgerEntry,
        second: &mut LedgerEntry,
    ) -> LedgerResult<(RowId, RowId)> {
        self.validate_pair(first, second)?;
        let first_account = resolved_account(first)?;
        let second_account = resolved_account(second)?;
        let tx_id = tx.id();

        let first_row = self.storage.insert_ledger_entry(tx_id, &new_row(batch_id, first_account, first))?;
        first.record_row(&first_row);
        let second_row = self.storage.insert_ledger_entry(tx_id, &new_row(batch_id, second_account, second))?;
        second.record_row(&second_row);

        let first_row = self.storage.update_ledger_entry(
            tx_id,
            first_row.id,
            &LedgerRowUpdate { pair_id: Some(second_row.id) },
        )?;
        first.record_row(&first_row);
        let second_row = self.storage.update_ledger_entry(
            tx_id,
            second_row.id,
            &LedgerRowUpdate { pair_id: Some(first_row.id) },
        )?;
        second.record_row(&second_row);

        tracing::debug!(tx_id, %batch_id, first = first_row.id, second = second_row.id, "Pair persisted and linked");
        Ok((first_row.id, second_row.id))
    }

    /// Fresh read of a committed entry.
    pub fn fetch(&self, id: RowId) -> LedgerResult<LedgerEntry> {
        let row = self.storage.read_ledger_entry(None, id)?;
        let account = self.storage.read_entity(None, row.account_id)?;
        Ok(LedgerEntry::from_row(&row, account.key))
    }

    /// Fresh read of an entry together with its counterpart.
    pub fn fetch_pair(&self, id: RowId) -> LedgerResult<(LedgerEntry, LedgerEntry)> {
        let entry = self.fetch(id)?;
        let pair_id = entry.pair_id()
            .ok_or_else(|| LedgerError::NotFound(format!("pair of ledger entry {}", id)))?;
        let pair = self.fetch(pair_id)?;
        Ok((entry, pair))
    }
}

fn resolved_account(entry: &LedgerEntry) -> LedgerResult<RowId> {
    entry.account_id().ok_or_else(|| {
        LedgerError::InvalidPair(format!("account '{}' is not resolved", entry.account()))
    })
}

fn new_row(batch_id: Uuid, account_id: RowId, entry: &LedgerEntry) -> NewLedgerRow {
    NewLedgerRow {
        batch_id,
        account_id,
        amount: entry.amount(),
        description: entry.description().clone(),
        pair_id: None,
    }
}
