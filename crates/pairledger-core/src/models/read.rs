use std::sync::Arc;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{write::{LedgerRowUpdate, NewLedgerRow}, RowId};

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub id: RowId,
    pub batch_id: Uuid,
    pub account_id: RowId,
    pub amount: Decimal,
    pub description: Arc<str>,
    pub pair_id: Option<RowId>,
    pub created_at: OffsetDateTime,
}

impl LedgerRow {
    pub fn from_new(id: RowId, row: &NewLedgerRow, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            batch_id: row.batch_id,
            account_id: row.account_id,
            amount: row.amount,
            description: row.description.clone(),
            pair_id: row.pair_id,
            created_at,
        }
    }

    pub fn apply(&mut self, update: &LedgerRowUpdate) {
        self.pair_id = update.pair_id;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRow {
    pub id: RowId,
    pub kind: Arc<str>,
    pub key: Arc<str>,
    pub created_at: OffsetDateTime,
}
