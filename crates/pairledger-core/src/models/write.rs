use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use super::RowId;

#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerRow {
    pub batch_id: Uuid,
    pub account_id: RowId,
    pub amount: Decimal,
    pub description: Arc<str>,
    pub pair_id: Option<RowId>,
}

/// Mutable columns of a ledger row. Everything else is fixed at insert.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRowUpdate {
    pub pair_id: Option<RowId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NewEntityRow {
    pub kind: Arc<str>,
    pub key: Arc<str>,
}

impl NewEntityRow {
    pub fn new(kind: impl Into<Arc<str>>, key: impl Into<Arc<str>>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }
}
