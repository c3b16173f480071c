use std::{fmt, sync::Arc};

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::models::LedgerEntry;

/// The accounting identity a pair has to satisfy.
pub trait BalancingRule: Send + Sync + fmt::Debug {
    fn check(&self, first: &LedgerEntry, second: &LedgerEntry) -> Result<(), String>;
}

/// The two sides cancel out.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetZero;

impl BalancingRule for NetZero {
    fn check(&self, first: &LedgerEntry, second: &LedgerEntry) -> Result<(), String> {
        let sum = pair_total(first, second)?;
        if sum.is_zero() {
            Ok(())
        } else {
            Err(format!(
                "{} on '{}' and {} on '{}' sum to {}, expected 0",
                first.amount(), first.account(), second.amount(), second.account(), sum
            ))
        }
    }
}

/// The two sides sum to a fixed amount, e.g. for a clearing account.
#[derive(Debug, Clone, Copy)]
pub struct FixedTotal(pub Decimal);

impl BalancingRule for FixedTotal {
    fn check(&self, first: &LedgerEntry, second: &LedgerEntry) -> Result<(), String> {
        let sum = pair_total(first, second)?;
        if sum == self.0 {
            Ok(())
        } else {
            Err(format!("pair sums to {}, expected {}", sum, self.0))
        }
    }
}

fn pair_total(first: &LedgerEntry, second: &LedgerEntry) -> Result<Decimal, String> {
    first.amount().checked_add(second.amount()).ok_or_else(|| {
        format!(
            "{} on '{}' and {} on '{}' overflow the pair total",
            first.amount(), first.account(), second.amount(), second.account()
        )
    })
}

#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BalancingConfig {
    #[default]
    NetZero,
    FixedTotal(Decimal),
}

impl BalancingConfig {
    pub fn rule(&self) -> Arc<dyn BalancingRule> {
        match self {
            BalancingConfig::NetZero => Arc::new(NetZero),
            BalancingConfig::FixedTotal(total) => Arc::new(FixedTotal(*total)),
        }
    }
}
