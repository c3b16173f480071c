use time::OffsetDateTime;

use crate::storage::StorageError;

pub mod read;
pub mod write;

/// Identity assigned by the store on first insert.
pub type RowId = i64;

/// Entity kind used for ledger accounts.
pub const ACCOUNT_KIND: &str = "account";

/// Current time truncated to the microsecond precision SQL backends keep.
pub fn now_micros() -> (OffsetDateTime, i64) {
    let micros = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64;
    // the value came from a valid timestamp, so converting back cannot fail
    let at = OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    (at, micros)
}

pub fn from_micros(micros: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .map_err(|e| StorageError::Other(format!("invalid timestamp {}: {}", micros, e)))
}
