use std::sync::Arc;

use serde::Deserialize;

use crate::storage::StorageError;

/// Explicit description of the tables a backend is opened with.
///
/// Backends create (or validate) their tables from this descriptor and record
/// `version` alongside them. The engine components receive the same descriptor
/// at construction and refuse to run against a backend opened with a different
/// one, so there is never an implicit, process-wide notion of "the schema".
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchemaDescriptor {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_ledger_table")]
    pub ledger_table: Arc<str>,
    #[serde(default = "default_entity_table")]
    pub entity_table: Arc<str>,
}

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

fn default_version() -> u32 {
    CURRENT_SCHEMA_VERSION
}

fn default_ledger_table() -> Arc<str> {
    Arc::from("ledger_entries")
}

fn default_entity_table() -> Arc<str> {
    Arc::from("entities")
}

impl Default for SchemaDescriptor {
    fn default() -> Self {
        Self {
            version: default_version(),
            ledger_table: default_ledger_table(),
            entity_table: default_entity_table(),
        }
    }
}

impl SchemaDescriptor {
    pub fn new(version: u32, ledger_table: &str, entity_table: &str) -> Result<Self, StorageError> {
        let descriptor = Self {
            version,
            ledger_table: Arc::from(ledger_table),
            entity_table: Arc::from(entity_table),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Table names end up interpolated into SQL, so only plain identifiers pass.
    pub fn validate(&self) -> Result<(), StorageError> {
        for name in [&self.ledger_table, &self.entity_table] {
            if !is_identifier(name) {
                return Err(StorageError::InvalidSchema(format!(
                    "table name '{}' is not a plain identifier",
                    name
                )));
            }
        }
        if self.ledger_table == self.entity_table {
            return Err(StorageError::InvalidSchema(
                "ledger and entity tables must differ".to_string(),
            ));
        }
        if self.version == 0 {
            return Err(StorageError::InvalidSchema("schema version must be positive".to_string()));
        }
        Ok(())
    }

    /// Fails when `other` (typically what the backend was opened with) differs.
    pub fn ensure_matches(&self, other: &SchemaDescriptor) -> Result<(), StorageError> {
        if self == other {
            return Ok(());
        }
        Err(StorageError::SchemaMismatch {
            expected: self.version,
            found: other.version,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
