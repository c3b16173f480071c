use std::sync::Arc;

use pairledger_core::SchemaDescriptor;

use crate::config::{BackendKind, StorageConfig};

// Re-export core storage types and the bundled backends
pub use pairledger_core::storage::{StorageBackend, StorageError, TransactionId};
pub use pairledger_memory::InMemoryStorage;
pub use pairledger_postgres::PostgresStorage;
pub use pairledger_sqlite::SqliteStorage;

/// Opens the backend named in `config` with `schema`.
pub fn open_backend(config: &StorageConfig, schema: &SchemaDescriptor) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let storage: Arc<dyn StorageBackend> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryStorage::with_schema(schema.clone(), config.lock_timeout())),
        BackendKind::Sqlite => Arc::new(SqliteStorage::open(&config.path, schema.clone(), config.lock_timeout())?),
        BackendKind::Postgres => Arc::new(PostgresStorage::new(&config.url, schema.clone(), config.lock_timeout())?),
    };
    tracing::info!(backend = ?config.backend, schema_version = schema.version, "Storage opened");
    Ok(storage)
}
