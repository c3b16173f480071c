use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use rusqlite::{ffi, params, Connection, ErrorCode, OpenFlags, OptionalExtension, TransactionBehavior};
use rust_decimal::Decimal;
use uuid::Uuid;

use pairledger_core::{
    from_micros, now_micros, EntityRow, LedgerRow, LedgerRowUpdate, NewEntityRow, NewLedgerRow,
    RowId, SchemaDescriptor, StorageBackend, StorageError, TransactionId,
};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(1);

/// SQL text derived once from the schema descriptor.
struct Statements {
    insert_ledger: String,
    update_ledger: String,
    read_ledger: String,
    count_ledger: String,
    insert_entity: String,
    upsert_entity: String,
    find_entity: String,
    read_entity: String,
}

impl Statements {
    fn new(schema: &SchemaDescriptor) -> Self {
        let l = &schema.ledger_table;
        let e = &schema.entity_table;
        let ledger_cols = "id, batch_id, account_id, amount, description, pair_id, created_at";
        let entity_cols = "id, kind, key, created_at";
        Self {
            insert_ledger: format!(
                "INSERT INTO {l} (batch_id, account_id, amount, description, pair_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) RETURNING {ledger_cols}"
            ),
            update_ledger: format!("UPDATE {l} SET pair_id = ?1 WHERE id = ?2 RETURNING {ledger_cols}"),
            read_ledger: format!("SELECT {ledger_cols} FROM {l} WHERE id = ?1"),
            count_ledger: format!("SELECT COUNT(*) FROM {l}"),
            insert_entity: format!(
                "INSERT INTO {e} (kind, key, created_at) VALUES (?1, ?2, ?3) RETURNING {entity_cols}"
            ),
            upsert_entity: format!(
                "INSERT INTO {e} (kind, key, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (kind, key) DO NOTHING RETURNING {entity_cols}"
            ),
            find_entity: format!("SELECT {entity_cols} FROM {e} WHERE kind = ?1 AND key = ?2"),
            read_entity: format!("SELECT {entity_cols} FROM {e} WHERE id = ?1"),
        }
    }
}

type RawLedger = (RowId, String, RowId, String, String, Option<RowId>, i64);
type RawEntity = (RowId, String, String, i64);

fn raw_ledger(row: &rusqlite::Row) -> rusqlite::Result<RawLedger> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?))
}

fn raw_entity(row: &rusqlite::Row) -> rusqlite::Result<RawEntity> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode_ledger(raw: RawLedger) -> Result<LedgerRow, StorageError> {
    let (id, batch_id, account_id, amount, description, pair_id, created_at) = raw;
    Ok(LedgerRow {
        id,
        batch_id: Uuid::parse_str(&batch_id)
            .map_err(|e| StorageError::Other(format!("Invalid batch id: {}", e)))?,
        account_id,
        amount: Decimal::from_str(&amount)
            .map_err(|e| StorageError::Other(format!("Invalid decimal: {}", e)))?,
        description: Arc::from(description.as_str()),
        pair_id,
        created_at: from_micros(created_at)?,
    })
}

fn decode_entity(raw: RawEntity) -> Result<EntityRow, StorageError> {
    let (id, kind, key, created_at) = raw;
    Ok(EntityRow {
        id,
        kind: Arc::from(kind.as_str()),
        key: Arc::from(key.as_str()),
        created_at: from_micros(created_at)?,
    })
}

fn map_err(e: rusqlite::Error) -> StorageError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            StorageError::Conflict(e.to_string())
        }
        _ => StorageError::Other(e.to_string()),
    }
}

fn constraint_code(e: &rusqlite::Error) -> Option<i32> {
    match e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            Some(err.extended_code)
        }
        _ => None,
    }
}

pub struct SqliteStorage {
    location: PathBuf,
    flags: OpenFlags,
    schema: SchemaDescriptor,
    statements: Statements,
    busy_timeout: Duration,
    autocommit: Mutex<Connection>,
    open: Mutex<HashMap<TransactionId, Arc<Mutex<Connection>>>>,
    tx_counter: AtomicU64,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>, schema: SchemaDescriptor, busy_timeout: Duration) -> Result<Self, StorageError> {
        Self::open_with_flags(path.as_ref().to_path_buf(), OpenFlags::default(), schema, busy_timeout)
    }

    /// Private in-memory database. Every transaction gets its own connection
    /// to a shared-cache database, so contention surfaces as
    /// `StorageError::Conflict` immediately rather than after the busy timeout.
    pub fn open_in_memory(schema: SchemaDescriptor) -> Result<Self, StorageError> {
        let name = format!(
            "file:pairledger-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            MEMORY_DB_COUNTER.fetch_add(1, Ordering::SeqCst)
        );
        let flags = OpenFlags::default() | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_SHARED_CACHE;
        Self::open_with_flags(PathBuf::from(name), flags, schema, DEFAULT_BUSY_TIMEOUT)
    }

    fn open_with_flags(location: PathBuf, flags: OpenFlags, schema: SchemaDescriptor, busy_timeout: Duration) -> Result<Self, StorageError> {
        schema.validate()?;
        let conn = Self::connect(&location, flags, busy_timeout)?;
        Self::init_schema(&conn, &schema)?;
        tracing::debug!(location = %location.display(), version = schema.version, "SQLite storage opened");

        Ok(Self {
            location,
            flags,
            statements: Statements::new(&schema),
            schema,
            busy_timeout,
            autocommit: Mutex::new(conn),
            open: Mutex::new(HashMap::new()),
            tx_counter: AtomicU64::new(1),
        })
    }

    fn connect(location: &Path, flags: OpenFlags, busy_timeout: Duration) -> Result<Connection, StorageError> {
        let conn = Connection::open_with_flags(location, flags).map_err(map_err)?;
        conn.busy_timeout(busy_timeout).map_err(map_err)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(map_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection, schema: &SchemaDescriptor) -> Result<(), StorageError> {
        let l = &schema.ledger_table;
        let e = &schema.entity_table;
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(map_err)?;
        conn.execute_batch(&format!(
            "
            BEGIN IMMEDIATE;

            CREATE TABLE IF NOT EXISTS schema_meta (
                ledger_table TEXT PRIMARY KEY,
                entity_table TEXT NOT NULL,
                version INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS {e} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (kind, key)
            );

            CREATE TABLE IF NOT EXISTS {l} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT NOT NULL,
                account_id INTEGER NOT NULL REFERENCES {e}(id),
                amount TEXT NOT NULL,
                description TEXT NOT NULL,
                pair_id INTEGER REFERENCES {l}(id),
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_{l}_batch ON {l}(batch_id);

            INSERT OR IGNORE INTO schema_meta (ledger_table, entity_table, version)
                VALUES ('{l}', '{e}', {version});

            COMMIT;
            ",
            version = schema.version,
        ))
        .map_err(map_err)?;

        let (version, ledger_table, entity_table): (u32, String, String) = conn
            .query_row(
                "SELECT version, ledger_table, entity_table FROM schema_meta WHERE ledger_table = ?1",
                params![l.as_ref()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .map_err(map_err)?;
        let stored = SchemaDescriptor {
            version,
            ledger_table: Arc::from(ledger_table.as_str()),
            entity_table: Arc::from(entity_table.as_str()),
        };
        schema.ensure_matches(&stored)
    }

    /// Runs `f` on the connection owning `tx_id`, or on the autocommit
    /// connection when there is no transaction.
    fn with_conn<T>(
        &self,
        tx_id: Option<TransactionId>,
        f: impl FnOnce(&mut Connection) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        match tx_id {
            Some(tx_id) => {
                let conn = self.open.lock()
                    .get(&tx_id)
                    .cloned()
                    .ok_or(StorageError::NoActiveTransaction(tx_id))?;
                let mut conn = conn.lock();
                f(&mut *conn)
            }
            None => {
                let mut conn = self.autocommit.lock();
                f(&mut *conn)
            }
        }
    }

    fn take_transaction(&self, tx_id: TransactionId) -> Result<Arc<Mutex<Connection>>, StorageError> {
        self.open.lock()
            .remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction(tx_id))
    }

    fn unique_violation(row: &NewEntityRow) -> StorageError {
        StorageError::UniqueViolation { kind: row.kind.clone(), key: row.key.clone() }
    }

    fn find_entity_on(&self, conn: &Connection, kind: &str, key: &str) -> Result<Option<EntityRow>, StorageError> {
        let mut stmt = conn.prepare_cached(&self.statements.find_entity).map_err(map_err)?;
        stmt.query_row(params![kind, key], raw_entity)
            .optional()
            .map_err(map_err)?
            .map(decode_entity)
            .transpose()
    }

    fn upsert_entity_on(&self, conn: &Connection, row: &NewEntityRow) -> Result<(EntityRow, bool), StorageError> {
        let (_, created_at) = now_micros();
        let inserted = {
            let mut stmt = conn.prepare_cached(&self.statements.upsert_entity).map_err(map_err)?;
            stmt.query_row(params![row.kind.as_ref(), row.key.as_ref(), created_at], raw_entity)
                .optional()
                .map_err(map_err)?
        };
        match inserted {
            Some(raw) => Ok((decode_entity(raw)?, true)),
            None => {
                let existing = self.find_entity_on(conn, &row.kind, &row.key)?
                    .ok_or_else(|| StorageError::Other(format!(
                        "conflicting row for {} '{}' vanished",
                        row.kind, row.key
                    )))?;
                Ok((existing, false))
            }
        }
    }
}

impl StorageBackend for SqliteStorage {
    fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let conn = Self::connect(&self.location, self.flags, self.busy_timeout)?;
        conn.execute_batch("BEGIN IMMEDIATE").map_err(map_err)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        self.open.lock().insert(tx_id, Arc::new(Mutex::new(conn)));
        tracing::debug!(tx_id, "SQLite transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let conn = self.take_transaction(tx_id)?;
        let conn = conn.lock();
        if let Err(e) = conn.execute_batch("COMMIT") {
            // a failed COMMIT can leave the transaction open on this connection
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(tx_id, error = %rollback, "Rollback after failed COMMIT failed");
            }
            return Err(map_err(e));
        }
        tracing::debug!(tx_id, "SQLite transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let conn = self.take_transaction(tx_id)?;
        conn.lock().execute_batch("ROLLBACK").map_err(map_err)?;
        tracing::debug!(tx_id, "SQLite transaction rolled back");
        Ok(())
    }

    fn insert_ledger_entry(&self, tx_id: TransactionId, row: &NewLedgerRow) -> Result<LedgerRow, StorageError> {
        self.with_conn(Some(tx_id), |conn| {
            let (_, created_at) = now_micros();
            let mut stmt = conn.prepare_cached(&self.statements.insert_ledger).map_err(map_err)?;
            let raw = stmt
                .query_row(
                    params![
                        row.batch_id.to_string(),
                        row.account_id,
                        row.amount.to_string(),
                        row.description.as_ref(),
                        row.pair_id,
                        created_at
                    ],
                    raw_ledger,
                )
                .map_err(|e| match constraint_code(&e) {
                    Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => StorageError::NotFound {
                        table: self.schema.entity_table.clone(),
                        id: row.account_id,
                    },
                    _ => map_err(e),
                })?;
            decode_ledger(raw)
        })
    }

    fn update_ledger_entry(&self, tx_id: TransactionId, id: RowId, update: &LedgerRowUpdate) -> Result<LedgerRow, StorageError> {
        self.with_conn(Some(tx_id), |conn| {
            let mut stmt = conn.prepare_cached(&self.statements.update_ledger).map_err(map_err)?;
            let raw = stmt
                .query_row(params![update.pair_id, id], raw_ledger)
                .optional()
                .map_err(|e| match constraint_code(&e) {
                    Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => StorageError::NotFound {
                        table: self.schema.ledger_table.clone(),
                        id: update.pair_id.unwrap_or(id),
                    },
                    _ => map_err(e),
                })?
                .ok_or_else(|| StorageError::NotFound { table: self.schema.ledger_table.clone(), id })?;
            decode_ledger(raw)
        })
    }

    fn read_ledger_entry(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<LedgerRow, StorageError> {
        self.with_conn(tx_id, |conn| {
            let mut stmt = conn.prepare_cached(&self.statements.read_ledger).map_err(map_err)?;
            let raw = stmt
                .query_row(params![id], raw_ledger)
                .optional()
                .map_err(map_err)?
                .ok_or_else(|| StorageError::NotFound { table: self.schema.ledger_table.clone(), id })?;
            decode_ledger(raw)
        })
    }

    fn count_ledger_entries(&self, tx_id: Option<TransactionId>) -> Result<u64, StorageError> {
        self.with_conn(tx_id, |conn| {
            let count: i64 = conn
                .query_row(&self.statements.count_ledger, [], |row| row.get(0))
                .map_err(map_err)?;
            Ok(count as u64)
        })
    }

    fn insert_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<EntityRow, StorageError> {
        self.with_conn(tx_id, |conn| {
            let (_, created_at) = now_micros();
            let mut stmt = conn.prepare_cached(&self.statements.insert_entity).map_err(map_err)?;
            let raw = stmt
                .query_row(params![row.kind.as_ref(), row.key.as_ref(), created_at], raw_entity)
                .map_err(|e| match constraint_code(&e) {
                    Some(ffi::SQLITE_CONSTRAINT_UNIQUE) => Self::unique_violation(row),
                    _ => map_err(e),
                })?;
            decode_entity(raw)
        })
    }

    fn find_entity_by_key(&self, tx_id: Option<TransactionId>, kind: &str, key: &str) -> Result<Option<EntityRow>, StorageError> {
        self.with_conn(tx_id, |conn| self.find_entity_on(conn, kind, key))
    }

    fn read_entity(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<EntityRow, StorageError> {
        self.with_conn(tx_id, |conn| {
            let mut stmt = conn.prepare_cached(&self.statements.read_entity).map_err(map_err)?;
            let raw = stmt
                .query_row(params![id], raw_entity)
                .optional()
                .map_err(map_err)?
                .ok_or_else(|| StorageError::NotFound { table: self.schema.entity_table.clone(), id })?;
            decode_entity(raw)
        })
    }

    fn insert_or_get_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<(EntityRow, bool), StorageError> {
        match tx_id {
            // BEGIN IMMEDIATE already holds the write lock for the whole transaction
            Some(_) => self.with_conn(tx_id, |conn| self.upsert_entity_on(conn, row)),
            None => self.with_conn(None, |conn| {
                let tx = conn
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(map_err)?;
                let result = self.upsert_entity_on(&tx, row)?;
                tx.commit().map_err(map_err)?;
                Ok(result)
            }),
        }
    }
}
