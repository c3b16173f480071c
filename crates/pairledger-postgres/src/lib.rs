use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use postgres::{error::SqlState, Client, NoTls, Row};
use rust_decimal::Decimal;
use uuid::Uuid;

use pairledger_core::{
    from_micros, now_micros, EntityRow, LedgerRow, LedgerRowUpdate, NewEntityRow, NewLedgerRow,
    RowId, SchemaDescriptor, StorageBackend, StorageError, TransactionId,
};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

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
                 VALUES ($1, $2, $3, $4, $5, $6) RETURNING {ledger_cols}"
            ),
            update_ledger: format!("UPDATE {l} SET pair_id = $1 WHERE id = $2 RETURNING {ledger_cols}"),
            read_ledger: format!("SELECT {ledger_cols} FROM {l} WHERE id = $1"),
            count_ledger: format!("SELECT COUNT(*) FROM {l}"),
            insert_entity: format!(
                "INSERT INTO {e} (kind, key, created_at) VALUES ($1, $2, $3) RETURNING {entity_cols}"
            ),
            upsert_entity: format!(
                "INSERT INTO {e} (kind, key, created_at) VALUES ($1, $2, $3)
                 ON CONFLICT (kind, key) DO NOTHING RETURNING {entity_cols}"
            ),
            find_entity: format!("SELECT {entity_cols} FROM {e} WHERE kind = $1 AND key = $2"),
            read_entity: format!("SELECT {entity_cols} FROM {e} WHERE id = $1"),
        }
    }
}

fn decode_ledger(row: &Row) -> Result<LedgerRow, StorageError> {
    let batch_id: String = row.try_get(1).map_err(map_err)?;
    let amount: String = row.try_get(3).map_err(map_err)?;
    let description: String = row.try_get(4).map_err(map_err)?;
    Ok(LedgerRow {
        id: row.try_get(0).map_err(map_err)?,
        batch_id: Uuid::parse_str(&batch_id)
            .map_err(|e| StorageError::Other(format!("Invalid batch id: {}", e)))?,
        account_id: row.try_get(2).map_err(map_err)?,
        amount: Decimal::from_str(&amount)
            .map_err(|e| StorageError::Other(format!("Invalid decimal: {}", e)))?,
        description: Arc::from(description.as_str()),
        pair_id: row.try_get(5).map_err(map_err)?,
        created_at: from_micros(row.try_get(6).map_err(map_err)?)?,
    })
}

fn decode_entity(row: &Row) -> Result<EntityRow, StorageError> {
    let kind: String = row.try_get(1).map_err(map_err)?;
    let key: String = row.try_get(2).map_err(map_err)?;
    Ok(EntityRow {
        id: row.try_get(0).map_err(map_err)?,
        kind: Arc::from(kind.as_str()),
        key: Arc::from(key.as_str()),
        created_at: from_micros(row.try_get(3).map_err(map_err)?)?,
    })
}

fn map_err(e: postgres::Error) -> StorageError {
    match e.code() {
        Some(code)
            if *code == SqlState::T_R_SERIALIZATION_FAILURE
                || *code == SqlState::T_R_DEADLOCK_DETECTED
                || *code == SqlState::LOCK_NOT_AVAILABLE
                || *code == SqlState::QUERY_CANCELED =>
        {
            StorageError::Conflict(e.to_string())
        }
        _ => StorageError::Other(e.to_string()),
    }
}

fn is_code(e: &postgres::Error, state: &SqlState) -> bool {
    e.code() == Some(state)
}

pub struct PostgresStorage {
    connection_string: String,
    schema: SchemaDescriptor,
    statements: Statements,
    lock_timeout: Duration,
    autocommit: Mutex<Client>,
    open: Mutex<HashMap<TransactionId, Arc<Mutex<Client>>>>,
    tx_counter: AtomicU64,
}

impl PostgresStorage {
    pub fn new(connection_string: &str, schema: SchemaDescriptor, lock_timeout: Duration) -> Result<Self, StorageError> {
        schema.validate()?;
        let mut client = Self::connect(connection_string, lock_timeout)?;
        Self::init_schema(&mut client, &schema)?;
        tracing::debug!(version = schema.version, "PostgreSQL storage opened");

        Ok(Self {
            connection_string: connection_string.to_string(),
            statements: Statements::new(&schema),
            schema,
            lock_timeout,
            autocommit: Mutex::new(client),
            open: Mutex::new(HashMap::new()),
            tx_counter: AtomicU64::new(1),
        })
    }

    fn connect(connection_string: &str, lock_timeout: Duration) -> Result<Client, StorageError> {
        let mut client = Client::connect(connection_string, NoTls)
            .map_err(|e| StorageError::Other(format!("PostgreSQL connection failed: {}", e)))?;
        client
            .batch_execute(&format!("SET lock_timeout = '{}ms'", lock_timeout.as_millis()))
            .map_err(map_err)?;
        Ok(client)
    }

    fn init_schema(client: &mut Client, schema: &SchemaDescriptor) -> Result<(), StorageError> {
        let l = &schema.ledger_table;
        let e = &schema.entity_table;
        client
            .batch_execute(&format!(
                "
                CREATE TABLE IF NOT EXISTS schema_meta (
                    ledger_table TEXT PRIMARY KEY,
                    entity_table TEXT NOT NULL,
                    version INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS {e} (
                    id BIGSERIAL PRIMARY KEY,
                    kind TEXT NOT NULL,
                    key TEXT NOT NULL,
                    created_at BIGINT NOT NULL,
                    UNIQUE (kind, key)
                );

                CREATE TABLE IF NOT EXISTS {l} (
                    id BIGSERIAL PRIMARY KEY,
                    batch_id TEXT NOT NULL,
                    account_id BIGINT NOT NULL REFERENCES {e}(id),
                    amount TEXT NOT NULL,
                    description TEXT NOT NULL,
                    pair_id BIGINT REFERENCES {l}(id),
                    created_at BIGINT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_{l}_batch ON {l}(batch_id);

                INSERT INTO schema_meta (ledger_table, entity_table, version)
                    VALUES ('{l}', '{e}', {version})
                    ON CONFLICT (ledger_table) DO NOTHING;
                ",
                version = schema.version,
            ))
            .map_err(map_err)?;

        let row = client
            .query_one(
                "SELECT version, ledger_table, entity_table FROM schema_meta WHERE ledger_table = $1",
                &[&l.as_ref()],
            )
            .map_err(map_err)?;
        let version: i32 = row.try_get(0).map_err(map_err)?;
        let ledger_table: String = row.try_get(1).map_err(map_err)?;
        let entity_table: String = row.try_get(2).map_err(map_err)?;
        let stored = SchemaDescriptor {
            version: version as u32,
            ledger_table: Arc::from(ledger_table.as_str()),
            entity_table: Arc::from(entity_table.as_str()),
        };
        schema.ensure_matches(&stored)
    }

    fn with_client<T>(
        &self,
        tx_id: Option<TransactionId>,
        f: impl FnOnce(&mut Client) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        match tx_id {
            Some(tx_id) => {
                let client = self.open.lock()
                    .get(&tx_id)
                    .cloned()
                    .ok_or(StorageError::NoActiveTransaction(tx_id))?;
                let mut client = client.lock();
                f(&mut *client)
            }
            None => {
                let mut client = self.autocommit.lock();
                f(&mut *client)
            }
        }
    }

    fn take_transaction(&self, tx_id: TransactionId) -> Result<Arc<Mutex<Client>>, StorageError> {
        self.open.lock()
            .remove(&tx_id)
            .ok_or(StorageError::NoActiveTransaction(tx_id))
    }

    fn find_entity_on(&self, client: &mut Client, kind: &str, key: &str) -> Result<Option<EntityRow>, StorageError> {
        client
            .query_opt(&self.statements.find_entity, &[&kind, &key])
            .map_err(map_err)?
            .as_ref()
            .map(decode_entity)
            .transpose()
    }
}

impl StorageBackend for PostgresStorage {
    fn schema(&self) -> &SchemaDescriptor {
        &self.schema
    }

    fn begin_transaction(&self) -> Result<TransactionId, StorageError> {
        let mut client = Self::connect(&self.connection_string, self.lock_timeout)?;
        client
            .batch_execute("BEGIN ISOLATION LEVEL READ COMMITTED")
            .map_err(map_err)?;
        let tx_id = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        self.open.lock().insert(tx_id, Arc::new(Mutex::new(client)));
        tracing::debug!(tx_id, "PostgreSQL transaction started");
        Ok(tx_id)
    }

    fn commit_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let client = self.take_transaction(tx_id)?;
        client.lock().batch_execute("COMMIT").map_err(map_err)?;
        tracing::debug!(tx_id, "PostgreSQL transaction committed");
        Ok(())
    }

    fn rollback_transaction(&self, tx_id: TransactionId) -> Result<(), StorageError> {
        let client = self.take_transaction(tx_id)?;
        client.lock().batch_execute("ROLLBACK").map_err(map_err)?;
        tracing::debug!(tx_id, "PostgreSQL transaction rolled back");
        Ok(())
    }

    fn insert_ledger_entry(&self, tx_id: TransactionId, row: &NewLedgerRow) -> Result<LedgerRow, StorageError> {
        self.with_client(Some(tx_id), |client| {
            let (_, created_at) = now_micros();
            let inserted = client
                .query_one(
                    &self.statements.insert_ledger,
                    &[
                        &row.batch_id.to_string(),
                        &row.account_id,
                        &row.amount.to_string(),
                        &row.description.as_ref(),
                        &row.pair_id,
                        &created_at,
                    ],
                )
                .map_err(|e| {
                    if is_code(&e, &SqlState::FOREIGN_KEY_VIOLATION) {
                        StorageError::NotFound { table: self.schema.entity_table.clone(), id: row.account_id }
                    } else {
                        map_err(e)
                    }
                })?;
            decode_ledger(&inserted)
        })
    }

    fn update_ledger_entry(&self, tx_id: TransactionId, id: RowId, update: &LedgerRowUpdate) -> Result<LedgerRow, StorageError> {
        self.with_client(Some(tx_id), |client| {
            let updated = client
                .query_opt(&self.statements.update_ledger, &[&update.pair_id, &id])
                .map_err(|e| {
                    if is_code(&e, &SqlState::FOREIGN_KEY_VIOLATION) {
                        StorageError::NotFound {
                            table: self.schema.ledger_table.clone(),
                            id: update.pair_id.unwrap_or(id),
                        }
                    } else {
                        map_err(e)
                    }
                })?
                .ok_or_else(|| StorageError::NotFound { table: self.schema.ledger_table.clone(), id })?;
            decode_ledger(&updated)
        })
    }

    fn read_ledger_entry(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<LedgerRow, StorageError> {
        self.with_client(tx_id, |client| {
            let row = client
                .query_opt(&self.statements.read_ledger, &[&id])
                .map_err(map_err)?
                .ok_or_else(|| StorageError::NotFound { table: self.schema.ledger_table.clone(), id })?;
            decode_ledger(&row)
        })
    }

    fn count_ledger_entries(&self, tx_id: Option<TransactionId>) -> Result<u64, StorageError> {
        self.with_client(tx_id, |client| {
            let row = client.query_one(&self.statements.count_ledger, &[]).map_err(map_err)?;
            let count: i64 = row.try_get(0).map_err(map_err)?;
            Ok(count as u64)
        })
    }

    /// Inside a transaction the insert runs under a savepoint, so a unique
    /// violation leaves the transaction usable for the follow-up lookup.
    fn insert_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<EntityRow, StorageError> {
        let in_transaction = tx_id.is_some();
        self.with_client(tx_id, |client| {
            if in_transaction {
                client.batch_execute("SAVEPOINT insert_entity").map_err(map_err)?;
            }
            let (_, created_at) = now_micros();
            let result = client.query_one(
                &self.statements.insert_entity,
                &[&row.kind.as_ref(), &row.key.as_ref(), &created_at],
            );
            match result {
                Ok(inserted) => {
                    if in_transaction {
                        client.batch_execute("RELEASE SAVEPOINT insert_entity").map_err(map_err)?;
                    }
                    decode_entity(&inserted)
                }
                Err(e) => {
                    if in_transaction {
                        client
                            .batch_execute("ROLLBACK TO SAVEPOINT insert_entity; RELEASE SAVEPOINT insert_entity")
                            .map_err(map_err)?;
                    }
                    if is_code(&e, &SqlState::UNIQUE_VIOLATION) {
                        Err(StorageError::UniqueViolation { kind: row.kind.clone(), key: row.key.clone() })
                    } else {
                        Err(map_err(e))
                    }
                }
            }
        })
    }

    fn find_entity_by_key(&self, tx_id: Option<TransactionId>, kind: &str, key: &str) -> Result<Option<EntityRow>, StorageError> {
        self.with_client(tx_id, |client| self.find_entity_on(client, kind, key))
    }

    fn read_entity(&self, tx_id: Option<TransactionId>, id: RowId) -> Result<EntityRow, StorageError> {
        self.with_client(tx_id, |client| {
            let row = client
                .query_opt(&self.statements.read_entity, &[&id])
                .map_err(map_err)?
                .ok_or_else(|| StorageError::NotFound { table: self.schema.entity_table.clone(), id })?;
            decode_entity(&row)
        })
    }

    /// `ON CONFLICT DO NOTHING` waits for a concurrent inserter of the same key
    /// to finish. The follow-up SELECT is a new statement, so under READ
    /// COMMITTED it sees that inserter's committed row.
    fn insert_or_get_entity(&self, tx_id: Option<TransactionId>, row: &NewEntityRow) -> Result<(EntityRow, bool), StorageError> {
        self.with_client(tx_id, |client| {
            let (_, created_at) = now_micros();
            let inserted = client
                .query_opt(
                    &self.statements.upsert_entity,
                    &[&row.kind.as_ref(), &row.key.as_ref(), &created_at],
                )
                .map_err(map_err)?;
            if let Some(inserted) = inserted {
                return Ok((decode_entity(&inserted)?, true));
            }
            let existing = self.find_entity_on(client, &row.kind, &row.key)?
                .ok_or_else(|| StorageError::Other(format!(
                    "conflicting row for {} '{}' vanished",
                    row.kind, row.key
                )))?;
            Ok((existing, false))
        })
    }
}
