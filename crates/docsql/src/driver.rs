//! The document driver
//!
//! [`DocumentDriver`] composes a [`Backend`] (connection factory, version
//! policy and SQL dialect) with a configuration. Construction runs
//! connect, then version check, and yields a ready driver or an error; a
//! partially initialized driver is never returned.
//!
//! ```text
//! Unconnected -> Connecting -> VersionChecking -> Ready
//!      \______________\______________\______________\___> Failed
//! ```
//!
//! Only `Ready` accepts document operations. A connection failure during an
//! operation moves the driver to `Failed`; it is not reconnected and must be
//! rebuilt. `close()` moves it back to `Unconnected`.

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StorageConfig;
use crate::connection::{Connection, ConnectionFactory, DatabaseType};
use crate::dialect::{dialect_for, Predicate, SqlDialect};
use crate::document::{ensure_id, id_to_string, Document, ID_FIELD};
use crate::error::{Error, Result};
use crate::mapper::{DocumentMapper, FindOptions, UpdateSpec};
use crate::types::Value;
use crate::version::{ServerVersion, VersionPolicy};

/// Everything that varies per SQL engine
#[derive(Clone)]
pub struct Backend {
    /// Driver name (`mysql`, `sqlite`)
    pub name: &'static str,
    /// Opens connections
    pub factory: Arc<dyn ConnectionFactory>,
    /// Accepts or rejects server versions
    pub versions: Arc<dyn VersionPolicy>,
    /// Generates SQL
    pub dialect: Arc<dyn SqlDialect>,
}

impl Backend {
    /// Assemble a backend from its parts
    pub fn new(
        name: &'static str,
        factory: Arc<dyn ConnectionFactory>,
        versions: Arc<dyn VersionPolicy>,
        dialect: Arc<dyn SqlDialect>,
    ) -> Self {
        Self {
            name,
            factory,
            versions,
            dialect,
        }
    }

    /// Backend for a driver name (`mysql`/`mariadb`, `sqlite`)
    pub fn for_driver(name: &str) -> Result<Self> {
        let dialect: Arc<dyn SqlDialect> = dialect_for(name)
            .map(Arc::from)
            .ok_or_else(|| Error::config(format!("unsupported driver '{}'", name)))?;

        match dialect.database_type() {
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => Ok(Self::new(
                "mysql",
                Arc::new(crate::mysql::MySqlConnectionFactory::new()),
                Arc::new(crate::version::MySqlVersionPolicy::default()),
                dialect,
            )),
            #[cfg(feature = "sqlite")]
            DatabaseType::SQLite => Ok(Self::new(
                "sqlite",
                Arc::new(crate::sqlite::SqliteConnectionFactory::new()),
                Arc::new(crate::version::SqliteVersionPolicy::default()),
                dialect,
            )),
            #[allow(unreachable_patterns)]
            other => Err(Error::config(format!(
                "driver '{}' ({}) is not compiled in",
                name, other
            ))),
        }
    }

    /// Backend named by a configuration
    pub fn for_config(config: &StorageConfig) -> Result<Self> {
        Self::for_driver(&config.options.driver)
    }

    /// Replace the connection factory
    pub fn with_factory(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Replace the version policy
    pub fn with_version_policy(mut self, versions: Arc<dyn VersionPolicy>) -> Self {
        self.versions = versions;
        self
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("database_type", &self.factory.database_type())
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

/// Driver lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DriverState {
    /// No connection
    Unconnected = 0,
    /// Opening the connection
    Connecting = 1,
    /// Checking the server version
    VersionChecking = 2,
    /// Accepting operations
    Ready = 3,
    /// Connection or version check failed
    Failed = 4,
}

impl DriverState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unconnected,
            1 => Self::Connecting,
            2 => Self::VersionChecking,
            3 => Self::Ready,
            _ => Self::Failed,
        }
    }

    /// Whether operations are accepted
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unconnected => write!(f, "unconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::VersionChecking => write!(f, "version_checking"),
            Self::Ready => write!(f, "ready"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

struct StateCell {
    state: AtomicU8,
    driver: &'static str,
}

impl StateCell {
    fn new(driver: &'static str) -> Self {
        Self {
            state: AtomicU8::new(DriverState::Unconnected as u8),
            driver,
        }
    }

    fn get(&self) -> DriverState {
        DriverState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, next: DriverState) {
        let prev = DriverState::from_u8(self.state.swap(next as u8, Ordering::AcqRel));
        if prev != next {
            debug!(driver = self.driver, from = %prev, to = %next, "Driver state transition");
        }
    }
}

fn conflict_with_id(err: Error, collection: &str, id: &str) -> Error {
    match err {
        Error::Conflict { .. } => Error::conflict(collection, id),
        other => other,
    }
}

fn id_filter(id: JsonValue) -> JsonValue {
    let mut filter = serde_json::Map::new();
    filter.insert(ID_FIELD.to_string(), id);
    JsonValue::Object(filter)
}

/// Document-store operations over one SQL connection
pub struct DocumentDriver {
    backend: Backend,
    config: StorageConfig,
    mapper: DocumentMapper,
    connection: Box<dyn Connection>,
    version: ServerVersion,
    state: StateCell,
    ensured: Mutex<HashSet<String>>,
}

impl fmt::Debug for DocumentDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentDriver")
            .field("backend", &self.backend)
            .field("version", &self.version)
            .field("state", &self.state.get())
            .finish()
    }
}

impl DocumentDriver {
    /// Connect using the backend named by the configuration
    pub async fn connect(config: StorageConfig) -> Result<Self> {
        let backend = Backend::for_config(&config)?;
        Self::connect_with(backend, config).await
    }

    /// Connect with an explicit backend
    pub async fn connect_with(backend: Backend, config: StorageConfig) -> Result<Self> {
        config.options.check()?;

        let state = StateCell::new(backend.name);
        state.set(DriverState::Connecting);

        let connection = match backend
            .factory
            .connect(&config.options, &config.driver_options)
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                state.set(DriverState::Failed);
                warn!(driver = backend.name, error = %e, "Failed to connect");
                return Err(e);
            }
        };

        state.set(DriverState::VersionChecking);
        let version = match connection.server_version().await {
            Ok(raw) => backend.versions.check(&raw),
            Err(e) => Err(e),
        };
        let version = match version {
            Ok(v) => v,
            Err(e) => {
                state.set(DriverState::Failed);
                warn!(driver = backend.name, error = %e, "Server version check failed");
                if let Err(close_err) = connection.close().await {
                    debug!(error = %close_err, "Failed to close rejected connection");
                }
                return Err(e);
            }
        };

        state.set(DriverState::Ready);
        info!(driver = backend.name, server = %version, "Document driver ready");

        Ok(Self {
            mapper: DocumentMapper::new(Arc::clone(&backend.dialect)),
            backend,
            config,
            connection,
            version,
            state,
            ensured: Mutex::new(HashSet::new()),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> DriverState {
        self.state.get()
    }

    /// Version reported by the server at connect time
    pub fn server_version(&self) -> &ServerVersion {
        &self.version
    }

    /// Backend in use
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Configuration the driver was built from
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Statement generator
    pub fn mapper(&self) -> &DocumentMapper {
        &self.mapper
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state.get() {
            DriverState::Ready => Ok(()),
            state => Err(Error::not_ready(state)),
        }
    }

    /// Record the effect of an operation's outcome on the driver state
    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.category().is_fatal_to_driver() {
                warn!(driver = self.backend.name, error = %e, "Connection lost");
                self.state.set(DriverState::Failed);
            }
        }
        result
    }

    async fn execute(&self, stmt: &Predicate) -> Result<u64> {
        self.connection.execute(&stmt.sql, &stmt.params).await
    }

    async fn ensure_collection(&self, collection: &str, table: &str) -> Result<()> {
        let known = self.ensured.lock().contains(table);
        if known {
            return Ok(());
        }

        for ddl in self.mapper.create_collection_sql(table) {
            self.connection.execute(&ddl, &[]).await?;
        }
        debug!(collection, table, "Ensured collection table");

        for field in self.config.options.indexed_fields(collection) {
            if let Err(e) = self.promote_field(table, field).await {
                if e.category().is_fatal_to_driver() {
                    return Err(e);
                }
                warn!(collection, field = %field, error = %e, "Skipping index promotion");
            }
        }

        self.ensured.lock().insert(table.to_string());
        Ok(())
    }

    async fn promote_field(&self, table: &str, field: &str) -> Result<()> {
        let (column, ddl) = self.mapper.promote_field_sql(table, field)?;

        if let Some(check) = self.mapper.dialect().column_exists_sql(table, &column) {
            if !self.connection.query(&check.sql, &check.params).await?.is_empty() {
                return Ok(());
            }
        }

        for stmt in ddl {
            self.connection.execute(&stmt, &[]).await?;
        }
        debug!(table, field, "Promoted document field");
        Ok(())
    }

    /// Insert a document; assigns `_id` when missing and returns the stored document.
    pub async fn insert(&self, collection: &str, doc: Document) -> Result<Document> {
        self.ensure_ready()?;
        let result = self.insert_one(collection, doc).await;
        self.track(result)
    }

    async fn insert_one(&self, collection: &str, mut doc: Document) -> Result<Document> {
        let table = self.mapper.table_name(collection)?;
        let id = ensure_id(&mut doc)?;
        let stmt = self.mapper.insert(&table, &doc)?;

        self.ensure_collection(collection, &table).await?;
        self.execute(&stmt)
            .await
            .map_err(|e| conflict_with_id(e, collection, &id))?;

        debug!(collection, id = %id, "Inserted document");
        Ok(doc)
    }

    /// Insert several documents atomically
    pub async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> Result<Vec<Document>> {
        self.ensure_ready()?;
        let result = self.insert_batch(collection, docs).await;
        self.track(result)
    }

    async fn insert_batch(&self, collection: &str, docs: Vec<Document>) -> Result<Vec<Document>> {
        let table = self.mapper.table_name(collection)?;

        let mut seen = HashSet::with_capacity(docs.len());
        let mut stored = Vec::with_capacity(docs.len());
        let mut stmts = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = ensure_id(&mut doc)?;
            if !seen.insert(id.clone()) {
                return Err(Error::conflict(collection, id));
            }
            stmts.push(self.mapper.insert(&table, &doc)?);
            stored.push(doc);
        }
        if stored.is_empty() {
            return Ok(stored);
        }

        self.ensure_collection(collection, &table).await?;

        let batch: Vec<(&str, &[Value])> = stmts
            .iter()
            .map(|s| (s.sql.as_str(), s.params.as_slice()))
            .collect();
        if let Err(err) = self.connection.execute_batch(&batch).await {
            return Err(match err {
                Error::Conflict { id, .. } if id.is_empty() => {
                    let id = self.stored_duplicate(&table, &stored).await;
                    Error::conflict(collection, id.unwrap_or_default())
                }
                other => other.with_conflict_collection(collection),
            });
        }

        debug!(collection, count = stored.len(), "Inserted documents");
        Ok(stored)
    }

    /// The first `_id` of `docs` that is already stored. Used when the
    /// engine reports a unique violation without naming the value.
    async fn stored_duplicate(&self, table: &str, docs: &[Document]) -> Option<String> {
        let ids: Vec<JsonValue> = docs.iter().filter_map(|d| d.get(ID_FIELD).cloned()).collect();
        let filter = id_filter(serde_json::json!({ "$in": ids }));
        let lookup = self
            .mapper
            .find(table, &FindOptions::new().filter(filter).limit(1))
            .ok()?;
        let rows = self.connection.query(&lookup.sql, &lookup.params).await.ok()?;
        let (_, doc) = self.mapper.decode_row(rows.first()?).ok()?;
        doc.get(ID_FIELD).and_then(|id| id_to_string(id).ok())
    }

    /// Insert, or replace the document with the same `_id`
    pub async fn save(&self, collection: &str, doc: Document) -> Result<Document> {
        self.ensure_ready()?;
        let result = self.save_one(collection, doc).await;
        self.track(result)
    }

    async fn save_one(&self, collection: &str, doc: Document) -> Result<Document> {
        let id_value = match doc.get(ID_FIELD) {
            None | Some(JsonValue::Null) => return self.insert_one(collection, doc).await,
            Some(id) => id.clone(),
        };
        let id = id_to_string(&id_value)?;
        let table = self.mapper.table_name(collection)?;
        self.ensure_collection(collection, &table).await?;

        let lookup = self
            .mapper
            .find(&table, &FindOptions::new().filter(id_filter(id_value)).limit(1))?;
        let rows = self.connection.query(&lookup.sql, &lookup.params).await?;

        match rows.first() {
            Some(row) => {
                let (row_id, _) = self.mapper.decode_row(row)?;
                let stmt = self.mapper.replace_row(&table, row_id, &doc)?;
                self.execute(&stmt).await?;
                debug!(collection, id = %id, "Replaced document");
                Ok(doc)
            }
            None => self.insert_one(collection, doc).await,
        }
    }

    /// Find documents
    pub async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Document>> {
        self.ensure_ready()?;
        let result = self.find_many(collection, options).await;
        self.track(result)
    }

    async fn find_many(&self, collection: &str, options: &FindOptions) -> Result<Vec<Document>> {
        let table = self.mapper.table_name(collection)?;
        let compiled = self.mapper.find(&table, options)?;

        let rows = match self.connection.query(&compiled.sql, &compiled.params).await {
            Err(Error::TableNotFound { .. }) => return Ok(Vec::new()),
            other => other?,
        };

        rows.iter()
            .map(|row| {
                self.mapper
                    .decode_row(row)
                    .map(|(_, doc)| compiled.projection.apply(doc))
            })
            .collect()
    }

    /// First document matching a filter, in insertion order
    pub async fn find_one(&self, collection: &str, filter: &JsonValue) -> Result<Option<Document>> {
        let docs = self
            .find(collection, &FindOptions::new().filter(filter.clone()).limit(1))
            .await?;
        Ok(docs.into_iter().next())
    }

    /// Document with the given `_id`
    pub async fn find_by_id(
        &self,
        collection: &str,
        id: impl Into<JsonValue>,
    ) -> Result<Option<Document>> {
        self.find_one(collection, &id_filter(id.into())).await
    }

    /// Number of documents matching a filter
    pub async fn count(&self, collection: &str, filter: &JsonValue) -> Result<u64> {
        self.ensure_ready()?;
        let result = self.count_matching(collection, filter).await;
        self.track(result)
    }

    async fn count_matching(&self, collection: &str, filter: &JsonValue) -> Result<u64> {
        let table = self.mapper.table_name(collection)?;
        let stmt = self.mapper.count(&table, filter)?;

        let row = match self.connection.query_one(&stmt.sql, &stmt.params).await {
            Err(Error::TableNotFound { .. }) => return Ok(0),
            other => other?,
        };

        let total = row
            .as_ref()
            .and_then(|r| r.get(0))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(total).unwrap_or(0))
    }

    /// Update matching documents; returns how many changed
    pub async fn update(
        &self,
        collection: &str,
        filter: &JsonValue,
        spec: UpdateSpec,
    ) -> Result<u64> {
        self.ensure_ready()?;
        let result = self.update_matching(collection, filter, &spec).await;
        self.track(result)
    }

    async fn update_matching(
        &self,
        collection: &str,
        filter: &JsonValue,
        spec: &UpdateSpec,
    ) -> Result<u64> {
        spec.validate()?;
        let table = self.mapper.table_name(collection)?;
        let compiled = self
            .mapper
            .find(&table, &FindOptions::new().filter(filter.clone()))?;

        let rows = match self.connection.query(&compiled.sql, &compiled.params).await {
            Err(Error::TableNotFound { .. }) => return Ok(0),
            other => other?,
        };

        let mut stmts = Vec::new();
        for row in &rows {
            let (row_id, current) = self.mapper.decode_row(row)?;
            let updated = spec.apply(&current)?;
            if updated != current {
                stmts.push(self.mapper.replace_row(&table, row_id, &updated)?);
            }
        }
        if stmts.is_empty() {
            return Ok(0);
        }

        let batch: Vec<(&str, &[Value])> = stmts
            .iter()
            .map(|s| (s.sql.as_str(), s.params.as_slice()))
            .collect();
        self.connection
            .execute_batch(&batch)
            .await
            .map_err(|e| e.with_conflict_collection(collection))?;

        debug!(collection, matched = rows.len(), modified = stmts.len(), "Updated documents");
        Ok(stmts.len() as u64)
    }

    /// Delete matching documents; returns how many were removed
    pub async fn delete(&self, collection: &str, filter: &JsonValue) -> Result<u64> {
        self.ensure_ready()?;
        let result = self.delete_matching(collection, filter).await;
        self.track(result)
    }

    async fn delete_matching(&self, collection: &str, filter: &JsonValue) -> Result<u64> {
        let table = self.mapper.table_name(collection)?;
        let stmt = self.mapper.delete(&table, filter)?;

        match self.execute(&stmt).await {
            Err(Error::TableNotFound { .. }) => Ok(0),
            other => other,
        }
    }

    /// Drop a collection's table
    pub async fn drop_collection(&self, collection: &str) -> Result<()> {
        self.ensure_ready()?;
        let result = self.drop_table(collection).await;
        self.track(result)
    }

    async fn drop_table(&self, collection: &str) -> Result<()> {
        let table = self.mapper.table_name(collection)?;
        let ddl = self.mapper.dialect().drop_collection_sql(&table);
        self.connection.execute(&ddl, &[]).await?;
        self.ensured.lock().remove(&table);
        info!(collection, table = %table, "Dropped collection");
        Ok(())
    }

    /// Names of the tables in the database.
    ///
    /// These are table names: a `/` in a collection name shows up as `_`.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        self.ensure_ready()?;
        let sql = self.mapper.dialect().list_tables_sql();
        let result = self.connection.query(&sql, &[]).await;
        let rows = self.track(result)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get(0).and_then(Value::as_string))
            .collect())
    }

    /// Promote a document field to an indexed column (or expression index)
    pub async fn create_index(&self, collection: &str, field: &str) -> Result<()> {
        self.ensure_ready()?;
        let result = async {
            let table = self.mapper.table_name(collection)?;
            self.ensure_collection(collection, &table).await?;
            self.promote_field(&table, field).await
        }
        .await;
        self.track(result)
    }

    /// Close the connection; later operations fail with a not-ready error.
    pub async fn close(&self) -> Result<()> {
        if self.state.get() == DriverState::Unconnected {
            return Ok(());
        }
        self.state.set(DriverState::Unconnected);
        self.ensured.lock().clear();
        info!(driver = self.backend.name, "Document driver closed");
        self.connection.close().await
    }
}
