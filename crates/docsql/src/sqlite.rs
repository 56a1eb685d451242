//! SQLite backend for docsql
//!
//! Runs the same collection layout on an embedded database file (or
//! `:memory:`). JSON1 provides the path functions; `REGEXP` is backed by a
//! user function registered on every connection.

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::ErrorCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{ConnectionOptions, DriverOptions};
use crate::connection::{Connection, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How long a statement waits on a locked database file
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn value_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int64(n) => SqlValue::Integer(*n),
        Value::Float64(n) => SqlValue::Real(*n),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int64(n),
        ValueRef::Real(n) => Value::Float64(n),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}

/// Map a rusqlite error onto docsql error kinds
fn map_sqlite_error(err: rusqlite::Error, sql: &str) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        let text = message.as_deref().unwrap_or_default();
        match failure.code {
            ErrorCode::ConstraintViolation if text.starts_with("UNIQUE") => {
                return Error::conflict("", "");
            }
            ErrorCode::ConstraintViolation if text.starts_with("CHECK") => {
                return Error::invalid_document(text.to_string());
            }
            ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure => {
                return Error::connection_with_source("SQLite database unavailable", err);
            }
            _ => {}
        }
        if let Some(table) = text.strip_prefix("no such table: ") {
            return Error::table_not_found(table);
        }
    }

    Error::Query {
        message: err.to_string(),
        sql: Some(sql.to_string()),
        source: Some(Box::new(err)),
    }
}

/// Register `regexp(pattern, subject)`, the function behind `X REGEXP Y`.
///
/// Compiled patterns are cached per statement; non-text subjects never match.
fn register_regexp(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern: Arc<Regex> =
                ctx.get_or_create_aux(0, |vr| -> std::result::Result<_, BoxError> {
                    Ok(Regex::new(vr.as_str()?)?)
                })?;
            let is_match = match ctx.get_raw(1) {
                ValueRef::Text(text) => std::str::from_utf8(text)
                    .map(|s| pattern.is_match(s))
                    .unwrap_or(false),
                _ => false,
            };
            Ok(is_match)
        },
    )
}

/// SQLite connection implementation
///
/// rusqlite is synchronous; every call runs on the blocking pool so a busy
/// database file never stalls a runtime worker.
pub struct SqliteConnection {
    conn: Arc<Mutex<Option<rusqlite::Connection>>>,
    path: String,
}

impl SqliteConnection {
    /// Open a database file (or `:memory:`) and prepare the session
    pub fn open(path: &str) -> Result<Self> {
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| Error::connection_with_source(format!("Failed to open {}", path), e))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| map_sqlite_error(e, "PRAGMA busy_timeout"))?;
        register_regexp(&conn).map_err(|e| map_sqlite_error(e, "regexp"))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path: path.to_string(),
        })
    }

    /// Database path this connection was opened with
    pub fn path(&self) -> &str {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| Error::connection("Connection not available"))?;
            f(conn)
        })
        .await
        .map_err(|e| Error::internal(format!("SQLite task failed: {}", e)))?
    }
}

fn run_query(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql).map_err(|e| map_sqlite_error(e, sql))?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let mut rows = stmt
        .query(rusqlite::params_from_iter(params.iter().map(value_to_sql)))
        .map_err(|e| map_sqlite_error(e, sql))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(|e| map_sqlite_error(e, sql))? {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(value_from_ref))
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| map_sqlite_error(e, sql))?;
        out.push(Row::new(columns.clone(), values));
    }
    Ok(out)
}

fn bind(params: &[Value]) -> Vec<SqlValue> {
    params.iter().map(value_to_sql).collect()
}

#[async_trait]
impl Connection for SqliteConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| run_query(conn, &sql, &params)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let sql = sql.to_string();
        let params = bind(params);
        self.with_conn(move |conn| {
            conn.execute(&sql, rusqlite::params_from_iter(params))
                .map(|n| n as u64)
                .map_err(|e| map_sqlite_error(e, &sql))
        })
        .await
    }

    async fn execute_batch(&self, statements: &[(&str, &[Value])]) -> Result<Vec<u64>> {
        let statements: Vec<(String, Vec<SqlValue>)> = statements
            .iter()
            .map(|(sql, params)| (sql.to_string(), bind(params)))
            .collect();

        self.with_conn(move |conn| {
            // Rolled back on drop unless committed
            let tx = conn
                .transaction()
                .map_err(|e| map_sqlite_error(e, "BEGIN"))?;

            let mut counts = Vec::with_capacity(statements.len());
            for (sql, params) in statements {
                let n = tx
                    .execute(&sql, rusqlite::params_from_iter(params))
                    .map_err(|e| map_sqlite_error(e, &sql))?;
                counts.push(n as u64);
            }

            tx.commit().map_err(|e| map_sqlite_error(e, "COMMIT"))?;
            Ok(counts)
        })
        .await
    }

    async fn server_version(&self) -> Result<String> {
        self.with_conn(|conn| {
            conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
                .map_err(|e| map_sqlite_error(e, "SELECT sqlite_version()"))
        })
        .await
    }

    async fn is_valid(&self) -> bool {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| map_sqlite_error(e, "SELECT 1"))
        })
        .await
        .is_ok()
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close()
                .map_err(|(_, e)| Error::connection_with_source("Failed to close connection", e))?;
        }
        Ok(())
    }
}

/// SQLite connection factory
#[derive(Debug, Clone, Default)]
pub struct SqliteConnectionFactory;

impl SqliteConnectionFactory {
    /// Create a new SQLite connection factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for SqliteConnectionFactory {
    async fn connect(
        &self,
        options: &ConnectionOptions,
        driver_options: &DriverOptions,
    ) -> Result<Box<dyn Connection>> {
        let path = options.require_dbname()?;
        debug!(path, "Opening SQLite database");

        let opened = path.to_string();
        let conn = tokio::task::spawn_blocking(move || SqliteConnection::open(&opened))
            .await
            .map_err(|e| Error::internal(format!("SQLite task failed: {}", e)))??;

        if let Some(init) = driver_options.init_command.clone() {
            conn.with_conn(move |c| {
                c.execute_batch(&init).map_err(|e| map_sqlite_error(e, &init))
            })
            .await?;
        }

        info!(path, "Opened SQLite database");
        Ok(Box::new(conn))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_regexp_function() {
        let conn = SqliteConnection::open(":memory:").unwrap();
        let rows = conn
            .query(
                "SELECT 'Hello World' REGEXP ? AS a, 'Hello' REGEXP ? AS b, NULL REGEXP 'x' AS c",
                &[Value::from("^hello"), Value::from("(?i)^hello")],
            )
            .await
            .unwrap();
        assert_eq!(rows[0].get_by_name("a"), Some(&Value::Int64(0)));
        assert_eq!(rows[0].get_by_name("b"), Some(&Value::Int64(1)));
        assert_eq!(rows[0].get_by_name("c"), Some(&Value::Int64(0)));
    }

    #[tokio::test]
    async fn test_missing_table_is_mapped() {
        let conn = SqliteConnection::open(":memory:").unwrap();
        let err = conn.query("SELECT * FROM nope", &[]).await.unwrap_err();
        assert!(matches!(err, Error::TableNotFound { ref table } if table == "nope"));
    }

    #[tokio::test]
    async fn test_batch_rolls_back_on_failure() {
        let conn = SqliteConnection::open(":memory:").unwrap();
        conn.execute("CREATE TABLE t (v INTEGER UNIQUE)", &[])
            .await
            .unwrap();

        let one: &[Value] = &[Value::Int64(1)];
        let err = conn
            .execute_batch(&[
                ("INSERT INTO t (v) VALUES (?)", one),
                ("INSERT INTO t (v) VALUES (?)", one),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));

        let rows = conn.query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Int64(0)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_calls_share_one_connection() {
        let conn = Arc::new(SqliteConnection::open(":memory:").unwrap());
        conn.execute("CREATE TABLE t (v INTEGER)", &[]).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let conn = Arc::clone(&conn);
                tokio::spawn(async move {
                    conn.execute("INSERT INTO t (v) VALUES (?)", &[Value::Int64(i)])
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 1);
        }

        let rows = conn.query("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(rows[0].get(0), Some(&Value::Int64(8)));
    }

    #[tokio::test]
    async fn test_closed_connection_reports_connection_error() {
        let conn = SqliteConnection::open(":memory:").unwrap();
        conn.close().await.unwrap();
        assert!(!conn.is_valid().await);
        let err = conn.execute("SELECT 1", &[]).await.unwrap_err();
        assert!(err.is_retriable());
    }
}
