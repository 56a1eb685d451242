//! MySQL / MariaDB backend for docsql
//!
//! Provides:
//! - DSN assembly from structured options (socket wins over host/port)
//! - Session defaults: utf8mb4 names, unbuffered fetch, ANSI sql_mode
//! - Connection with statement-level locking and transactional batches
//! - Server error code mapping onto docsql error kinds

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, DriverError, OptsBuilder, TxOpts};
use std::fmt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{ConnectionOptions, DriverOptions};
use crate::connection::{Connection, ConnectionFactory, ConnectionTarget, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Conventional MySQL port
pub const DEFAULT_PORT: u16 = 3306;

/// Session charset/collation statement run when a connection opens
pub const DEFAULT_INIT_COMMAND: &str = "SET NAMES utf8mb4 COLLATE utf8mb4_unicode_ci";

/// Session normalization run after connecting; ANSI mode allows double-quoted
/// identifiers in hand-written statements.
pub const POST_CONNECT_SQL: &str = "SET sql_mode = 'ANSI'";

const ER_DBACCESS_DENIED: u16 = 1044;
const ER_ACCESS_DENIED: u16 = 1045;
const ER_DUP_ENTRY: u16 = 1062;
const ER_NO_SUCH_TABLE: u16 = 1146;

/// Connection descriptor in the `mysql:key=value;` form.
///
/// Holds no credentials, so it can be logged as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MySqlDsn {
    /// Database name
    pub dbname: String,
    /// Charset
    pub charset: String,
    /// Socket or host/port
    pub target: ConnectionTarget,
}

impl MySqlDsn {
    /// Build the descriptor from options.
    ///
    /// Fails with a configuration error when no database name is given.
    pub fn from_options(options: &ConnectionOptions) -> Result<Self> {
        Ok(Self {
            dbname: options.require_dbname()?.to_string(),
            charset: options.charset().to_string(),
            target: ConnectionTarget::resolve(options, DEFAULT_PORT),
        })
    }

    /// Client options for this descriptor, with credentials and driver flags applied
    pub fn opts_builder(
        &self,
        options: &ConnectionOptions,
        driver_options: &DriverOptions,
    ) -> OptsBuilder {
        let mut builder = OptsBuilder::default()
            .db_name(Some(self.dbname.clone()))
            .user(options.username.clone())
            .pass(options.password.as_ref().map(|p| p.expose().to_string()))
            .init(vec![driver_options
                .init_command_or(DEFAULT_INIT_COMMAND)
                .to_string()]);

        builder = match &self.target {
            ConnectionTarget::Socket(path) => builder.socket(Some(path.clone())),
            ConnectionTarget::Tcp { host, port } => {
                builder.ip_or_hostname(host.clone()).tcp_port(*port)
            }
        };

        if let Some(size) = driver_options.stmt_cache_size {
            builder = builder.stmt_cache_size(size);
        }
        if let Some(nodelay) = driver_options.tcp_nodelay {
            builder = builder.tcp_nodelay(nodelay);
        }

        builder
    }
}

impl fmt::Display for MySqlDsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mysql:dbname={};charset={};", self.dbname, self.charset)?;
        match &self.target {
            ConnectionTarget::Socket(path) => write!(f, "unix_socket={};", path),
            ConnectionTarget::Tcp { host, port } => write!(f, "host={};port={};", host, port),
        }
    }
}

/// Convert a docsql Value to a MySQL parameter
fn value_to_sql(value: &Value) -> mysql_async::Value {
    match value {
        Value::Null => mysql_async::Value::NULL,
        Value::Bool(b) => mysql_async::Value::from(*b),
        Value::Int64(n) => mysql_async::Value::from(*n),
        Value::Float64(n) => mysql_async::Value::from(*n),
        Value::String(s) => mysql_async::Value::from(s.as_str()),
        Value::Bytes(b) => mysql_async::Value::from(b.clone()),
        Value::Json(j) => mysql_async::Value::from(j.to_string()),
    }
}

fn params_to_sql(params: &[Value]) -> Vec<mysql_async::Value> {
    params.iter().map(value_to_sql).collect()
}

/// Convert a MySQL value to a docsql Value
fn mysql_value_to_value(val: mysql_async::Value) -> Value {
    match val {
        mysql_async::Value::NULL => Value::Null,
        mysql_async::Value::Bytes(b) => match String::from_utf8(b) {
            Ok(s) => Value::String(s),
            Err(e) => Value::Bytes(e.into_bytes()),
        },
        mysql_async::Value::Int(n) => Value::Int64(n),
        mysql_async::Value::UInt(n) => match i64::try_from(n) {
            Ok(n) => Value::Int64(n),
            Err(_) => Value::Float64(n as f64),
        },
        mysql_async::Value::Float(f) => Value::Float64(f64::from(f)),
        mysql_async::Value::Double(d) => Value::Float64(d),
        mysql_async::Value::Date(year, month, day, hour, min, sec, micro) => Value::String(
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                year, month, day, hour, min, sec, micro
            ),
        ),
        mysql_async::Value::Time(neg, days, hour, min, sec, micro) => Value::String(format!(
            "{}{:02}:{:02}:{:02}.{:06}",
            if neg { "-" } else { "" },
            days * 24 + u32::from(hour),
            min,
            sec,
            micro
        )),
    }
}

fn convert_row(row: mysql_async::Row) -> Row {
    let columns: Vec<String> = row
        .columns_ref()
        .iter()
        .map(|c| c.name_str().to_string())
        .collect();

    let values: Vec<Value> = (0..row.len())
        .map(|i| {
            let val: mysql_async::Value = row.get(i).unwrap_or(mysql_async::Value::NULL);
            mysql_value_to_value(val)
        })
        .collect();

    Row::new(columns, values)
}

/// Text between the first pair of single quotes of a server message
fn quoted_fragment(message: &str) -> Option<&str> {
    let start = message.find('\'')? + 1;
    let len = message[start..].find('\'')?;
    Some(&message[start..start + len])
}

fn is_transport_failure(err: &DriverError) -> bool {
    matches!(
        err,
        DriverError::ConnectionClosed
            | DriverError::PoolDisconnected
            | DriverError::PacketOutOfOrder
            | DriverError::UnexpectedPacket { .. }
    )
}

/// Map a driver error onto docsql error kinds
fn map_mysql_error(err: mysql_async::Error, sql: &str) -> Error {
    match err {
        mysql_async::Error::Server(server) => match server.code {
            ER_DUP_ENTRY => Error::conflict(
                "",
                quoted_fragment(&server.message).unwrap_or_default(),
            ),
            ER_NO_SUCH_TABLE => Error::table_not_found(
                quoted_fragment(&server.message)
                    .and_then(|t| t.rsplit('.').next())
                    .unwrap_or_default(),
            ),
            ER_DBACCESS_DENIED | ER_ACCESS_DENIED => Error::authentication(server.message),
            _ => Error::query_with_sql(format!("[{}] {}", server.code, server.message), sql),
        },
        err @ mysql_async::Error::Io(_) => {
            Error::connection_with_source("MySQL connection failed", err)
        }
        // Only a broken session is fatal; misuse of a healthy one is not
        mysql_async::Error::Driver(driver) if is_transport_failure(&driver) => {
            Error::connection_with_source("MySQL connection failed", driver)
        }
        other => Error::Query {
            message: other.to_string(),
            sql: Some(sql.to_string()),
            source: Some(Box::new(other)),
        },
    }
}

/// MySQL connection implementation.
///
/// The session lock is held for the whole statement, including result
/// consumption, so concurrent callers never interleave on the wire.
pub struct MySqlConnection {
    conn: Mutex<Option<Conn>>,
    buffered: bool,
}

impl MySqlConnection {
    /// Wrap an established session; `buffered` collects result sets
    /// client-side instead of streaming them.
    pub fn new(conn: Conn, buffered: bool) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            buffered,
        }
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("Connection not available"))?;

        let params = params_to_sql(params);

        if self.buffered {
            let rows: Vec<mysql_async::Row> = conn
                .exec(sql, params)
                .await
                .map_err(|e| map_mysql_error(e, sql))?;
            return Ok(rows.into_iter().map(convert_row).collect());
        }

        let mut result = conn
            .exec_iter(sql, params)
            .await
            .map_err(|e| map_mysql_error(e, sql))?;
        result
            .map(convert_row)
            .await
            .map_err(|e| map_mysql_error(e, sql))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("Connection not available"))?;

        conn.exec_drop(sql, params_to_sql(params))
            .await
            .map_err(|e| map_mysql_error(e, sql))?;

        Ok(conn.affected_rows())
    }

    async fn execute_batch(&self, statements: &[(&str, &[Value])]) -> Result<Vec<u64>> {
        let mut guard = self.conn.lock().await;
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::connection("Connection not available"))?;

        // Rolled back on drop unless committed
        let mut tx = conn
            .start_transaction(TxOpts::default())
            .await
            .map_err(|e| map_mysql_error(e, "START TRANSACTION"))?;

        let mut counts = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            tx.exec_drop(*sql, params_to_sql(params))
                .await
                .map_err(|e| map_mysql_error(e, sql))?;
            counts.push(tx.affected_rows());
        }

        tx.commit()
            .await
            .map_err(|e| map_mysql_error(e, "COMMIT"))?;

        Ok(counts)
    }

    async fn server_version(&self) -> Result<String> {
        let row = self
            .query_one("SELECT VERSION() AS version", &[])
            .await?
            .ok_or_else(|| Error::query("server returned no version"))?;

        row.get(0)
            .and_then(Value::as_string)
            .ok_or_else(|| Error::query("server version is not a string"))
    }

    async fn is_valid(&self) -> bool {
        if let Some(conn) = self.conn.lock().await.as_mut() {
            conn.ping().await.is_ok()
        } else {
            false
        }
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect()
                .await
                .map_err(|e| Error::connection_with_source("Failed to close connection", e))?;
        }
        Ok(())
    }
}

/// MySQL connection factory
#[derive(Debug, Clone, Default)]
pub struct MySqlConnectionFactory;

impl MySqlConnectionFactory {
    /// Create a new MySQL connection factory
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ConnectionFactory for MySqlConnectionFactory {
    async fn connect(
        &self,
        options: &ConnectionOptions,
        driver_options: &DriverOptions,
    ) -> Result<Box<dyn Connection>> {
        let dsn = MySqlDsn::from_options(options)?;
        debug!(dsn = %dsn, buffered = driver_options.buffered(), "Connecting to MySQL");

        let opts = dsn.opts_builder(options, driver_options);
        let mut conn = Conn::new(opts).await.map_err(|e| match e {
            mysql_async::Error::Server(server)
                if matches!(server.code, ER_DBACCESS_DENIED | ER_ACCESS_DENIED) =>
            {
                Error::authentication(server.message)
            }
            other => Error::connection_with_source(format!("Failed to connect to {}", dsn), other),
        })?;

        conn.query_drop(POST_CONNECT_SQL)
            .await
            .map_err(|e| map_mysql_error(e, POST_CONNECT_SQL))?;

        info!(target = %dsn.target, database = %dsn.dbname, "Connected to MySQL");

        Ok(Box::new(MySqlConnection::new(conn, driver_options.buffered())))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    #[test]
    fn test_dsn_tcp_defaults() {
        let dsn = MySqlDsn::from_options(&ConnectionOptions::new("cockpit")).unwrap();
        assert_eq!(
            dsn.to_string(),
            "mysql:dbname=cockpit;charset=UTF8;host=localhost;port=3306;"
        );
    }

    #[test]
    fn test_dsn_socket_wins() {
        let options = ConnectionOptions::new("cockpit")
            .with_host("db", 3307)
            .with_socket("/var/run/mysqld/mysqld.sock")
            .with_charset("utf8mb4");
        let dsn = MySqlDsn::from_options(&options).unwrap();
        assert_eq!(
            dsn.to_string(),
            "mysql:dbname=cockpit;charset=utf8mb4;unix_socket=/var/run/mysqld/mysqld.sock;"
        );
    }

    #[test]
    fn test_dsn_requires_dbname() {
        let err = MySqlDsn::from_options(&ConnectionOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_dsn_never_contains_password() {
        let options = ConnectionOptions::new("cockpit").with_credentials("root", "s3cret");
        let dsn = MySqlDsn::from_options(&options).unwrap();
        assert!(!dsn.to_string().contains("s3cret"));
        assert!(!format!("{:?}", dsn).contains("s3cret"));
    }

    #[test]
    fn test_only_transport_driver_errors_are_fatal() {
        let closed = map_mysql_error(
            mysql_async::Error::Driver(DriverError::ConnectionClosed),
            "SELECT 1",
        );
        assert_eq!(closed.category(), ErrorCategory::Connection);

        for driver in [DriverError::MixedParams, DriverError::NestedTransaction] {
            let err = map_mysql_error(mysql_async::Error::Driver(driver), "SELECT ?");
            assert_eq!(err.category(), ErrorCategory::Query, "{}", err);
            assert!(!err.category().is_fatal_to_driver());
        }
    }

    #[test]
    fn test_server_error_mapping() {
        let server = |code: u16, message: &str| {
            mysql_async::Error::Server(mysql_async::ServerError {
                code,
                message: message.to_string(),
                state: "23000".to_string(),
            })
        };

        let err = map_mysql_error(
            server(ER_DUP_ENTRY, "Duplicate entry 'abc' for key 'posts._id_virtual'"),
            "INSERT",
        );
        assert!(matches!(err, Error::Conflict { ref id, .. } if id == "abc"));

        let err = map_mysql_error(server(1064, "You have an error in your SQL syntax"), "SELEC");
        match err {
            Error::Query { message, sql, .. } => {
                assert!(message.starts_with("[1064]"));
                assert_eq!(sql.as_deref(), Some("SELEC"));
            }
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[test]
    fn test_quoted_fragment() {
        assert_eq!(
            quoted_fragment("Duplicate entry 'abc' for key 'posts._id_virtual'"),
            Some("abc")
        );
        assert_eq!(quoted_fragment("Table 'cms.posts' doesn't exist"), Some("cms.posts"));
        assert_eq!(quoted_fragment("no quotes"), None);
    }

    #[test]
    fn test_value_conversion() {
        assert_eq!(value_to_sql(&Value::Null), mysql_async::Value::NULL);
        assert_eq!(
            mysql_value_to_value(mysql_async::Value::Bytes(b"{}".to_vec())),
            Value::String("{}".into())
        );
        assert_eq!(
            mysql_value_to_value(mysql_async::Value::UInt(7)),
            Value::Int64(7)
        );
    }
}
