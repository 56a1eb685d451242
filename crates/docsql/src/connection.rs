//! Connection traits for docsql
//!
//! Core abstractions for database connectivity:
//! - Connection: statement execution on one live engine session
//! - ConnectionFactory: builds a connection from structured options
//! - ConnectionTarget: socket vs host/port resolution shared by network dialects

use async_trait::async_trait;

use crate::config::{ConnectionOptions, DriverOptions};
use crate::error::Result;
use crate::types::{Row, Value};

/// Host used when the options do not name one
pub const DEFAULT_HOST: &str = "localhost";

/// A connection to a database.
///
/// Implementations serialize statement execution internally: concurrent
/// callers sharing one connection never interleave statements.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    /// Execute a query that modifies data, returns affected row count
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Execute a batch of statements, returns affected counts per statement.
    ///
    /// Backends run the batch in a single transaction; the default
    /// implementation only runs the statements in order.
    async fn execute_batch(&self, statements: &[(&str, &[Value])]) -> Result<Vec<u64>> {
        let mut results = Vec::with_capacity(statements.len());
        for (sql, params) in statements {
            results.push(self.execute(sql, params).await?);
        }
        Ok(results)
    }

    /// Execute a query and return the first row (convenience method)
    async fn query_one(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    /// The server's self-reported version string
    async fn server_version(&self) -> Result<String>;

    /// Check if connection is valid/alive
    async fn is_valid(&self) -> bool;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Open a connection and run the dialect's post-connect normalization
    async fn connect(
        &self,
        options: &ConnectionOptions,
        driver_options: &DriverOptions,
    ) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// MySQL/MariaDB
    MySQL,
    /// SQLite
    SQLite,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MySQL => write!(f, "MySQL"),
            Self::SQLite => write!(f, "SQLite"),
        }
    }
}

/// Where a network dialect connects to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Unix domain socket
    Socket(String),
    /// TCP host and port
    Tcp {
        /// Host name or address
        host: String,
        /// Port
        port: u16,
    },
}

impl ConnectionTarget {
    /// Resolve the target from options.
    ///
    /// A non-empty socket path wins and host/port are ignored; otherwise host
    /// and port fall back to `localhost` and `default_port`.
    pub fn resolve(options: &ConnectionOptions, default_port: u16) -> Self {
        if let Some(socket) = options.socket_path() {
            return Self::Socket(socket.to_string());
        }

        Self::Tcp {
            host: options
                .host
                .as_deref()
                .filter(|h| !h.is_empty())
                .unwrap_or(DEFAULT_HOST)
                .to_string(),
            port: options.port.unwrap_or(default_port),
        }
    }

    /// Whether this is the socket form
    pub fn is_socket(&self) -> bool {
        matches!(self, Self::Socket(_))
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Socket(path) => write!(f, "unix:{}", path),
            Self::Tcp { host, port } => write!(f, "{}:{}", host, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_takes_precedence() {
        let options = ConnectionOptions::new("cms")
            .with_host("db.internal", 3307)
            .with_socket("/run/mysqld/mysqld.sock");

        assert_eq!(
            ConnectionTarget::resolve(&options, 3306),
            ConnectionTarget::Socket("/run/mysqld/mysqld.sock".into())
        );
    }

    #[test]
    fn test_empty_socket_falls_back_to_tcp() {
        let options = ConnectionOptions::new("cms").with_socket("");
        let target = ConnectionTarget::resolve(&options, 3306);
        assert_eq!(
            target,
            ConnectionTarget::Tcp {
                host: "localhost".into(),
                port: 3306
            }
        );
        assert!(!target.is_socket());
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(format!("{}", DatabaseType::MySQL), "MySQL");
        assert_eq!(format!("{}", DatabaseType::SQLite), "SQLite");
    }

    #[test]
    fn test_target_display() {
        let tcp = ConnectionTarget::Tcp {
            host: "db".into(),
            port: 3306,
        };
        assert_eq!(tcp.to_string(), "db:3306");
        assert_eq!(ConnectionTarget::Socket("/tmp/s".into()).to_string(), "unix:/tmp/s");
    }
}
