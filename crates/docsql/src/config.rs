//! Configuration types for docsql
//!
//! Mirrors the storage section a CMS hands to its storage layer:
//!
//! ```yaml
//! server: sqldriver
//! options:
//!   driver: mysql
//!   host: ${DB_HOST:-localhost}
//!   dbname: cockpit
//!   username: cockpit
//!   password: ${DB_PASSWORD}
//! driverOptions:
//!   use_buffered_query: false
//! ```

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use validator::Validate;

use crate::error::{Error, Result};

/// Pattern for `${VAR}` or `${VAR:-default}` expansion
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Charset used when the options do not name one
pub const DEFAULT_CHARSET: &str = "UTF8";

/// Driver used when the options do not name one
pub const DEFAULT_DRIVER: &str = "mysql";

/// Database password, redacted in Debug/Display but preserved on serialize so
/// configurations can be written back.
#[derive(Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ConnectionPassword(#[serde(with = "password_serde")] SecretString);

mod password_serde {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        secret: &SecretString,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(secret.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<SecretString, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::new(s.into_boxed_str()))
    }
}

impl std::fmt::Debug for ConnectionPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ConnectionPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl ConnectionPassword {
    /// Wrap a plain password
    pub fn new(s: impl Into<String>) -> Self {
        Self(SecretString::new(s.into().into_boxed_str()))
    }

    /// Expose the secret value (use sparingly!)
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

/// Structured connection options
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ConnectionOptions {
    /// SQL dialect backing the store (`mysql` or `sqlite`)
    #[serde(default = "default_driver")]
    #[validate(length(min = 1))]
    pub driver: String,

    /// Server host (default: localhost)
    #[serde(default)]
    pub host: Option<String>,

    /// Server port (default: the dialect's conventional port)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub port: Option<u16>,

    /// Unix socket path; takes precedence over host/port when non-empty
    #[serde(default)]
    pub socket: Option<String>,

    /// Database name (SQLite: database file path or `:memory:`)
    #[serde(default)]
    pub dbname: Option<String>,

    /// Connection charset (default: UTF8)
    #[serde(default)]
    pub charset: Option<String>,

    /// Username
    #[serde(default)]
    pub username: Option<String>,

    /// Password (redacted in logs)
    #[serde(default)]
    pub password: Option<ConnectionPassword>,

    /// Document fields promoted to indexed columns, per collection
    #[serde(default)]
    pub indexes: HashMap<String, Vec<String>>,
}

fn default_driver() -> String {
    DEFAULT_DRIVER.to_string()
}

impl ConnectionOptions {
    /// Options for a named database with every other field defaulted
    pub fn new(dbname: impl Into<String>) -> Self {
        Self {
            driver: default_driver(),
            dbname: Some(dbname.into()),
            ..Default::default()
        }
    }

    /// Set the dialect
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }

    /// Set host and port
    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Set the unix socket path
    pub fn with_socket(mut self, socket: impl Into<String>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    /// Set credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(ConnectionPassword::new(password));
        self
    }

    /// Set charset
    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = Some(charset.into());
        self
    }

    /// Promote a document field of a collection to an indexed column
    pub fn with_index(mut self, collection: impl Into<String>, field: impl Into<String>) -> Self {
        self.indexes
            .entry(collection.into())
            .or_default()
            .push(field.into());
        self
    }

    /// Database name, required by every dialect
    pub fn require_dbname(&self) -> Result<&str> {
        match self.dbname.as_deref() {
            Some(name) if !name.trim().is_empty() => Ok(name),
            _ => Err(Error::config("connection options must supply a database name")),
        }
    }

    /// Socket path when one is configured and non-empty
    pub fn socket_path(&self) -> Option<&str> {
        self.socket.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Effective charset
    pub fn charset(&self) -> &str {
        self.charset
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CHARSET)
    }

    /// Fields promoted for a collection
    pub fn indexed_fields(&self, collection: &str) -> &[String] {
        self.indexes
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Check required fields and value ranges
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("invalid connection options: {}", e)))?;
        self.require_dbname()?;
        Ok(())
    }
}

/// Engine-specific connection flags.
///
/// Unset keys fall back to the dialect's defaults, so a caller only overrides
/// the startup command or buffering mode by naming it explicitly.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DriverOptions {
    /// Statement executed by the engine when the connection opens
    #[serde(default)]
    pub init_command: Option<String>,

    /// Buffer whole result sets client-side instead of consuming row by row
    #[serde(default)]
    pub use_buffered_query: Option<bool>,

    /// Prepared statement cache size
    #[serde(default)]
    pub stmt_cache_size: Option<usize>,

    /// Disable Nagle's algorithm on TCP connections
    #[serde(default)]
    pub tcp_nodelay: Option<bool>,

    /// Flags this crate does not interpret, kept for the caller
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl DriverOptions {
    /// Startup command, falling back to the dialect default
    pub fn init_command_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.init_command.as_deref().unwrap_or(default)
    }

    /// Whether results are buffered (unbuffered unless explicitly enabled)
    pub fn buffered(&self) -> bool {
        self.use_buffered_query.unwrap_or(false)
    }

    /// Set the startup command
    pub fn with_init_command(mut self, command: impl Into<String>) -> Self {
        self.init_command = Some(command.into());
        self
    }

    /// Set buffering mode
    pub fn with_buffered_query(mut self, buffered: bool) -> Self {
        self.use_buffered_query = Some(buffered);
        self
    }
}

/// Root storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Storage server name; the driver only activates for [`crate::registry::SERVER_NAME`]
    pub server: String,

    /// Connection options
    #[serde(default)]
    pub options: ConnectionOptions,

    /// Engine-specific flags
    #[serde(default, alias = "driverOptions")]
    pub driver_options: DriverOptions,
}

impl StorageConfig {
    /// Create a configuration
    pub fn new(server: impl Into<String>, options: ConnectionOptions) -> Self {
        Self {
            server: server.into(),
            options,
            driver_options: DriverOptions::default(),
        }
    }

    /// Replace the driver options
    pub fn with_driver_options(mut self, driver_options: DriverOptions) -> Self {
        self.driver_options = driver_options;
        self
    }

    /// Identity used to key cached drivers; never contains the password
    pub fn identity(&self) -> String {
        let target = match self.options.socket_path() {
            Some(socket) => format!("unix:{}", socket),
            None => format!(
                "{}:{}",
                self.options.host.as_deref().unwrap_or("localhost"),
                self.options
                    .port
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "default".into())
            ),
        };
        format!(
            "{}|{}|{}|{}|{}",
            self.server,
            self.options.driver,
            target,
            self.options.dbname.as_deref().unwrap_or_default(),
            self.options.username.as_deref().unwrap_or_default()
        )
    }

    /// Parse a YAML document, expanding `${VAR}` / `${VAR:-default}` first
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let expanded = Self::expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| anyhow::anyhow!("Failed to parse storage config: {}", e))?;
        Ok(config)
    }

    /// Load a YAML configuration file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;
        Self::from_yaml_str(&content)
    }

    /// Expand environment variables in the format ${VAR} or ${VAR:-default}
    fn expand_env_vars(content: &str) -> String {
        ENV_VAR_REGEX
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                let default = caps.get(2).map(|m| m.as_str());

                std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
            })
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_redacted() {
        let options = ConnectionOptions::new("cms").with_credentials("root", "hunter2");
        let debug = format!("{:?}", options);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(options.password.as_ref().map(|p| p.expose()), Some("hunter2"));
    }

    #[test]
    fn test_missing_dbname_is_configuration_error() {
        let options = ConnectionOptions::default();
        let err = options.check().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));

        let blank = ConnectionOptions::new("  ");
        assert!(blank.check().is_err());
    }

    #[test]
    fn test_zero_port_is_rejected() {
        let mut options = ConnectionOptions::new("cms");
        options.port = Some(0);
        assert!(matches!(options.check(), Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("DOCSQL_MISSING_VAR");
        let expanded = StorageConfig::expand_env_vars("dbname: ${DOCSQL_MISSING_VAR:-cockpit}");
        assert_eq!(expanded, "dbname: cockpit");
    }

    #[test]
    fn test_identity_excludes_password() {
        let config = StorageConfig::new(
            "sqldriver",
            ConnectionOptions::new("cms").with_credentials("root", "secret"),
        );
        let identity = config.identity();
        assert!(identity.contains("cms"));
        assert!(identity.contains("root"));
        assert!(!identity.contains("secret"));
    }
}
