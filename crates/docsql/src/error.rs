//! Error types for docsql
//!
//! Errors fall in two groups:
//! - Construction errors (configuration, connection, unsupported server version)
//!   abort driver creation entirely
//! - Per-operation errors (unsupported query, conflict, invalid document) are
//!   returned from a single call and leave the driver usable

use std::fmt;
use thiserror::Error;

/// Result type for docsql operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad or missing connection options
    Configuration,
    /// Transport failure (retriable by rebuilding the driver)
    Connection,
    /// Credentials rejected by the server
    Authentication,
    /// Server below the minimum version of its family
    UnsupportedVersion,
    /// Operation invoked on a driver that is not ready
    NotReady,
    /// Filter, projection or update the mapper cannot translate
    UnsupportedQuery,
    /// Uniqueness violation on write
    Conflict,
    /// Document payload rejected before reaching the database
    InvalidDocument,
    /// Statement execution failed
    Query,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection)
    }

    /// Whether an error in this category means the driver's connection is gone
    #[inline]
    pub const fn is_fatal_to_driver(self) -> bool {
        matches!(self, Self::Connection)
    }
}

/// Main error type for docsql
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Connection failed or was lost
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Authentication failed
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// Server version below the family minimum
    #[error("unsupported {family} server version {detected} (requires {required} or newer)")]
    UnsupportedVersion {
        family: String,
        detected: String,
        required: String,
    },

    /// Driver is not in the ready state
    #[error("driver not ready (state: {state})")]
    NotReady { state: String },

    /// Filter/projection/update cannot be translated
    #[error("unsupported query: {message}")]
    UnsupportedQuery { message: String },

    /// Duplicate document identifier
    #[error("conflict in collection {collection}: duplicate identifier {id}")]
    Conflict { collection: String, id: String },

    /// Document rejected before write
    #[error("invalid document: {message}")]
    InvalidDocument { message: String },

    /// Statement execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Backing table does not exist
    #[error("table not found: {table}")]
    TableNotFound { table: String },

    /// JSON (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Authentication { .. } => ErrorCategory::Authentication,
            Self::UnsupportedVersion { .. } => ErrorCategory::UnsupportedVersion,
            Self::NotReady { .. } => ErrorCategory::NotReady,
            Self::UnsupportedQuery { .. } => ErrorCategory::UnsupportedQuery,
            Self::Conflict { .. } => ErrorCategory::Conflict,
            Self::InvalidDocument { .. } | Self::Serialization(_) => ErrorCategory::InvalidDocument,
            Self::Query { .. } | Self::TableNotFound { .. } => ErrorCategory::Query,
            Self::Internal { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an authentication error
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    /// Create an unsupported version error
    pub fn unsupported_version(
        family: impl Into<String>,
        detected: impl Into<String>,
        required: impl Into<String>,
    ) -> Self {
        Self::UnsupportedVersion {
            family: family.into(),
            detected: detected.into(),
            required: required.into(),
        }
    }

    /// Create a not-ready error
    pub fn not_ready(state: impl fmt::Display) -> Self {
        Self::NotReady {
            state: state.to_string(),
        }
    }

    /// Create an unsupported query error
    pub fn unsupported_query(message: impl Into<String>) -> Self {
        Self::UnsupportedQuery {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Conflict {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Create an invalid document error
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: None,
        }
    }

    /// Create a table not found error
    pub fn table_not_found(table: impl Into<String>) -> Self {
        Self::TableNotFound {
            table: table.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Fill in the collection name of a conflict raised by a backend,
    /// which only knows the table it wrote to
    pub(crate) fn with_conflict_collection(self, collection: &str) -> Self {
        match self {
            Self::Conflict { id, .. } => Self::Conflict {
                collection: collection.to_string(),
                id,
            },
            other => other,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Connection => write!(f, "connection"),
            Self::Authentication => write!(f, "authentication"),
            Self::UnsupportedVersion => write!(f, "unsupported_version"),
            Self::NotReady => write!(f, "not_ready"),
            Self::UnsupportedQuery => write!(f, "unsupported_query"),
            Self::Conflict => write!(f, "conflict"),
            Self::InvalidDocument => write!(f, "invalid_document"),
            Self::Query => write!(f, "query"),
            Self::Other => write!(f, "other"),
        }
    }
}
