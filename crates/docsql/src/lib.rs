//! # docsql
//!
//! MongoDB-style document collections on relational SQL engines.
//!
//! A collection is a table with a JSON payload column; documents are
//! filtered, projected and sorted with the MongoDB vocabulary, translated
//! into SQL over JSON path expressions.
//!
//! ## Features
//!
//! - **Engines**: MySQL 5.7.9+, MariaDB 10.2.6+ and SQLite 3.31.0+
//! - **Version gate**: servers below their family's minimum are rejected at connect
//! - **Filters**: `$eq`, `$ne`, `$gt`/`$gte`/`$lt`/`$lte`, `$in`/`$nin`, `$exists`,
//!   `$regex`, `$size`, `$not`, `$and`/`$or`/`$nor`
//! - **Updates**: replacement, merge patch, `$set`/`$unset`/`$inc`
//! - **Indexes**: document fields promoted to generated columns / expression indexes
//! - **Lazy singleton**: one driver per process, built on first use
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docsql::prelude::*;
//! use serde_json::json;
//!
//! let config = StorageConfig::new(
//!     SERVER_NAME,
//!     ConnectionOptions::new("cockpit")
//!         .with_host("localhost", 3306)
//!         .with_credentials("cockpit", "secret"),
//! );
//!
//! let registry = DriverRegistry::from_config(config).expect("sqldriver configured");
//! let driver = registry.get().await?;
//!
//! let doc = driver
//!     .insert("cockpit/accounts", into_document(json!({"user": "admin", "active": true}))?)
//!     .await?;
//!
//! let active = driver
//!     .find(
//!         "cockpit/accounts",
//!         &FindOptions::new()
//!             .filter(json!({"active": true}))
//!             .sort("user", SortOrder::Asc)
//!             .limit(10),
//!     )
//!     .await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `mysql` - MySQL/MariaDB support via mysql_async
//! - `sqlite` - SQLite support via rusqlite (bundled)
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dialect;
pub mod document;
pub mod driver;
pub mod error;
pub mod mapper;
pub mod registry;
pub mod security;
pub mod types;
pub mod version;

// Backend implementations (conditionally compiled)
#[cfg(feature = "mysql")]
pub mod mysql;

#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Configuration
    pub use crate::config::{ConnectionOptions, DriverOptions, StorageConfig};

    // Connection traits
    pub use crate::connection::{Connection, ConnectionFactory, ConnectionTarget, DatabaseType};

    // Dialects and versions
    pub use crate::dialect::{dialect_for, MySqlDialect, SqlDialect, SqliteDialect};
    pub use crate::version::{MySqlVersionPolicy, ServerVersion, SqliteVersionPolicy, VersionPolicy};

    // Documents
    pub use crate::document::{generate_object_id, into_document, Document, ID_FIELD};
    pub use crate::mapper::{FindOptions, Projection, SortOrder, UpdateSpec};

    // Driver
    pub use crate::driver::{Backend, DocumentDriver, DriverState};
    pub use crate::registry::{DriverRegistry, SERVER_NAME, STORAGE_KEY};

    // Values
    pub use crate::types::{Row, Value};
}

// Re-export commonly used items at crate root
pub use driver::DocumentDriver;
pub use error::{Error, Result};
pub use types::Value;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _options = ConnectionOptions::new("cockpit");
        let _find = FindOptions::new().limit(1);
        let _order = SortOrder::Desc;
        assert_eq!(SERVER_NAME, "sqldriver");
        assert_eq!(STORAGE_KEY, "storage");
    }

    #[test]
    fn test_error_types() {
        let err = Error::connection("test error");
        assert!(err.is_retriable());
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[test]
    fn test_dialect_selection() {
        assert_eq!(dialect_for("mysql").map(|d| d.name()), Some("MySQL"));
        assert_eq!(dialect_for("sqlite").map(|d| d.name()), Some("SQLite"));
    }
}
