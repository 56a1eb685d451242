//! SQL dialect abstraction for docsql
//!
//! Each dialect knows how to:
//! - name and create the table backing a collection
//! - address a document path inside the JSON payload column
//! - express typed equality/comparison predicates over JSON values
//! - assemble SELECT/INSERT/UPDATE/DELETE statements (via sea-query)
//!
//! Statements use `?` placeholders in both dialects; parameters are carried
//! next to the SQL in a [`Predicate`].

use sea_query::{
    Alias, Expr, MysqlQueryBuilder, Order, Query, SelectStatement, SqliteQueryBuilder,
};

use crate::connection::DatabaseType;
use crate::error::{Error, Result};
use crate::security::{escape_string_literal, validate_sql_identifier};
use crate::types::Value;

/// Auto-increment row identifier column
pub const ROW_ID_COLUMN: &str = "id";
/// JSON payload column
pub const DOCUMENT_COLUMN: &str = "document";
/// Generated column holding the document identifier
pub const ID_COLUMN: &str = "_id_virtual";

/// A SQL fragment with its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    /// SQL text with `?` placeholders
    pub sql: String,
    /// Parameters in placeholder order
    pub params: Vec<Value>,
}

impl Predicate {
    /// Predicate without parameters
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Predicate with parameters
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Always-true predicate
    pub fn always() -> Self {
        Self::raw("1 = 1")
    }

    /// Always-false predicate
    pub fn never() -> Self {
        Self::raw("1 = 0")
    }

    /// Join predicates with AND/OR; an empty list yields `empty`
    pub fn join(parts: Vec<Predicate>, op: &str, empty: Predicate) -> Self {
        match parts.len() {
            0 => empty,
            1 => parts.into_iter().next().unwrap_or(empty),
            _ => {
                let mut params = Vec::new();
                let sql = parts
                    .into_iter()
                    .map(|p| {
                        params.extend(p.params);
                        format!("({})", p.sql)
                    })
                    .collect::<Vec<_>>()
                    .join(&format!(" {} ", op));
                Self { sql, params }
            }
        }
    }

    /// Negation that also holds when the inner predicate is NULL (missing field)
    pub fn negate(self) -> Self {
        Self {
            sql: format!("NOT COALESCE(({}), 0)", self.sql),
            params: self.params,
        }
    }
}

/// Ordering comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `<`
    Lt,
    /// `<=`
    Lte,
}

impl Comparison {
    /// SQL operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Lt => "<",
            Self::Lte => "<=",
        }
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    /// SQL expression
    pub expr: String,
    /// Ascending when true
    pub ascending: bool,
}

/// Parts of a SELECT over a collection table
#[derive(Debug, Clone, Default)]
pub struct SelectSpec<'a> {
    /// Table name (already validated)
    pub table: &'a str,
    /// Selected columns
    pub columns: &'a [&'a str],
    /// WHERE clause
    pub filter: Option<&'a str>,
    /// ORDER BY terms
    pub order_by: &'a [OrderTerm],
    /// LIMIT
    pub limit: Option<u64>,
    /// OFFSET
    pub offset: Option<u64>,
}

fn select_statement(spec: &SelectSpec<'_>, unbounded_limit: u64) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.from(Alias::new(spec.table));

    for col in spec.columns {
        stmt.column(Alias::new(*col));
    }

    if let Some(w) = spec.filter {
        stmt.and_where(Expr::cust(w));
    }

    for term in spec.order_by {
        stmt.order_by_expr(
            Expr::cust(term.expr.as_str()),
            if term.ascending { Order::Asc } else { Order::Desc },
        );
    }

    match (spec.limit, spec.offset) {
        (Some(l), _) => {
            stmt.limit(l);
        }
        // OFFSET needs a LIMIT in both engines
        (None, Some(_)) => {
            stmt.limit(unbounded_limit);
        }
        (None, None) => {}
    }
    if let Some(o) = spec.offset {
        stmt.offset(o);
    }

    stmt
}

fn count_statement(table: &str, filter: Option<&str>) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.expr_as(Expr::cust("COUNT(*)"), Alias::new("total"))
        .from(Alias::new(table));
    if let Some(w) = filter {
        stmt.and_where(Expr::cust(w));
    }
    stmt
}

/// Sanitized identifier fragment derived from a document path
fn path_slug(path: &str) -> String {
    path.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Engine this dialect targets
    fn database_type(&self) -> DatabaseType;

    /// Quote an identifier (table, column name)
    fn quote_identifier(&self, name: &str) -> String;

    /// Longest identifier the engine accepts
    fn max_identifier_length(&self) -> usize;

    /// LIMIT value standing in for "no limit" when only OFFSET is given
    fn unbounded_limit(&self) -> u64;

    /// Map a collection name to its table name.
    ///
    /// `/` separates collection namespaces and becomes `_`.
    fn table_name(&self, collection: &str) -> Result<String> {
        let table = collection.replace('/', "_");
        validate_sql_identifier(&table, self.max_identifier_length()).map_err(|e| {
            Error::config(format!("invalid collection name '{}': {}", collection, e))
        })?;
        Ok(table)
    }

    /// DDL creating a collection table if it does not exist
    fn create_collection_sql(&self, table: &str) -> Vec<String>;

    /// DDL dropping a collection table
    fn drop_collection_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.quote_identifier(table))
    }

    /// Query listing collection tables, one `name` column
    fn list_tables_sql(&self) -> String;

    /// Query returning a row when `column` already exists on `table`.
    ///
    /// `None` when promotion DDL is idempotent by itself.
    fn column_exists_sql(&self, table: &str, column: &str) -> Option<Predicate>;

    /// DDL promoting a JSON path to an indexed column or expression index
    fn promote_field_sql(&self, table: &str, field: &str, json_path: &str) -> Vec<String>;

    /// Name of the generated column backing a promoted field
    fn promoted_column_name(&self, field: &str) -> String {
        let mut name = format!("_f_{}", path_slug(field));
        name.truncate(self.max_identifier_length());
        name
    }

    /// Name of the index backing a promoted field
    fn promoted_index_name(&self, table: &str, field: &str) -> String {
        let mut name = format!("{}_{}_idx", table, path_slug(field));
        name.truncate(self.max_identifier_length());
        name
    }

    /// Raw JSON value at `path` of the payload column
    fn json_extract(&self, json_path: &str) -> String;

    /// Typed equality on a JSON path
    fn json_eq(&self, json_path: &str, value: &serde_json::Value) -> Result<Predicate>;

    /// Typed ordering comparison on a JSON path (numbers and strings only)
    fn json_compare(
        &self,
        json_path: &str,
        op: Comparison,
        value: &serde_json::Value,
    ) -> Result<Predicate>;

    /// Path presence test
    fn json_exists(&self, json_path: &str) -> Predicate;

    /// Array length equality
    fn json_array_size(&self, json_path: &str, size: u64) -> Predicate;

    /// Regular expression match on a string value
    fn json_regex(&self, json_path: &str, pattern: &str, case_insensitive: bool) -> Predicate;

    /// Build a SELECT statement
    fn build_select(&self, spec: &SelectSpec<'_>) -> String;

    /// Build a COUNT(*) statement returning a `total` column
    fn build_count(&self, table: &str, filter: Option<&str>) -> String;

    /// Build a single-row INSERT of a document payload (one parameter)
    fn build_insert(&self, table: &str) -> String;

    /// Build an UPDATE of the payload by row id (payload, id parameters)
    fn build_update_document(&self, table: &str) -> String;

    /// Build a DELETE statement
    fn build_delete(&self, table: &str, filter: Option<&str>) -> String;

    /// JSON path literal, quoted for inlining
    fn path_literal(&self, json_path: &str) -> String {
        format!("'{}'", escape_string_literal(json_path))
    }
}

macro_rules! impl_statement_builders {
    ($builder:expr) => {
        fn build_select(&self, spec: &SelectSpec<'_>) -> String {
            select_statement(spec, self.unbounded_limit()).to_string($builder)
        }

        fn build_count(&self, table: &str, filter: Option<&str>) -> String {
            count_statement(table, filter).to_string($builder)
        }

        fn build_insert(&self, table: &str) -> String {
            Query::insert()
                .into_table(Alias::new(table))
                .columns([Alias::new(DOCUMENT_COLUMN)])
                .values_panic([Expr::cust("?")])
                .to_string($builder)
        }

        fn build_update_document(&self, table: &str) -> String {
            Query::update()
                .table(Alias::new(table))
                .value(Alias::new(DOCUMENT_COLUMN), Expr::cust("?"))
                .and_where(Expr::cust(format!(
                    "{} = ?",
                    self.quote_identifier(ROW_ID_COLUMN)
                )))
                .to_string($builder)
        }

        fn build_delete(&self, table: &str, filter: Option<&str>) -> String {
            let mut stmt = Query::delete();
            stmt.from_table(Alias::new(table));
            if let Some(w) = filter {
                stmt.and_where(Expr::cust(w));
            }
            stmt.to_string($builder)
        }
    };
}

// ===========================================================================
// MySQL / MariaDB
// ===========================================================================

/// MySQL dialect (MySQL 5.7.9+, MariaDB 10.2.6+)
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

const MYSQL_NUMBER_TYPES: &str = "'INTEGER', 'UNSIGNED INTEGER', 'DOUBLE', 'DECIMAL'";

impl MySqlDialect {
    fn json_type(&self, json_path: &str) -> String {
        format!("JSON_TYPE({})", self.json_extract(json_path))
    }

    fn json_unquote(&self, json_path: &str) -> String {
        format!("JSON_UNQUOTE({})", self.json_extract(json_path))
    }
}

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn max_identifier_length(&self) -> usize {
        64
    }

    fn unbounded_limit(&self) -> u64 {
        u64::MAX
    }

    fn create_collection_sql(&self, table: &str) -> Vec<String> {
        vec![format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             {id} BIGINT UNSIGNED NOT NULL AUTO_INCREMENT, \
             {doc} JSON NOT NULL, \
             {vid} VARCHAR(128) GENERATED ALWAYS AS ({extract}) VIRTUAL, \
             PRIMARY KEY ({id}), \
             UNIQUE KEY {uniq} ({vid})\
             ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci",
            table = self.quote_identifier(table),
            id = self.quote_identifier(ROW_ID_COLUMN),
            doc = self.quote_identifier(DOCUMENT_COLUMN),
            vid = self.quote_identifier(ID_COLUMN),
            extract = self.json_unquote("$.\"_id\""),
            uniq = self.quote_identifier(&format!("{}_id_unique", table)),
        )]
    }

    fn list_tables_sql(&self) -> String {
        "SELECT table_name AS name FROM information_schema.tables \
         WHERE table_schema = DATABASE() ORDER BY table_name"
            .to_string()
    }

    fn column_exists_sql(&self, table: &str, column: &str) -> Option<Predicate> {
        Some(Predicate::new(
            "SELECT 1 FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
            vec![Value::from(table), Value::from(column)],
        ))
    }

    fn promote_field_sql(&self, table: &str, field: &str, json_path: &str) -> Vec<String> {
        let column = self.promoted_column_name(field);
        vec![format!(
            "ALTER TABLE {} ADD COLUMN {} VARCHAR(255) GENERATED ALWAYS AS ({}) VIRTUAL, ADD INDEX {} ({})",
            self.quote_identifier(table),
            self.quote_identifier(&column),
            self.json_unquote(json_path),
            self.quote_identifier(&self.promoted_index_name(table, field)),
            self.quote_identifier(&column),
        )]
    }

    fn json_extract(&self, json_path: &str) -> String {
        format!(
            "JSON_EXTRACT({}, {})",
            self.quote_identifier(DOCUMENT_COLUMN),
            self.path_literal(json_path)
        )
    }

    fn json_eq(&self, json_path: &str, value: &serde_json::Value) -> Result<Predicate> {
        use serde_json::Value as J;

        let ty = self.json_type(json_path);
        Ok(match value {
            J::Null => Predicate::raw(format!(
                "{} IS NULL OR {} = 'NULL'",
                self.json_extract(json_path),
                ty
            )),
            J::Bool(b) => Predicate::new(
                format!("{} = 'BOOLEAN' AND {} = ?", ty, self.json_unquote(json_path)),
                vec![Value::from(if *b { "true" } else { "false" })],
            ),
            J::Number(_) => Predicate::new(
                format!(
                    "{} IN ({}) AND {} = ?",
                    ty,
                    MYSQL_NUMBER_TYPES,
                    self.json_extract(json_path)
                ),
                vec![number_param(value)?],
            ),
            J::String(s) => Predicate::new(
                format!("{} = 'STRING' AND {} = ?", ty, self.json_unquote(json_path)),
                vec![Value::from(s.as_str())],
            ),
            J::Array(_) | J::Object(_) => {
                let kind = if value.is_array() { "ARRAY" } else { "OBJECT" };
                let text = value.to_string();
                Predicate::new(
                    format!(
                        "{ty} = '{kind}' AND JSON_CONTAINS({x}, ?) AND JSON_CONTAINS(?, {x})",
                        ty = ty,
                        kind = kind,
                        x = self.json_extract(json_path)
                    ),
                    vec![Value::from(text.clone()), Value::from(text)],
                )
            }
        })
    }

    fn json_compare(
        &self,
        json_path: &str,
        op: Comparison,
        value: &serde_json::Value,
    ) -> Result<Predicate> {
        let ty = self.json_type(json_path);
        match value {
            serde_json::Value::Number(_) => Ok(Predicate::new(
                format!(
                    "{} IN ({}) AND {} {} ?",
                    ty,
                    MYSQL_NUMBER_TYPES,
                    self.json_extract(json_path),
                    op.as_sql()
                ),
                vec![number_param(value)?],
            )),
            serde_json::Value::String(s) => Ok(Predicate::new(
                format!(
                    "{} = 'STRING' AND {} {} ?",
                    ty,
                    self.json_unquote(json_path),
                    op.as_sql()
                ),
                vec![Value::from(s.as_str())],
            )),
            other => Err(Error::unsupported_query(format!(
                "cannot compare with {} using {}",
                other,
                op.as_sql()
            ))),
        }
    }

    fn json_exists(&self, json_path: &str) -> Predicate {
        Predicate::raw(format!(
            "JSON_CONTAINS_PATH({}, 'one', {})",
            self.quote_identifier(DOCUMENT_COLUMN),
            self.path_literal(json_path)
        ))
    }

    fn json_array_size(&self, json_path: &str, size: u64) -> Predicate {
        Predicate::new(
            format!(
                "{} = 'ARRAY' AND JSON_LENGTH({}) = ?",
                self.json_type(json_path),
                self.json_extract(json_path)
            ),
            vec![Value::Int64(size as i64)],
        )
    }

    fn json_regex(&self, json_path: &str, pattern: &str, case_insensitive: bool) -> Predicate {
        let subject = if case_insensitive {
            format!(
                "CONVERT({} USING utf8mb4) COLLATE utf8mb4_unicode_ci",
                self.json_unquote(json_path)
            )
        } else {
            self.json_unquote(json_path)
        };
        Predicate::new(
            format!(
                "{} = 'STRING' AND {} REGEXP ?",
                self.json_type(json_path),
                subject
            ),
            vec![Value::from(pattern)],
        )
    }

    impl_statement_builders!(MysqlQueryBuilder);
}

// ===========================================================================
// SQLite (JSON1)
// ===========================================================================

/// SQLite dialect (3.31.0+ with JSON1)
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    fn json_type(&self, json_path: &str) -> String {
        format!(
            "json_type({}, {})",
            self.quote_identifier(DOCUMENT_COLUMN),
            self.path_literal(json_path)
        )
    }
}

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn max_identifier_length(&self) -> usize {
        255
    }

    fn unbounded_limit(&self) -> u64 {
        i64::MAX as u64
    }

    fn create_collection_sql(&self, table: &str) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 {id} INTEGER PRIMARY KEY AUTOINCREMENT, \
                 {doc} TEXT NOT NULL CHECK (json_valid({doc})), \
                 {vid} TEXT GENERATED ALWAYS AS (CAST({extract} AS TEXT)) VIRTUAL\
                 )",
                table = self.quote_identifier(table),
                id = self.quote_identifier(ROW_ID_COLUMN),
                doc = self.quote_identifier(DOCUMENT_COLUMN),
                vid = self.quote_identifier(ID_COLUMN),
                extract = self.json_extract("$.\"_id\""),
            ),
            format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                self.quote_identifier(&format!("{}_id_unique", table)),
                self.quote_identifier(table),
                self.quote_identifier(ID_COLUMN),
            ),
        ]
    }

    fn list_tables_sql(&self) -> String {
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
            .to_string()
    }

    fn column_exists_sql(&self, _table: &str, _column: &str) -> Option<Predicate> {
        None
    }

    fn promote_field_sql(&self, table: &str, field: &str, json_path: &str) -> Vec<String> {
        // Expression index; the planner picks it up for matching json_extract() terms
        vec![format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            self.quote_identifier(&self.promoted_index_name(table, field)),
            self.quote_identifier(table),
            self.json_extract(json_path),
        )]
    }

    fn json_extract(&self, json_path: &str) -> String {
        format!(
            "json_extract({}, {})",
            self.quote_identifier(DOCUMENT_COLUMN),
            self.path_literal(json_path)
        )
    }

    fn json_eq(&self, json_path: &str, value: &serde_json::Value) -> Result<Predicate> {
        use serde_json::Value as J;

        let ty = self.json_type(json_path);
        Ok(match value {
            J::Null => Predicate::raw(format!("{} IS NULL", self.json_extract(json_path))),
            J::Bool(b) => Predicate::raw(format!(
                "{} = '{}'",
                ty,
                if *b { "true" } else { "false" }
            )),
            J::Number(_) => Predicate::new(
                format!(
                    "{} IN ('integer', 'real') AND {} = ?",
                    ty,
                    self.json_extract(json_path)
                ),
                vec![number_param(value)?],
            ),
            J::String(s) => Predicate::new(
                format!("{} = 'text' AND {} = ?", ty, self.json_extract(json_path)),
                vec![Value::from(s.as_str())],
            ),
            J::Array(_) | J::Object(_) => {
                let kind = if value.is_array() { "array" } else { "object" };
                Predicate::new(
                    format!(
                        "{} = '{}' AND {} = json(?)",
                        ty,
                        kind,
                        self.json_extract(json_path)
                    ),
                    vec![Value::from(value.to_string())],
                )
            }
        })
    }

    fn json_compare(
        &self,
        json_path: &str,
        op: Comparison,
        value: &serde_json::Value,
    ) -> Result<Predicate> {
        let (types, param) = match value {
            serde_json::Value::Number(_) => ("'integer', 'real'", number_param(value)?),
            serde_json::Value::String(s) => ("'text'", Value::from(s.as_str())),
            other => {
                return Err(Error::unsupported_query(format!(
                    "cannot compare with {} using {}",
                    other,
                    op.as_sql()
                )))
            }
        };
        Ok(Predicate::new(
            format!(
                "{} IN ({}) AND {} {} ?",
                self.json_type(json_path),
                types,
                self.json_extract(json_path),
                op.as_sql()
            ),
            vec![param],
        ))
    }

    fn json_exists(&self, json_path: &str) -> Predicate {
        Predicate::raw(format!("{} IS NOT NULL", self.json_type(json_path)))
    }

    fn json_array_size(&self, json_path: &str, size: u64) -> Predicate {
        Predicate::new(
            format!(
                "{} = 'array' AND json_array_length({}, {}) = ?",
                self.json_type(json_path),
                self.quote_identifier(DOCUMENT_COLUMN),
                self.path_literal(json_path)
            ),
            vec![Value::Int64(size as i64)],
        )
    }

    fn json_regex(&self, json_path: &str, pattern: &str, case_insensitive: bool) -> Predicate {
        // `X REGEXP Y` calls the regexp() function registered on connect
        let pattern = if case_insensitive {
            format!("(?i){}", pattern)
        } else {
            pattern.to_string()
        };
        Predicate::new(
            format!(
                "{} = 'text' AND {} REGEXP ?",
                self.json_type(json_path),
                self.json_extract(json_path)
            ),
            vec![Value::String(pattern)],
        )
    }

    impl_statement_builders!(SqliteQueryBuilder);
}

/// Bind a JSON number as the narrowest SQL numeric type
fn number_param(value: &serde_json::Value) -> Result<Value> {
    if let Some(i) = value.as_i64() {
        return Ok(Value::Int64(i));
    }
    value
        .as_f64()
        .map(Value::Float64)
        .ok_or_else(|| Error::unsupported_query(format!("number {} out of range", value)))
}

/// Get a dialect by driver name
pub fn dialect_for(name: &str) -> Option<Box<dyn SqlDialect>> {
    match name.to_lowercase().as_str() {
        "mysql" | "mariadb" => Some(Box::new(MySqlDialect)),
        "sqlite" | "sqlite3" => Some(Box::new(SqliteDialect)),
        _ => None,
    }
}
