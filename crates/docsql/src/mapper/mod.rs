//! Document-to-relational mapping
//!
//! [`DocumentMapper`] turns collection operations into statements for one
//! dialect and decodes result rows back into documents. It holds no state
//! besides the dialect; the driver decides when statements run.

mod filter;
mod projection;
mod update;

pub use filter::compile_filter;
pub use projection::Projection;
pub use update::UpdateSpec;

use serde_json::Value as JsonValue;
use std::sync::Arc;

use crate::dialect::{
    OrderTerm, Predicate, SelectSpec, SqlDialect, DOCUMENT_COLUMN, ID_COLUMN, ROW_ID_COLUMN,
};
use crate::document::{into_document, Document, ID_FIELD};
use crate::error::{Error, Result};
use crate::security::{json_path, parse_field_path};
use crate::types::{Row, Value};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

/// Read options for `find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Filter document (`null` matches everything)
    pub filter: JsonValue,
    /// Projection document (`null` returns whole documents)
    pub projection: JsonValue,
    /// Sort keys, applied in order; insertion order breaks ties
    pub sort: Vec<(String, SortOrder)>,
    /// Maximum number of documents
    pub limit: Option<u64>,
    /// Number of documents to skip
    pub skip: Option<u64>,
}

impl FindOptions {
    /// Options matching every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter
    pub fn filter(mut self, filter: JsonValue) -> Self {
        self.filter = filter;
        self
    }

    /// Set the projection
    pub fn projection(mut self, projection: JsonValue) -> Self {
        self.projection = projection;
        self
    }

    /// Add a sort key
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Set the limit
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of documents to skip
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// A compiled read: statement plus the projection to apply on decode
#[derive(Debug, Clone)]
pub struct CompiledFind {
    /// SELECT statement
    pub sql: String,
    /// Bound parameters
    pub params: Vec<Value>,
    /// Projection applied to each decoded document
    pub projection: Projection,
}

/// Translates collection operations into statements for one dialect
#[derive(Clone)]
pub struct DocumentMapper {
    dialect: Arc<dyn SqlDialect>,
}

impl std::fmt::Debug for DocumentMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentMapper")
            .field("dialect", &self.dialect.name())
            .finish()
    }
}

impl DocumentMapper {
    /// Create a mapper for a dialect
    pub fn new(dialect: Arc<dyn SqlDialect>) -> Self {
        Self { dialect }
    }

    /// The dialect statements are generated for
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Table backing a collection
    pub fn table_name(&self, collection: &str) -> Result<String> {
        self.dialect.table_name(collection)
    }

    /// Compile a filter into a WHERE predicate
    pub fn compile_filter(&self, filter: &JsonValue) -> Result<Predicate> {
        compile_filter(self.dialect.as_ref(), filter)
    }

    /// DDL creating the collection table
    pub fn create_collection_sql(&self, table: &str) -> Vec<String> {
        self.dialect.create_collection_sql(table)
    }

    /// Column name and DDL promoting a document field
    pub fn promote_field_sql(&self, table: &str, field: &str) -> Result<(String, Vec<String>)> {
        let path = json_path(&parse_field_path(field)?);
        Ok((
            self.dialect.promoted_column_name(field),
            self.dialect.promote_field_sql(table, field, &path),
        ))
    }

    fn sort_terms(&self, sort: &[(String, SortOrder)]) -> Result<Vec<OrderTerm>> {
        let mut terms = Vec::with_capacity(sort.len() + 1);
        for (field, order) in sort {
            let expr = if field == ID_FIELD {
                self.dialect.quote_identifier(ID_COLUMN)
            } else {
                self.dialect
                    .json_extract(&json_path(&parse_field_path(field)?))
            };
            terms.push(OrderTerm {
                expr,
                ascending: *order == SortOrder::Asc,
            });
        }
        terms.push(OrderTerm {
            expr: self.dialect.quote_identifier(ROW_ID_COLUMN),
            ascending: true,
        });
        Ok(terms)
    }

    /// Compile a read; every validation error surfaces here.
    pub fn find(&self, table: &str, options: &FindOptions) -> Result<CompiledFind> {
        let projection = Projection::parse(&options.projection)?;
        let predicate = self.compile_filter(&options.filter)?;
        let order_by = self.sort_terms(&options.sort)?;

        let sql = self.dialect.build_select(&SelectSpec {
            table,
            columns: &[ROW_ID_COLUMN, DOCUMENT_COLUMN],
            filter: Some(&predicate.sql),
            order_by: &order_by,
            limit: options.limit,
            offset: options.skip,
        });

        Ok(CompiledFind {
            sql,
            params: predicate.params,
            projection,
        })
    }

    /// COUNT statement for a filter
    pub fn count(&self, table: &str, filter: &JsonValue) -> Result<Predicate> {
        let predicate = self.compile_filter(filter)?;
        Ok(Predicate::new(
            self.dialect.build_count(table, Some(&predicate.sql)),
            predicate.params,
        ))
    }

    /// DELETE statement for a filter
    pub fn delete(&self, table: &str, filter: &JsonValue) -> Result<Predicate> {
        let predicate = self.compile_filter(filter)?;
        Ok(Predicate::new(
            self.dialect.build_delete(table, Some(&predicate.sql)),
            predicate.params,
        ))
    }

    /// INSERT statement for one document
    pub fn insert(&self, table: &str, doc: &Document) -> Result<Predicate> {
        Ok(Predicate::new(
            self.dialect.build_insert(table),
            vec![Value::String(serde_json::to_string(doc)?)],
        ))
    }

    /// UPDATE statement replacing the payload of one row
    pub fn replace_row(&self, table: &str, row_id: i64, doc: &Document) -> Result<Predicate> {
        Ok(Predicate::new(
            self.dialect.build_update_document(table),
            vec![
                Value::String(serde_json::to_string(doc)?),
                Value::Int64(row_id),
            ],
        ))
    }

    /// Decode an `(id, document)` row
    pub fn decode_row(&self, row: &Row) -> Result<(i64, Document)> {
        let row_id = row
            .get_by_name(ROW_ID_COLUMN)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::query("result row has no row id"))?;
        let payload = row
            .get_by_name(DOCUMENT_COLUMN)
            .ok_or_else(|| Error::query("result row has no document column"))?
            .to_json()?;
        Ok((row_id, into_document(payload)?))
    }
}
