// ABOUTME: SQL execution provider abstraction used by the sync engine
// ABOUTME: Rows with by-name access, streaming cursors and batched DML

pub mod mssql;
pub mod value;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

pub use value::{FilterValue, NullKind, SqlValue};

/// One row of introspection metadata: `(table_name, column_name, data_type, primary_key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMetadata {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub primary_key: bool,
}

impl ColumnMetadata {
    pub fn new(table: &str, column: &str, data_type: &str, primary_key: bool) -> Self {
        Self {
            table_name: table.to_string(),
            column_name: column.to_string(),
            data_type: data_type.to_string(),
            primary_key,
        }
    }
}

/// A result row. Column lookup by name is case-insensitive.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .map(|idx| &self.values[idx])
    }

    pub fn get_index(&self, idx: usize) -> Option<&SqlValue> {
        self.values.get(idx)
    }
}

/// A forward-only cursor over query results.
pub type RowStream<'a> = BoxStream<'a, Result<Row>>;

/// Everything the engine needs from a database connection.
///
/// Placeholders in SQL text are `@P1`, `@P2`, ... in binding order.
#[async_trait]
pub trait Connection: Send {
    /// Introspection rows for every user table.
    async fn columns(&mut self) -> Result<Vec<ColumnMetadata>>;

    /// Names of the enabled foreign-key and check constraints on `table`.
    async fn enabled_constraints(&mut self, table: &str) -> Result<Vec<String>>;

    /// Run a query and stream its rows. The stream borrows the connection
    /// until it is dropped.
    async fn query<'a>(&'a mut self, sql: &str, params: &[SqlValue]) -> Result<RowStream<'a>>;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;
}
