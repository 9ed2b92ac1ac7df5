// ABOUTME: Column and table model built from introspection metadata
// ABOUTME: Computes the common (intersected) table each source/destination pair is compared on

pub mod types;

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::db::{ColumnMetadata, Connection};
use crate::error::{Result, SyncError};

pub use types::{HashKind, TypeClass};

/// A column as reported by introspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
    pub type_class: TypeClass,
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: &str, data_type: &str, primary_key: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type: data_type.to_string(),
            type_class: TypeClass::from_type_name(data_type),
            primary_key,
        }
    }
}

/// A table and its columns.
///
/// Columns are keyed by lower-cased name, which also fixes the column order
/// every generated statement uses.
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: BTreeMap<String, Column>,
    pk: OnceLock<Vec<Column>>,
}

impl Table {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: BTreeMap::new(),
            pk: OnceLock::new(),
        }
    }

    /// Build a table from its columns in one go.
    pub fn with_columns(name: &str, columns: impl IntoIterator<Item = Column>) -> Self {
        let mut table = Self::new(name);
        for col in columns {
            table.columns.insert(col.name.to_lowercase(), col);
        }
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Columns in statement order.
    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(&name.to_lowercase())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(&name.to_lowercase())
    }

    /// Primary-key columns in statement order. Computed on first use.
    pub fn primary_key(&self) -> &[Column] {
        self.pk.get_or_init(|| {
            self.columns
                .values()
                .filter(|c| c.primary_key)
                .cloned()
                .collect()
        })
    }

    /// Columns outside the primary key, in statement order.
    pub fn non_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.values().filter(|c| !c.primary_key)
    }
}

impl PartialEq for Table {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for Table {}

/// Group introspection rows into tables, keeping first-seen table order.
///
/// A row with an empty column name declares a table without adding a
/// column; a table left with no columns is a schema error.
pub fn build_tables(rows: Vec<ColumnMetadata>) -> Result<Vec<Table>> {
    let mut tables: Vec<Table> = Vec::new();
    let mut index: BTreeMap<String, usize> = BTreeMap::new();

    for row in rows {
        let slot = *index
            .entry(row.table_name.to_lowercase())
            .or_insert_with(|| {
                tables.push(Table::new(&row.table_name));
                tables.len() - 1
            });
        if row.column_name.is_empty() {
            continue;
        }
        let col = Column::new(&row.column_name, &row.data_type, row.primary_key);
        tables[slot].columns.insert(col.name.to_lowercase(), col);
    }

    if let Some(empty) = tables.iter().find(|t| t.columns.is_empty()) {
        return Err(SyncError::schema(empty.name(), "table has no columns"));
    }
    Ok(tables)
}

/// Load every table visible on a connection.
pub async fn load_tables(conn: &mut dyn Connection) -> Result<Vec<Table>> {
    let rows = conn.columns().await?;
    let tables = build_tables(rows)?;
    tracing::debug!("Loaded {} tables", tables.len());
    Ok(tables)
}

/// Keep only tables that have a primary key.
pub fn synchronizable(tables: Vec<Table>) -> Vec<Table> {
    tables
        .into_iter()
        .filter(|t| {
            let keep = !t.primary_key().is_empty();
            if !keep {
                tracing::debug!("Skipping {}: no primary key", t.name());
            }
            keep
        })
        .collect()
}

/// Build the virtual table holding the columns both sides share.
///
/// Column definitions come from the source.
pub fn common_table(source: &Table, destination: &Table) -> Result<Table> {
    let columns = source
        .columns()
        .filter(|c| destination.has_column(&c.name))
        .cloned();
    let table = Table::with_columns(source.name(), columns);

    if table.column_count() == 0 {
        return Err(SyncError::schema(source.name(), "no columns in common"));
    }
    if table.primary_key().is_empty() {
        return Err(SyncError::schema(
            source.name(),
            "no primary-key column in common",
        ));
    }
    Ok(table)
}

/// Pair source and destination tables by name, minus ignored names.
///
/// Matching is case-insensitive. Pairs come back sorted by name.
pub fn pair_tables(
    source: Vec<Table>,
    destination: Vec<Table>,
    ignore: &[String],
) -> Vec<(Table, Table)> {
    let mut dest_by_name: BTreeMap<String, Table> = destination
        .into_iter()
        .map(|t| (t.name().to_lowercase(), t))
        .collect();

    let mut pairs: Vec<(Table, Table)> = source
        .into_iter()
        .filter(|t| !ignore.iter().any(|i| i.eq_ignore_ascii_case(t.name())))
        .filter_map(|src| {
            dest_by_name
                .remove(&src.name().to_lowercase())
                .map(|dst| (src, dst))
        })
        .collect();
    pairs.sort_by_key(|(src, _)| src.name().to_lowercase());
    pairs
}
