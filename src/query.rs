// ABOUTME: T-SQL statement construction for one common table
// ABOUTME: Hashed scans, by-key select/delete, insert/update, counts and constraint toggles

use std::borrow::Borrow;

use crate::db::{Row, SqlValue};
use crate::error::{Result, SyncError};
use crate::filter::Filter;
use crate::key::Key;
use crate::schema::{Column, HashKind, Table};
use crate::utils::quote_ident;

/// Alias of the aggregate hash column in hashed scans.
pub const HASH_COLUMN: &str = "Hash";

/// Characters of a text value that take part in its hash.
pub const TEXT_HASH_LENGTH: usize = 500;

/// Transaction control around one chunk of inserts or updates.
pub const BEGIN_TRANSACTION: &str = "BEGIN TRANSACTION";
pub const COMMIT_TRANSACTION: &str = "COMMIT TRANSACTION";
pub const ROLLBACK_TRANSACTION: &str = "ROLLBACK TRANSACTION";

/// SQL text plus the parameters it binds, in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// The hash expression contributed by one column.
///
/// NULL hashes the bytes of `convert(varbinary, 0)`. That sentinel is the
/// same as a stored 4-byte zero, so an `int` column changing between NULL
/// and 0 is not detected.
pub fn column_hash_expression(table: &str, col: &Column) -> Result<String> {
    let ident = quote_ident(&col.name);
    let value = match col.type_class.hash_kind() {
        Some(HashKind::Fixed) => format!("convert(varbinary(max), {})", ident),
        Some(HashKind::Text) => format!(
            "convert(varbinary(max), left(convert(nvarchar(max), {}), {}))",
            ident, TEXT_HASH_LENGTH
        ),
        None => {
            return Err(SyncError::Type {
                table: table.to_string(),
                column: col.name.clone(),
                data_type: col.data_type.clone(),
            })
        }
    };
    Ok(format!(
        "HASHBYTES('md5', case when {} is null then convert(varbinary, 0) else {} end)",
        ident, value
    ))
}

/// `ALTER TABLE ... NOCHECK CONSTRAINT ...`
pub fn disable_constraint_sql(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} NOCHECK CONSTRAINT {}",
        quote_ident(table),
        quote_ident(constraint)
    )
}

/// `ALTER TABLE ... CHECK CONSTRAINT ...`
pub fn enable_constraint_sql(table: &str, constraint: &str) -> String {
    format!(
        "ALTER TABLE {} CHECK CONSTRAINT {}",
        quote_ident(table),
        quote_ident(constraint)
    )
}

/// ORDER BY term for one key column.
///
/// Character keys are ordered by the UTF-16LE bytes of their Unicode value,
/// which is the order [`KeyValue::Text`](crate::key::KeyValue::Text) uses,
/// whatever the column's collation or code page.
pub fn key_order_expression(col: &Column) -> String {
    let ident = quote_ident(&col.name);
    if col.type_class.is_character() {
        format!("convert(varbinary(max), convert(nvarchar(max), {}))", ident)
    } else {
        ident
    }
}

/// Builds every statement the engine runs against one table.
pub struct QueryBuilder<'a> {
    table: &'a Table,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self { table }
    }

    fn table_ident(&self) -> String {
        quote_ident(self.table.name())
    }

    fn where_filter(&self, filter: Option<&Filter>) -> (String, Vec<SqlValue>) {
        match filter.and_then(|f| f.predicate(self.table, 1)) {
            Some((predicate, params)) => (format!("\nwhere {}", predicate), params),
            None => (String::new(), Vec::new()),
        }
    }

    /// Primary-key columns plus one aggregate hash per row, ordered by key.
    ///
    /// Fails with [`SyncError::Type`] if any column type cannot be hashed.
    pub fn hashed_scan(&self, filter: Option<&Filter>) -> Result<Statement> {
        let hashes = self
            .table
            .columns()
            .map(|c| column_hash_expression(self.table.name(), c))
            .collect::<Result<Vec<_>>>()?;

        let pk = self.table.primary_key();
        let select_pk: Vec<String> = pk.iter().map(|c| quote_ident(&c.name)).collect();
        let order_pk: Vec<String> = pk.iter().map(key_order_expression).collect();

        let (where_clause, params) = self.where_filter(filter);
        let sql = format!(
            "select\n\t{},\n\tHASHBYTES('md5',\n\t\t{}\n\t) as {}\nfrom {}{}\norder by {}",
            select_pk.join(", "),
            hashes.join("+\n\t\t"),
            quote_ident(HASH_COLUMN),
            self.table_ident(),
            where_clause,
            order_pk.join(", ")
        );
        Ok(Statement { sql, params })
    }

    /// `count(*)` under the same filter as the hashed scan.
    pub fn row_count(&self, filter: Option<&Filter>) -> Statement {
        let (where_clause, params) = self.where_filter(filter);
        Statement {
            sql: format!("select count(*)\nfrom {}{}", self.table_ident(), where_clause),
            params,
        }
    }

    /// `(pk1=@P1 and pk2=@P2) or (...)`, with parameters key by key.
    fn key_predicate<K: Borrow<Key>>(&self, keys: &[K]) -> (String, Vec<SqlValue>) {
        let pk = self.table.primary_key();
        let mut params = Vec::with_capacity(keys.len() * pk.len());
        let mut clauses = Vec::with_capacity(keys.len());
        for key in keys {
            let parts: Vec<String> = pk
                .iter()
                .zip(key.borrow().params())
                .map(|(col, value)| {
                    params.push(value);
                    format!("{}=@P{}", quote_ident(&col.name), params.len())
                })
                .collect();
            clauses.push(format!("({})", parts.join(" and ")));
        }
        (clauses.join("\n\tor "), params)
    }

    /// Full rows for a set of keys.
    pub fn select_by_keys<K: Borrow<Key>>(&self, keys: &[K]) -> Statement {
        let columns: Vec<String> = self
            .table
            .columns()
            .map(|c| quote_ident(&c.name))
            .collect();
        let (predicate, params) = self.key_predicate(keys);
        Statement {
            sql: format!(
                "select {}\nfrom {}\nwhere {}",
                columns.join(", "),
                self.table_ident(),
                predicate
            ),
            params,
        }
    }

    /// Delete the rows for a set of keys.
    pub fn delete_by_keys<K: Borrow<Key>>(&self, keys: &[K]) -> Statement {
        let (predicate, params) = self.key_predicate(keys);
        Statement {
            sql: format!("delete\nfrom {}\nwhere {}", self.table_ident(), predicate),
            params,
        }
    }

    /// Insert of `rows` rows in one statement, every column in table order.
    /// Parameters are row by row, as [`insert_params`](Self::insert_params)
    /// produces them.
    pub fn insert(&self, rows: usize) -> String {
        let names: Vec<String> = self
            .table
            .columns()
            .map(|c| format!("\n\t{}", quote_ident(&c.name)))
            .collect();
        let width = names.len();
        let groups: Vec<String> = (0..rows.max(1))
            .map(|r| {
                let placeholders: Vec<String> = (1..=width)
                    .map(|i| format!("@P{}", r * width + i))
                    .collect();
                format!("({})", placeholders.join(", "))
            })
            .collect();
        format!(
            "insert into {} ({}\n) values {}",
            self.table_ident(),
            names.join(","),
            groups.join(",\n\t")
        )
    }

    /// Update of one row: non-key columns set, key columns matched.
    ///
    /// Returns `None` when every column belongs to the key.
    pub fn update(&self) -> Option<String> {
        let mut n = 0;
        let set: Vec<String> = self
            .table
            .non_key_columns()
            .map(|c| {
                n += 1;
                format!("\t{}=@P{}", quote_ident(&c.name), n)
            })
            .collect();
        if set.is_empty() {
            return None;
        }
        let filter: Vec<String> = self
            .table
            .primary_key()
            .iter()
            .map(|c| {
                n += 1;
                format!("{}=@P{}", quote_ident(&c.name), n)
            })
            .collect();
        Some(format!(
            "update {} set\n{}\nwhere {}",
            self.table_ident(),
            set.join(",\n"),
            filter.join("\n\tand ")
        ))
    }

    /// `SET IDENTITY_INSERT [t] ON|OFF`
    pub fn identity_insert(&self, enabled: bool) -> String {
        format!(
            "SET IDENTITY_INSERT {} {}",
            self.table_ident(),
            if enabled { "ON" } else { "OFF" }
        )
    }

    fn value_of(&self, row: &Row, col: &Column) -> Result<SqlValue> {
        row.get(&col.name).cloned().ok_or_else(|| {
            SyncError::database(format!(
                "Column {} missing from row read for {}",
                col.name,
                self.table.name()
            ))
        })
    }

    /// Parameters for [`insert`](Self::insert): every column in table order.
    pub fn insert_params(&self, row: &Row) -> Result<Vec<SqlValue>> {
        self.table
            .columns()
            .map(|c| self.value_of(row, c))
            .collect()
    }

    /// Parameters for [`update`](Self::update): non-key columns, then key columns.
    pub fn update_params(&self, row: &Row) -> Result<Vec<SqlValue>> {
        self.table
            .non_key_columns()
            .chain(self.table.primary_key().iter())
            .map(|c| self.value_of(row, c))
            .collect()
    }
}
