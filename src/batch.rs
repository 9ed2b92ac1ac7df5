// ABOUTME: Applies change sets to the destination in chunks bounded by the parameter ceiling
// ABOUTME: Inserts and updates re-read full rows from the source; deletes go by key

use std::collections::BTreeSet;

use futures::TryStreamExt;

use crate::db::{Connection, Row};
use crate::error::{Result, SyncError};
use crate::key::Key;
use crate::query::{
    QueryBuilder, Statement, BEGIN_TRANSACTION, COMMIT_TRANSACTION, ROLLBACK_TRANSACTION,
};
use crate::schema::Table;

/// Default ceiling on bound parameters per statement.
pub const DEFAULT_PARAMETER_LIMIT: usize = 1999;

/// Keys per chunk: `max(1, limit / key_columns)`.
pub fn chunk_size(parameter_limit: usize, key_columns: usize) -> usize {
    (parameter_limit / key_columns.max(1)).max(1)
}

/// Applies one table's change set.
pub struct BatchExecutor<'a> {
    table: &'a Table,
    queries: QueryBuilder<'a>,
    chunk_size: usize,
    rows_per_insert: usize,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(table: &'a Table, parameter_limit: usize) -> Self {
        Self {
            table,
            queries: QueryBuilder::new(table),
            chunk_size: chunk_size(parameter_limit, table.primary_key().len()),
            rows_per_insert: chunk_size(parameter_limit, table.column_count()),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    fn batch_error(&self, sql: &str, err: SyncError) -> SyncError {
        SyncError::Batch {
            table: self.table.name().to_string(),
            sql: sql.to_string(),
            message: err.to_string(),
        }
    }

    async fn fetch(&self, source: &mut dyn Connection, keys: &[&Key]) -> Result<Vec<Row>> {
        let Statement { sql, params } = self.queries.select_by_keys(keys);
        tracing::debug!("{}", sql);
        let rows = async {
            let stream = source.query(&sql, &params).await?;
            stream.try_collect::<Vec<Row>>().await
        }
        .await
        .map_err(|e| self.batch_error(&sql, e))?;
        Ok(rows)
    }

    /// Toggle identity insert. Tables without an identity column reject
    /// this, which is expected.
    async fn identity_insert(&self, destination: &mut dyn Connection, enabled: bool) {
        let sql = self.queries.identity_insert(enabled);
        if let Err(e) = destination.execute(&sql, &[]).await {
            tracing::debug!("Ignoring identity insert toggle on {}: {}", self.table.name(), e);
        }
    }

    /// Run one chunk's statements in a single transaction, so the chunk is
    /// applied whole or not at all. The error carries the failing SQL.
    async fn apply_chunk(
        &self,
        destination: &mut dyn Connection,
        statements: &[Statement],
    ) -> Result<u64> {
        if statements.is_empty() {
            return Ok(0);
        }
        destination
            .execute(BEGIN_TRANSACTION, &[])
            .await
            .map_err(|e| self.batch_error(BEGIN_TRANSACTION, e))?;

        let mut applied = 0;
        for statement in statements {
            tracing::debug!("{}", statement.sql);
            match destination.execute(&statement.sql, &statement.params).await {
                Ok(n) => applied += n,
                Err(e) => {
                    if let Err(rollback) = destination.execute(ROLLBACK_TRANSACTION, &[]).await {
                        tracing::warn!(
                            "Rollback failed on {}: {}",
                            self.table.name(),
                            rollback
                        );
                    }
                    return Err(self.batch_error(&statement.sql, e));
                }
            }
        }

        destination
            .execute(COMMIT_TRANSACTION, &[])
            .await
            .map_err(|e| self.batch_error(COMMIT_TRANSACTION, e))?;
        Ok(applied)
    }

    /// Multi-row insert statements for `rows`, each within the parameter limit.
    fn insert_statements(&self, rows: &[Row]) -> Result<Vec<Statement>> {
        let mut statements = Vec::new();
        for group in rows.chunks(self.rows_per_insert) {
            let sql = self.queries.insert(group.len());
            let mut params = Vec::with_capacity(group.len() * self.table.column_count());
            for row in group {
                params.extend(
                    self.queries
                        .insert_params(row)
                        .map_err(|e| self.batch_error(&sql, e))?,
                );
            }
            statements.push(Statement { sql, params });
        }
        Ok(statements)
    }

    /// Copy the rows for `keys` from the source into the destination.
    ///
    /// `on_chunk` receives the number of keys handled so far.
    pub async fn insert(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
        keys: &BTreeSet<Key>,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<u64> {
        let keys: Vec<&Key> = keys.iter().collect();
        let mut applied = 0;
        let mut handled = 0;

        for chunk in keys.chunks(self.chunk_size) {
            let rows = self.fetch(source, chunk).await?;
            let statements = self.insert_statements(&rows)?;

            self.identity_insert(destination, true).await;
            let result = self.apply_chunk(destination, &statements).await;
            self.identity_insert(destination, false).await;

            applied += result?;
            handled += chunk.len() as u64;
            on_chunk(handled);
        }
        Ok(applied)
    }

    /// Overwrite the non-key columns for `keys` with the source values.
    pub async fn update(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
        keys: &BTreeSet<Key>,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<u64> {
        let Some(sql) = self.queries.update() else {
            // Every column is part of the key, so equal keys mean equal rows
            return Ok(0);
        };
        let keys: Vec<&Key> = keys.iter().collect();
        let mut applied = 0;
        let mut handled = 0;

        for chunk in keys.chunks(self.chunk_size) {
            let rows = self.fetch(source, chunk).await?;
            let statements = rows
                .iter()
                .map(|row| {
                    Ok(Statement {
                        sql: sql.clone(),
                        params: self.queries.update_params(row)?,
                    })
                })
                .collect::<Result<Vec<_>>>()
                .map_err(|e| self.batch_error(&sql, e))?;
            applied += self.apply_chunk(destination, &statements).await?;
            handled += chunk.len() as u64;
            on_chunk(handled);
        }
        Ok(applied)
    }

    /// Delete the destination rows for `keys`.
    pub async fn delete(
        &self,
        destination: &mut dyn Connection,
        keys: &BTreeSet<Key>,
        mut on_chunk: impl FnMut(u64),
    ) -> Result<u64> {
        let keys: Vec<&Key> = keys.iter().collect();
        let mut applied = 0;
        let mut handled = 0;

        for chunk in keys.chunks(self.chunk_size) {
            let Statement { sql, params } = self.queries.delete_by_keys(chunk);
            tracing::debug!("{}", sql);
            applied += destination
                .execute(&sql, &params)
                .await
                .map_err(|e| self.batch_error(&sql, e))?;
            handled += chunk.len() as u64;
            on_chunk(handled);
        }
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;

    #[test]
    fn test_chunk_size() {
        assert_eq!(chunk_size(1999, 3), 666);
        assert_eq!(chunk_size(1999, 1), 1999);
        assert_eq!(chunk_size(2, 5), 1);
        assert_eq!(chunk_size(1999, 0), 1999);
    }

    #[test]
    fn test_executor_chunk_size_follows_key_width() {
        let table = Table::with_columns(
            "Lines",
            vec![
                Column::new("A", "int", true),
                Column::new("B", "int", true),
                Column::new("C", "int", true),
                Column::new("Qty", "int", false),
            ],
        );
        let executor = BatchExecutor::new(&table, DEFAULT_PARAMETER_LIMIT);
        assert_eq!(executor.chunk_size(), 666);
        assert!(executor.chunk_size() * table.primary_key().len() <= DEFAULT_PARAMETER_LIMIT);
    }
}
