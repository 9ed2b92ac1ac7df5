// ABOUTME: Error types for the diff-and-sync engine
// ABOUTME: One variant per failure class the orchestrator has to tell apart

use thiserror::Error;

/// Errors raised while comparing and reconciling two databases.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A table has no columns, or a table pair shares no primary-key column.
    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    /// A column type has no hash expression. The schema is unsupported.
    #[error("Unsupported type '{data_type}' for column {table}.{column}")]
    Type {
        table: String,
        column: String,
        data_type: String,
    },

    /// A cursor produced a key lower than the one before it.
    #[error("{side} cursor for {table} is out of order: {current} follows {previous}")]
    OrderingViolation {
        table: String,
        side: &'static str,
        previous: String,
        current: String,
    },

    /// Both rows at an equal key reported a NULL hash.
    #[error("Both source and destination hashes are NULL for {table} key {key}")]
    DualNull { table: String, key: String },

    /// A DML batch failed at the destination.
    #[error("Batch failed for table {table}: {message}\n  SQL: {sql}")]
    Batch {
        table: String,
        sql: String,
        message: String,
    },

    /// Disabling or re-enabling a referential constraint failed.
    #[error("Failed to {action} constraint {constraint} on {table}: {message}")]
    Constraint {
        table: String,
        constraint: String,
        action: &'static str,
        message: String,
    },

    /// Driver-level failure (connect, query, decode).
    #[error("Database error: {0}")]
    Database(String),

    /// Constraint journal could not be read or written.
    #[error("Constraint journal error: {0}")]
    Journal(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The run was cancelled between tables.
    #[error("Synchronization cancelled")]
    Cancelled,

    /// Any of the above, annotated with the table being processed.
    #[error("Failed to synchronize table {table}: {source}")]
    Table {
        table: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn database(message: impl std::fmt::Display) -> Self {
        SyncError::Database(message.to_string())
    }

    /// Wrap an error with the name of the table it came from.
    ///
    /// Already-wrapped errors are returned unchanged.
    pub fn in_table(self, table: &str) -> Self {
        match self {
            SyncError::Table { .. } => self,
            other => SyncError::Table {
                table: table.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping table context.
    pub fn root(&self) -> &SyncError {
        match self {
            SyncError::Table { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<tiberius::error::Error> for SyncError {
    fn from(e: tiberius::error::Error) -> Self {
        SyncError::Database(e.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Journal(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Journal(e.to_string())
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_table_wraps_once() {
        let err = SyncError::Cancelled.in_table("Orders").in_table("Other");
        match &err {
            SyncError::Table { table, .. } => assert_eq!(table, "Orders"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(matches!(err.root(), SyncError::Cancelled));
    }

    #[test]
    fn test_batch_error_carries_sql() {
        let err = SyncError::Batch {
            table: "Orders".to_string(),
            sql: "delete from [Orders] where ([id]=@P1)".to_string(),
            message: "timeout".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("Orders"));
        assert!(text.contains("delete from [Orders]"));
    }
}
