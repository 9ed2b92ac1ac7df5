// ABOUTME: Orchestrates a full synchronization across every common table
// ABOUTME: Journals and disables destination constraints, syncs table by table, then restores them

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch::{BatchExecutor, DEFAULT_PARAMETER_LIMIT};
use crate::db::{Connection, SqlValue};
use crate::detect::detect_changes;
use crate::error::{Result, SyncError};
use crate::filter::Filter;
use crate::journal::ConstraintJournal;
use crate::progress::{should_report_rows, ApplyKind, NoProgress, ProgressEvent, ProgressSink};
use crate::query::{disable_constraint_sql, enable_constraint_sql, QueryBuilder, Statement};
use crate::schema::{common_table, load_tables, pair_tables, synchronizable, Table};

/// Whether the destination scan uses the partition filter.
///
/// `Unfiltered` compares the filtered source against the whole destination
/// table, so destination rows outside the partition are deleted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum DestinationScan {
    #[default]
    Filtered,
    Unfiltered,
}

/// Settings for one synchronization run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub filter: Filter,
    pub ignore_tables: Vec<String>,
    /// When false, deletes are detected and counted but never applied
    pub delete: bool,
    pub destination_scan: DestinationScan,
    pub parameter_limit: usize,
    pub journal_path: PathBuf,
    /// Destination identity recorded in the journal
    pub destination_label: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            filter: Filter::empty(),
            ignore_tables: Vec::new(),
            delete: true,
            destination_scan: DestinationScan::default(),
            parameter_limit: DEFAULT_PARAMETER_LIMIT,
            journal_path: ConstraintJournal::default_path(),
            destination_label: String::new(),
        }
    }
}

/// What happened to one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub source_rows: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: u64,
    /// Destination rows left in place because deletes are disabled
    pub deletes_skipped: u64,
}

/// Result of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub tables: Vec<TableSummary>,
    pub constraints_restored: usize,
}

impl SyncSummary {
    pub fn inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.inserted).sum()
    }

    pub fn updated(&self) -> u64 {
        self.tables.iter().map(|t| t.updated).sum()
    }

    pub fn deleted(&self) -> u64 {
        self.tables.iter().map(|t| t.deleted).sum()
    }

    pub fn unchanged(&self) -> u64 {
        self.tables.iter().map(|t| t.unchanged).sum()
    }
}

/// Drives a synchronization from a source to a destination connection.
pub struct Synchronizer {
    options: SyncOptions,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
}

impl Synchronizer {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            options,
            progress: Arc::new(NoProgress),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn filter(&self) -> Option<&Filter> {
        (!self.options.filter.is_empty()).then_some(&self.options.filter)
    }

    /// Synchronize every table the two databases share.
    ///
    /// Stops at the first failing table. Destination constraints are
    /// re-enabled on every exit path once they have been disabled.
    pub async fn synchronize(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
    ) -> Result<SyncSummary> {
        let journal_path = self.options.journal_path.as_path();
        if let Some(existing) = ConstraintJournal::load(journal_path).await? {
            if !existing.is_empty() {
                return Err(SyncError::Journal(format!(
                    "{} lists {} constraints left disabled by an earlier run; restore them first",
                    journal_path.display(),
                    existing.constraint_count()
                )));
            }
        }

        let source_tables = synchronizable(load_tables(source).await?);
        let destination_tables = synchronizable(load_tables(destination).await?);
        let pairs = pair_tables(source_tables, destination_tables, &self.options.ignore_tables);
        tracing::info!("Found {} tables to synchronize", pairs.len());
        self.progress.emit(ProgressEvent::Planned {
            tables: pairs.len(),
        });

        let journal = self
            .disable_constraints(destination, pairs.iter().map(|(_, dst)| dst))
            .await?;

        let mut summary = SyncSummary::default();
        let mut failure = None;
        let count = pairs.len();
        for (i, (src, dst)) in pairs.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::warn!("Cancelled before table {}", src.name());
                failure = Some(SyncError::Cancelled);
                break;
            }
            match self
                .sync_table(source, destination, src, dst, i + 1, count)
                .await
            {
                Ok(table_summary) => summary.tables.push(table_summary),
                Err(e) => {
                    tracing::error!("{}", e);
                    failure = Some(e.in_table(src.name()));
                    break;
                }
            }
        }

        let restore = restore_constraints(destination, &journal, journal_path).await;
        match (failure, restore) {
            (Some(e), _) => Err(e),
            (None, Err(e)) => Err(e),
            (None, Ok(restored)) => {
                summary.constraints_restored = restored;
                tracing::info!(
                    "Synchronized {} tables: {} inserted, {} updated, {} deleted, {} unchanged",
                    summary.tables.len(),
                    summary.inserted(),
                    summary.updated(),
                    summary.deleted(),
                    summary.unchanged()
                );
                Ok(summary)
            }
        }
    }

    /// Journal, then disable, every enabled constraint on the given tables.
    async fn disable_constraints<'t>(
        &self,
        destination: &mut dyn Connection,
        tables: impl Iterator<Item = &'t Table>,
    ) -> Result<ConstraintJournal> {
        let mut journal = ConstraintJournal::new(
            &self.options.destination_label,
            (!self.options.filter.is_empty()).then(|| self.options.filter.fingerprint()),
        );
        for table in tables {
            let constraints = destination.enabled_constraints(table.name()).await?;
            journal.record(table.name(), constraints);
        }
        if journal.is_empty() {
            return Ok(journal);
        }

        let path = self.options.journal_path.as_path();
        journal.save(path).await?;
        tracing::info!(
            "Disabling {} constraints (journal: {})",
            journal.constraint_count(),
            path.display()
        );

        for (table, constraint) in journal.entries() {
            let sql = disable_constraint_sql(table, constraint);
            tracing::debug!("{}", sql);
            if let Err(e) = destination.execute(&sql, &[]).await {
                let err = SyncError::Constraint {
                    table: table.to_string(),
                    constraint: constraint.to_string(),
                    action: "disable",
                    message: e.to_string(),
                };
                // Put back whatever was already switched off
                if let Err(restore_err) = restore_constraints(destination, &journal, path).await {
                    tracing::error!("{}", restore_err);
                }
                return Err(err);
            }
        }
        Ok(journal)
    }

    async fn sync_table(
        &self,
        source: &mut dyn Connection,
        destination: &mut dyn Connection,
        src: &Table,
        dst: &Table,
        index: usize,
        count: usize,
    ) -> Result<TableSummary> {
        let table = common_table(src, dst)?;
        let name = table.name().to_string();
        let queries = QueryBuilder::new(&table);
        let filter = self.filter();

        let source_rows = row_count(source, queries.row_count(filter)).await?;
        tracing::info!(
            "Synchronizing table {}/{}: {} ({} source rows)",
            index,
            count,
            name,
            source_rows
        );
        self.progress.emit(ProgressEvent::TableStarted {
            table: name.clone(),
            index,
            count,
            total_rows: source_rows,
        });

        let source_scan = queries.hashed_scan(filter)?;
        let destination_scan = match self.options.destination_scan {
            DestinationScan::Filtered => source_scan.clone(),
            DestinationScan::Unfiltered => queries.hashed_scan(None)?,
        };
        tracing::debug!("{}", source_scan.sql);

        let changes = {
            let src_rows = source.query(&source_scan.sql, &source_scan.params).await?;
            let dst_rows = destination
                .query(&destination_scan.sql, &destination_scan.params)
                .await?;
            detect_changes(&table, src_rows, dst_rows, |step| {
                if should_report_rows(step) {
                    self.progress.emit(ProgressEvent::RowsScanned {
                        table: name.clone(),
                        current: step,
                        total: source_rows,
                    });
                }
            })
            .await?
        };
        tracing::info!(
            "{}: {} to insert, {} to update, {} to delete",
            name,
            changes.insert.len(),
            changes.update.len(),
            changes.delete.len()
        );

        let executor = BatchExecutor::new(&table, self.options.parameter_limit);
        let applying = |kind: ApplyKind, total: usize| {
            let name = name.clone();
            let progress = Arc::clone(&self.progress);
            move |current: u64| {
                progress.emit(ProgressEvent::Applying {
                    table: name.clone(),
                    kind,
                    current,
                    total: total as u64,
                })
            }
        };

        let inserted = executor
            .insert(
                source,
                destination,
                &changes.insert,
                applying(ApplyKind::Insert, changes.insert.len()),
            )
            .await?;
        let updated = executor
            .update(
                source,
                destination,
                &changes.update,
                applying(ApplyKind::Update, changes.update.len()),
            )
            .await?;
        let (deleted, deletes_skipped) = if self.options.delete {
            let deleted = executor
                .delete(
                    destination,
                    &changes.delete,
                    applying(ApplyKind::Delete, changes.delete.len()),
                )
                .await?;
            (deleted, 0)
        } else {
            if !changes.delete.is_empty() {
                tracing::info!(
                    "{}: leaving {} destination rows in place (deletes disabled)",
                    name,
                    changes.delete.len()
                );
            }
            (0, changes.delete.len() as u64)
        };

        let summary = TableSummary {
            table: name,
            source_rows,
            inserted,
            updated,
            deleted,
            unchanged: changes.unchanged,
            deletes_skipped,
        };
        self.progress.emit(ProgressEvent::TableFinished {
            index,
            count,
            summary: summary.clone(),
        });
        Ok(summary)
    }
}

async fn row_count(conn: &mut dyn Connection, statement: Statement) -> Result<u64> {
    let mut rows = conn.query(&statement.sql, &statement.params).await?;
    let first = match rows.next().await {
        Some(row) => row?,
        None => return Ok(0),
    };
    match first.get_index(0) {
        Some(SqlValue::I32(n)) => Ok((*n).max(0) as u64),
        Some(SqlValue::I64(n)) => Ok((*n).max(0) as u64),
        Some(SqlValue::Null(_)) | None => Ok(0),
        Some(other) => Err(SyncError::database(format!(
            "Unexpected row count value {}",
            other
        ))),
    }
}

/// Re-enable every constraint in `journal`, trying each even after a
/// failure. The journal file is removed only when all succeeded.
///
/// Returns the number of constraints re-enabled.
async fn restore_constraints(
    conn: &mut dyn Connection,
    journal: &ConstraintJournal,
    path: &Path,
) -> Result<usize> {
    if journal.is_empty() {
        return Ok(0);
    }
    let mut first_failure = None;
    let mut restored = 0;
    for (table, constraint) in journal.entries() {
        let sql = enable_constraint_sql(table, constraint);
        tracing::debug!("{}", sql);
        match conn.execute(&sql, &[]).await {
            Ok(_) => restored += 1,
            Err(e) => {
                tracing::error!(
                    "Failed to re-enable constraint {} on {}: {}",
                    constraint,
                    table,
                    e
                );
                first_failure.get_or_insert(SyncError::Constraint {
                    table: table.to_string(),
                    constraint: constraint.to_string(),
                    action: "enable",
                    message: e.to_string(),
                });
            }
        }
    }
    if let Some(e) = first_failure {
        tracing::warn!("Keeping constraint journal at {}", path.display());
        return Err(e);
    }
    ConstraintJournal::remove(path).await?;
    tracing::info!("Re-enabled {} constraints", restored);
    Ok(restored)
}

/// Re-enable the constraints listed in the journal at `path` and delete it.
///
/// Returns the number of constraints restored; zero when no journal exists.
pub async fn restore_from_journal(conn: &mut dyn Connection, path: &Path) -> Result<usize> {
    match ConstraintJournal::load(path).await? {
        None => Ok(0),
        Some(journal) if journal.is_empty() => {
            ConstraintJournal::remove(path).await?;
            Ok(0)
        }
        Some(journal) => {
            tracing::info!(
                "Restoring {} constraints disabled at {}",
                journal.constraint_count(),
                journal.created_at
            );
            restore_constraints(conn, &journal, path).await
        }
    }
}
