// ABOUTME: Sync command: compare a partition of two databases and reconcile the destination
// ABOUTME: Offers constraint restoration first when an earlier run left a journal behind

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use dialoguer::{theme::ColorfulTheme, Confirm};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use super::ConnectionArgs;
use crate::config::Config;
use crate::db::mssql::MssqlConnection;
use crate::journal::ConstraintJournal;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::sync::{restore_from_journal, DestinationScan, SyncSummary, Synchronizer};
use crate::utils::{sanitize_url, validate_source_destination_different};

#[derive(Args, Clone, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
    /// Detect destination-only rows but never delete them
    #[arg(long)]
    pub no_delete: bool,
    /// Whether the destination scan applies the partition filter
    #[arg(long, value_enum)]
    pub destination_scan: Option<DestinationScan>,
    /// Maximum bound parameters per statement
    #[arg(long)]
    pub parameter_limit: Option<usize>,
    /// Answer yes to every prompt
    #[arg(short = 'y', long)]
    pub yes: bool,
}

impl SyncArgs {
    fn resolve(&self) -> Result<Config> {
        let mut config = self.connection.resolve()?;
        config.merge(Config {
            delete: self.no_delete.then_some(false),
            destination_scan: self.destination_scan,
            parameter_limit: self.parameter_limit,
            ..Default::default()
        });
        Ok(config)
    }
}

/// Renders progress events as two bars: tables and rows of the current table.
struct ProgressRenderer {
    multi: MultiProgress,
    tables: ProgressBar,
    rows: ProgressBar,
}

impl ProgressRenderer {
    fn new() -> Result<Self> {
        let multi = MultiProgress::new();
        let tables = multi.add(ProgressBar::new(0));
        tables.set_style(
            ProgressStyle::with_template("{prefix:>8} [{bar:30}] {pos}/{len} {msg}")?
                .progress_chars("=> "),
        );
        tables.set_prefix("tables");
        let rows = multi.add(ProgressBar::new(0));
        rows.set_style(
            ProgressStyle::with_template("{prefix:>8} [{bar:30}] {human_pos}/{human_len} {msg}")?
                .progress_chars("=> "),
        );
        rows.set_prefix("rows");
        Ok(Self {
            multi,
            tables,
            rows,
        })
    }

    fn finish(&self) {
        self.rows.finish_and_clear();
        self.tables.finish();
    }
}

impl ProgressSink for ProgressRenderer {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Planned { tables } => self.tables.set_length(tables as u64),
            ProgressEvent::TableStarted {
                table, total_rows, ..
            } => {
                self.tables.set_message(table);
                self.rows.reset();
                self.rows.set_length(total_rows);
                self.rows.set_message("comparing");
            }
            ProgressEvent::RowsScanned { current, total, .. } => {
                if current > total {
                    self.rows.set_length(current);
                }
                self.rows.set_position(current);
            }
            ProgressEvent::Applying {
                kind,
                current,
                total,
                ..
            } => {
                self.rows.set_message(format!("{} {}/{}", kind, current, total));
            }
            ProgressEvent::TableFinished { summary, .. } => {
                self.tables.inc(1);
                let _ = self.multi.println(format!(
                    "✓ {}: {} inserted, {} updated, {} deleted, {} unchanged",
                    summary.table,
                    summary.inserted,
                    summary.updated,
                    summary.deleted,
                    summary.unchanged
                ));
            }
        }
    }
}

fn print_summary(summary: &SyncSummary) {
    println!();
    println!("Synchronized {} tables", summary.tables.len());
    println!("  inserted:  {}", summary.inserted());
    println!("  updated:   {}", summary.updated());
    println!("  deleted:   {}", summary.deleted());
    println!("  unchanged: {}", summary.unchanged());
    let skipped: u64 = summary.tables.iter().map(|t| t.deletes_skipped).sum();
    if skipped > 0 {
        println!("  left in place (deletes disabled): {}", skipped);
    }
    if summary.constraints_restored > 0 {
        println!("  constraints re-enabled: {}", summary.constraints_restored);
    }
}

/// Offer to restore constraints left disabled by an interrupted run.
async fn recover_journal(
    destination: &mut MssqlConnection,
    config: &Config,
    assume_yes: bool,
) -> Result<()> {
    let path = config.journal_path();
    let Some(journal) = ConstraintJournal::load(&path).await? else {
        return Ok(());
    };
    if journal.is_empty() {
        ConstraintJournal::remove(&path).await?;
        return Ok(());
    }

    println!(
        "An earlier run left {} constraints disabled on {} ({}).",
        journal.constraint_count(),
        journal.destination,
        journal.created_at
    );
    let restore = assume_yes
        || Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Re-enable them before continuing?")
            .default(true)
            .interact()?;
    if !restore {
        bail!(
            "Refusing to run while {} exists. Run 'partition-sync restore-constraints' first.",
            path.display()
        );
    }

    let restored = restore_from_journal(destination, &path)
        .await
        .context("Failed to restore constraints from journal")?;
    println!("✓ Re-enabled {} constraints", restored);
    Ok(())
}

pub async fn sync(args: SyncArgs, cancel: CancellationToken) -> Result<()> {
    let config = args.resolve()?;
    let (source_url, destination_url) = config.endpoints()?;
    validate_source_destination_different(source_url, destination_url)?;
    let options = config.to_options()?;

    tracing::info!("Source: {}", sanitize_url(source_url));
    tracing::info!("Destination: {}", sanitize_url(destination_url));
    if options.filter.is_empty() {
        tracing::warn!("No partition filter given: every row of every common table is compared");
    }

    let mut source = MssqlConnection::connect_with_retry(source_url).await?;
    let mut destination = MssqlConnection::connect_with_retry(destination_url).await?;

    recover_journal(&mut destination, &config, args.yes).await?;

    let renderer = Arc::new(ProgressRenderer::new()?);
    let synchronizer = Synchronizer::new(options)
        .with_progress(renderer.clone())
        .with_cancellation(cancel);
    let result = synchronizer
        .synchronize(&mut source, &mut destination)
        .await;
    renderer.finish();

    let summary = result.context("Synchronization failed")?;
    print_summary(&summary);
    Ok(())
}
