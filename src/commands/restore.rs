// ABOUTME: Restore-constraints command: re-enable constraints an interrupted run left disabled
// ABOUTME: Reads the constraint journal, runs CHECK CONSTRAINT for each entry, then deletes it

use anyhow::{Context, Result};
use clap::Args;

use super::ConnectionArgs;
use crate::db::mssql::MssqlConnection;
use crate::journal::ConstraintJournal;
use crate::sync::restore_from_journal;

#[derive(Args, Clone, Debug)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

pub async fn restore(args: RestoreArgs) -> Result<()> {
    let config = args.connection.resolve()?;
    let path = config.journal_path();

    let Some(journal) = ConstraintJournal::load(&path).await? else {
        println!("No constraint journal at {}; nothing to restore.", path.display());
        return Ok(());
    };
    let destination_url = config
        .destination
        .as_deref()
        .context("A destination connection is required to restore constraints")?;

    tracing::info!(
        "Journal {} lists {} constraints on {}",
        path.display(),
        journal.constraint_count(),
        journal.destination
    );
    let mut destination = MssqlConnection::connect_with_retry(destination_url).await?;
    let restored = restore_from_journal(&mut destination, &path)
        .await
        .with_context(|| format!("Failed to restore constraints on {}", destination.label()))?;
    println!("✓ Re-enabled {} constraints", restored);
    Ok(())
}
