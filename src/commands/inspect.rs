// ABOUTME: Inspect command: show which tables a sync would cover and how
// ABOUTME: Lists common tables, their key columns, and whether the filter applies

use anyhow::Result;
use clap::Args;

use super::ConnectionArgs;
use crate::db::mssql::MssqlConnection;
use crate::query::QueryBuilder;
use crate::schema::{common_table, load_tables, pair_tables, synchronizable};

#[derive(Args, Clone, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

pub async fn inspect(args: InspectArgs) -> Result<()> {
    let config = args.connection.resolve()?;
    let (source_url, destination_url) = config.endpoints()?;

    let mut source = MssqlConnection::connect_with_retry(source_url).await?;
    let mut destination = MssqlConnection::connect_with_retry(destination_url).await?;

    let source_tables = synchronizable(load_tables(&mut source).await?);
    let destination_tables = synchronizable(load_tables(&mut destination).await?);
    let pairs = pair_tables(source_tables, destination_tables, &config.ignore_tables);

    println!("{} common tables with a primary key:", pairs.len());
    for (src, dst) in &pairs {
        let table = match common_table(src, dst) {
            Ok(table) => table,
            Err(e) => {
                println!("  ✗ {} ({})", src.name(), e);
                continue;
            }
        };
        if let Err(e) = QueryBuilder::new(&table).hashed_scan(None) {
            println!("  ✗ {} ({})", table.name(), e);
            continue;
        }
        let key: Vec<&str> = table
            .primary_key()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        let scope = if config.filter.applies_to(&table) {
            "filtered"
        } else {
            "whole table"
        };
        println!(
            "  ✓ {} key [{}], {} columns, {}",
            table.name(),
            key.join(", "),
            table.column_count(),
            scope
        );
    }
    Ok(())
}
