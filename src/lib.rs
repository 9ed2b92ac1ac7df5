// ABOUTME: Library root for partition-sync
// ABOUTME: Hash-compares a partition of rows between two SQL Server databases and reconciles them

pub mod batch;
pub mod commands;
pub mod config;
pub mod db;
pub mod detect;
pub mod error;
pub mod filter;
pub mod journal;
pub mod key;
pub mod progress;
pub mod query;
pub mod schema;
pub mod sync;
pub mod utils;
pub mod uuid_codec;

pub use error::{Result, SyncError};
pub use sync::{restore_from_journal, DestinationScan, SyncOptions, SyncSummary, Synchronizer};
