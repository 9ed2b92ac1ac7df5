// ABOUTME: Discrete progress events emitted by the synchronizer
// ABOUTME: Consumers plug in a callback or a channel; the engine keeps no shared counters

use tokio::sync::mpsc::UnboundedSender;

use crate::sync::TableSummary;

/// Rows between two `RowsScanned` events.
pub const ROW_PROGRESS_INTERVAL: u64 = 1000;

/// Which change set a batch step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for ApplyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyKind::Insert => write!(f, "insert"),
            ApplyKind::Update => write!(f, "update"),
            ApplyKind::Delete => write!(f, "delete"),
        }
    }
}

/// Something worth telling a presentation layer about.
///
/// Table indexes are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// The tables to synchronize are known.
    Planned { tables: usize },
    /// Work on a table begins. `total_rows` is the filtered source row count.
    TableStarted {
        table: String,
        index: usize,
        count: usize,
        total_rows: u64,
    },
    /// Merge-join steps taken so far for the current table.
    RowsScanned {
        table: String,
        current: u64,
        total: u64,
    },
    /// Keys handled so far by one kind of batch.
    Applying {
        table: String,
        kind: ApplyKind,
        current: u64,
        total: u64,
    },
    /// A table completed.
    TableFinished {
        index: usize,
        count: usize,
        summary: TableSummary,
    },
}

/// Receives progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A closed receiver only means nobody is watching
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

/// True when a scan step should be reported.
pub fn should_report_rows(current: u64) -> bool {
    current % ROW_PROGRESS_INTERVAL == 0
}
