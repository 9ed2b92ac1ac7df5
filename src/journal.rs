// ABOUTME: Crash-recovery record of constraints disabled on the destination
// ABOUTME: Written before any mutation, removed once every constraint is back on

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::{Result, SyncError};
use crate::utils::sanitize_url;

/// Current journal format version.
pub const JOURNAL_VERSION: u32 = 1;

/// Constraints disabled by a run, keyed by table name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintJournal {
    /// Version of the file format
    pub version: u32,
    /// Destination the constraints belong to (password masked)
    pub destination: String,
    /// Fingerprint of the partition filter the run used
    #[serde(default)]
    pub filter_fingerprint: Option<String>,
    /// Table name -> disabled constraint names
    pub tables: BTreeMap<String, Vec<String>>,
    /// When the constraints were disabled
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ConstraintJournal {
    pub fn new(destination: &str, filter_fingerprint: Option<String>) -> Self {
        Self {
            version: JOURNAL_VERSION,
            destination: sanitize_url(destination),
            filter_fingerprint,
            tables: BTreeMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Record the constraints disabled on one table. Empty lists are skipped.
    pub fn record(&mut self, table: &str, constraints: Vec<String>) {
        if !constraints.is_empty() {
            self.tables.insert(table.to_string(), constraints);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn constraint_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// `(table, constraint)` pairs in table order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tables
            .iter()
            .flat_map(|(t, cs)| cs.iter().map(move |c| (t.as_str(), c.as_str())))
    }

    /// Load a journal, or `None` when no file exists at `path`.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::Journal(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let journal = serde_json::from_str(&contents).map_err(|e| {
            SyncError::Journal(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        Ok(Some(journal))
    }

    /// Write the journal, creating its directory if needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                SyncError::Journal(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents).await.map_err(|e| {
            SyncError::Journal(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Delete the journal file. A missing file is not an error.
    pub async fn remove(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::Journal(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Default journal location, relative to the working directory.
    pub fn default_path() -> PathBuf {
        PathBuf::from(".partition-sync/constraint-journal.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_masks_password() {
        let journal = ConstraintJournal::new("mssql://sa:secret@db/Sales", None);
        assert_eq!(journal.destination, "mssql://sa:***@db/Sales");
        assert!(journal.is_empty());
        assert_eq!(journal.version, JOURNAL_VERSION);
    }

    #[test]
    fn test_record_and_entries() {
        let mut journal = ConstraintJournal::new("mssql://sa:pw@db/Sales", None);
        journal.record("Orders", vec!["FK_Orders_Customers".into(), "CK_Total".into()]);
        journal.record("Audit", vec![]);
        journal.record("Lines", vec!["FK_Lines_Orders".into()]);

        assert_eq!(journal.constraint_count(), 3);
        assert!(!journal.tables.contains_key("Audit"));
        let entries: Vec<(&str, &str)> = journal.entries().collect();
        assert_eq!(
            entries,
            vec![
                ("Lines", "FK_Lines_Orders"),
                ("Orders", "FK_Orders_Customers"),
                ("Orders", "CK_Total"),
            ]
        );
    }

    #[test]
    fn test_default_path() {
        assert!(ConstraintJournal::default_path().ends_with("constraint-journal.json"));
    }
}
