// ABOUTME: Merge-join of two key-ordered hashed scans into insert/update/delete key sets
// ABOUTME: Cursors refuse keys that go backwards; equal keys are settled by hash comparison

use std::cmp::Ordering;
use std::collections::BTreeSet;

use futures::StreamExt;

use crate::db::{Row, RowStream};
use crate::error::{Result, SyncError};
use crate::key::{Key, KeyPosition};
use crate::query::HASH_COLUMN;
use crate::schema::Table;

/// Classification of one key encountered by the merge-join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
    None,
}

/// Which cursor(s) move after a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Source,
    Destination,
    Both,
}

/// One row of a hashed scan: its key and the aggregate hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedRow {
    pub key: Key,
    pub hash: Option<Vec<u8>>,
}

impl HashedRow {
    pub fn new(key: Key, hash: Option<Vec<u8>>) -> Self {
        Self { key, hash }
    }

    /// Decode a hashed-scan row using the key columns of `table`.
    pub fn from_row(table: &Table, row: &Row) -> Result<Self> {
        let values = table
            .primary_key()
            .iter()
            .map(|col| {
                let value = row.get(&col.name).ok_or_else(|| {
                    SyncError::database(format!(
                        "Key column {} missing from scan of {}",
                        col.name,
                        table.name()
                    ))
                })?;
                col.type_class.decode_key(value)
            })
            .collect::<Result<Vec<_>>>()?;
        let hash = row
            .get(HASH_COLUMN)
            .and_then(|v| v.as_bytes())
            .map(<[u8]>::to_vec);
        Ok(Self::new(Key::new(values), hash))
    }
}

/// The outcome of one merge-join step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification<'a> {
    pub change: ChangeType,
    pub key: &'a Key,
    pub advance: Advance,
}

/// Classify the current pair of rows.
///
/// Returns `None` once both sides are exhausted. The key is the destination
/// key for deletes and the source key otherwise.
pub fn classify<'a>(
    table: &str,
    source: Option<&'a HashedRow>,
    destination: Option<&'a HashedRow>,
) -> Result<Option<Classification<'a>>> {
    let src_pos = KeyPosition::from(source.map(|r| &r.key));
    let dst_pos = KeyPosition::from(destination.map(|r| &r.key));

    let classification = match (source, destination, src_pos.cmp(&dst_pos)) {
        (None, None, _) => return Ok(None),
        (Some(src), _, Ordering::Less) => Classification {
            change: ChangeType::Insert,
            key: &src.key,
            advance: Advance::Source,
        },
        (_, Some(dst), Ordering::Greater) => Classification {
            change: ChangeType::Delete,
            key: &dst.key,
            advance: Advance::Destination,
        },
        (Some(src), Some(dst), Ordering::Equal) => {
            let change = match (&src.hash, &dst.hash) {
                (None, None) => {
                    return Err(SyncError::DualNull {
                        table: table.to_string(),
                        key: src.key.to_string(),
                    })
                }
                (None, Some(_)) => ChangeType::Delete,
                (Some(_), None) => ChangeType::Insert,
                (Some(a), Some(b)) if a == b => ChangeType::None,
                _ => ChangeType::Update,
            };
            let key = if change == ChangeType::Delete {
                &dst.key
            } else {
                &src.key
            };
            Classification {
                change,
                key,
                advance: Advance::Both,
            }
        }
        // A live side always sorts before an exhausted one
        _ => {
            return Err(SyncError::database(format!(
                "Cursor positions for {} disagree with their key order",
                table
            )))
        }
    };
    Ok(Some(classification))
}

/// A hashed-scan stream that checks its keys never decrease.
pub struct OrderedCursor<'s, 't> {
    stream: RowStream<'s>,
    table: &'t Table,
    side: &'static str,
    current: Option<HashedRow>,
    rows_read: u64,
}

impl<'s, 't> OrderedCursor<'s, 't> {
    pub fn new(stream: RowStream<'s>, table: &'t Table, side: &'static str) -> Self {
        Self {
            stream,
            table,
            side,
            current: None,
            rows_read: 0,
        }
    }

    pub fn current(&self) -> Option<&HashedRow> {
        self.current.as_ref()
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Move to the next row, or to the end.
    pub async fn advance(&mut self) -> Result<()> {
        let next = match self.stream.next().await {
            Some(row) => Some(HashedRow::from_row(self.table, &row?)?),
            None => None,
        };
        if let (Some(prev), Some(next)) = (&self.current, &next) {
            if next.key < prev.key {
                return Err(SyncError::OrderingViolation {
                    table: self.table.name().to_string(),
                    side: self.side,
                    previous: prev.key.to_string(),
                    current: next.key.to_string(),
                });
            }
        }
        if next.is_some() {
            self.rows_read += 1;
        }
        self.current = next;
        Ok(())
    }
}

/// Keys that differ between source and destination, one set per action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub insert: BTreeSet<Key>,
    pub update: BTreeSet<Key>,
    pub delete: BTreeSet<Key>,
    pub unchanged: u64,
}

impl ChangeSet {
    pub fn record(&mut self, change: ChangeType, key: &Key) {
        match change {
            ChangeType::Insert => {
                self.insert.insert(key.clone());
            }
            ChangeType::Update => {
                self.update.insert(key.clone());
            }
            ChangeType::Delete => {
                self.delete.insert(key.clone());
            }
            ChangeType::None => self.unchanged += 1,
        }
    }

    /// True when nothing needs to be applied.
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Walk both scans in key order and collect the changes.
///
/// `on_step` receives the number of merge steps taken so far.
pub async fn detect_changes<F>(
    table: &Table,
    source: RowStream<'_>,
    destination: RowStream<'_>,
    mut on_step: F,
) -> Result<ChangeSet>
where
    F: FnMut(u64),
{
    let mut src = OrderedCursor::new(source, table, "source");
    let mut dst = OrderedCursor::new(destination, table, "destination");
    src.advance().await?;
    dst.advance().await?;

    let mut changes = ChangeSet::default();
    let mut steps = 0u64;
    loop {
        let advance = match classify(table.name(), src.current(), dst.current())? {
            None => break,
            Some(step) => {
                changes.record(step.change, step.key);
                step.advance
            }
        };
        steps += 1;
        on_step(steps);

        match advance {
            Advance::Source => src.advance().await?,
            Advance::Destination => dst.advance().await?,
            Advance::Both => {
                src.advance().await?;
                dst.advance().await?;
            }
        }
    }

    tracing::debug!(
        "{}: {} source rows, {} destination rows, {} insert, {} update, {} delete, {} unchanged",
        table.name(),
        src.rows_read(),
        dst.rows_read(),
        changes.insert.len(),
        changes.update.len(),
        changes.delete.len(),
        changes.unchanged
    );
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqlValue;
    use crate::key::KeyValue;
    use crate::schema::Column;
    use futures::stream;
    use std::sync::Arc;

    fn table() -> Table {
        Table::with_columns(
            "Items",
            vec![Column::new("Id", "int", true), Column::new("Name", "varchar", false)],
        )
    }

    fn scan(rows: &[(i32, Option<&str>)]) -> RowStream<'static> {
        let columns: Arc<[String]> = vec!["Id".to_string(), "Hash".to_string()].into();
        let rows: Vec<Result<Row>> = rows
            .iter()
            .map(|(id, hash)| {
                let hash = match hash {
                    Some(h) => SqlValue::Bytes(h.as_bytes().to_vec()),
                    None => SqlValue::Null(crate::db::NullKind::Bytes),
                };
                Ok(Row::new(columns.clone(), vec![SqlValue::I32(*id), hash]))
            })
            .collect();
        stream::iter(rows).boxed()
    }

    fn keys(set: &BTreeSet<Key>) -> Vec<i64> {
        set.iter()
            .map(|k| match k.values()[0] {
                KeyValue::Int(v) => v,
                _ => panic!("unexpected key {}", k),
            })
            .collect()
    }

    fn row(id: i64, hash: Option<&str>) -> HashedRow {
        HashedRow::new(
            Key::new(vec![KeyValue::Int(id)]),
            hash.map(|h| h.as_bytes().to_vec()),
        )
    }

    #[test]
    fn test_classify_rules() {
        let a = row(1, Some("A"));
        let b = row(2, Some("B"));
        let a2 = row(1, Some("Z"));

        let step = classify("t", Some(&a), Some(&b)).unwrap().unwrap();
        assert_eq!((step.change, step.advance), (ChangeType::Insert, Advance::Source));

        let step = classify("t", Some(&b), Some(&a)).unwrap().unwrap();
        assert_eq!(
            (step.change, step.advance),
            (ChangeType::Delete, Advance::Destination)
        );
        assert_eq!(step.key, &a.key);

        let step = classify("t", Some(&a), Some(&a2)).unwrap().unwrap();
        assert_eq!((step.change, step.advance), (ChangeType::Update, Advance::Both));

        let same = a.clone();
        let step = classify("t", Some(&a), Some(&same)).unwrap().unwrap();
        assert_eq!(step.change, ChangeType::None);

        let step = classify("t", None, Some(&b)).unwrap().unwrap();
        assert_eq!(step.change, ChangeType::Delete);

        assert!(classify("t", None, None).unwrap().is_none());
    }

    #[test]
    fn test_classify_null_hashes_at_equal_keys() {
        let null_src = row(1, None);
        let live = row(1, Some("A"));
        let step = classify("t", Some(&null_src), Some(&live)).unwrap().unwrap();
        assert_eq!(step.change, ChangeType::Delete);
        let step = classify("t", Some(&live), Some(&null_src)).unwrap().unwrap();
        assert_eq!(step.change, ChangeType::Insert);

        let err = classify("t", Some(&null_src), Some(&null_src.clone())).unwrap_err();
        assert!(matches!(err, SyncError::DualNull { .. }));
    }

    #[tokio::test]
    async fn test_detects_each_kind() {
        let table = table();
        let mut steps = 0;
        let changes = detect_changes(
            &table,
            scan(&[(1, Some("A")), (2, Some("B")), (3, Some("C"))]),
            scan(&[(1, Some("A")), (2, Some("X")), (4, Some("D"))]),
            |n| steps = n,
        )
        .await
        .unwrap();
        assert_eq!(keys(&changes.insert), vec![3]);
        assert_eq!(keys(&changes.update), vec![2]);
        assert_eq!(keys(&changes.delete), vec![4]);
        assert_eq!(changes.unchanged, 1);
        assert_eq!(steps, 4);
    }

    #[tokio::test]
    async fn test_empty_sides() {
        let table = table();
        let changes = detect_changes(&table, scan(&[]), scan(&[]), |_| {})
            .await
            .unwrap();
        assert!(changes.is_empty());

        let changes = detect_changes(&table, scan(&[(1, Some("A")), (2, Some("B"))]), scan(&[]), |_| {})
            .await
            .unwrap();
        assert_eq!(keys(&changes.insert), vec![1, 2]);

        let changes = detect_changes(&table, scan(&[]), scan(&[(5, Some("E"))]), |_| {})
            .await
            .unwrap();
        assert_eq!(keys(&changes.delete), vec![5]);
    }

    #[tokio::test]
    async fn test_identical_sides_yield_no_changes() {
        let table = table();
        let rows = [(1, Some("A")), (2, Some("B")), (3, Some("C"))];
        let changes = detect_changes(&table, scan(&rows), scan(&rows), |_| {})
            .await
            .unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.unchanged, 3);
    }

    #[tokio::test]
    async fn test_out_of_order_cursor_fails() {
        let table = table();
        let err = detect_changes(
            &table,
            scan(&[(1, Some("A")), (3, Some("C")), (2, Some("B"))]),
            scan(&[(1, Some("A"))]),
            |_| {},
        )
        .await
        .unwrap_err();
        match err {
            SyncError::OrderingViolation {
                side,
                previous,
                current,
                ..
            } => {
                assert_eq!(side, "source");
                assert_eq!(previous, "[3]");
                assert_eq!(current, "[2]");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplicate_keys_are_not_an_ordering_violation() {
        let table = table();
        let changes = detect_changes(
            &table,
            scan(&[(1, Some("A")), (1, Some("A"))]),
            scan(&[(1, Some("A"))]),
            |_| {},
        )
        .await
        .unwrap();
        // The second source row meets an exhausted destination and dedupes in the set
        assert_eq!(keys(&changes.insert), vec![1]);
    }

    #[tokio::test]
    async fn test_every_key_lands_in_exactly_one_class() {
        let table = table();
        let universe = 0..8i32;
        let hash = |id: i32, salt: u32| if (id as u32 + salt) % 3 == 0 { "A" } else { "B" };

        for source_mask in 0u32..256 {
            for destination_mask in 0u32..256 {
                let present = |mask: u32, id: i32| mask & (1 << id) != 0;
                let source_rows: Vec<(i32, Option<&str>)> = universe
                    .clone()
                    .filter(|id| present(source_mask, *id))
                    .map(|id| (id, Some(hash(id, source_mask))))
                    .collect();
                let destination_rows: Vec<(i32, Option<&str>)> = universe
                    .clone()
                    .filter(|id| present(destination_mask, *id))
                    .map(|id| (id, Some(hash(id, destination_mask))))
                    .collect();

                let changes =
                    detect_changes(&table, scan(&source_rows), scan(&destination_rows), |_| {})
                        .await
                        .unwrap();

                let mut expected = (Vec::new(), Vec::new(), Vec::new(), 0u64);
                for id in universe.clone() {
                    match (present(source_mask, id), present(destination_mask, id)) {
                        (true, false) => expected.0.push(i64::from(id)),
                        (false, true) => expected.2.push(i64::from(id)),
                        (true, true) if hash(id, source_mask) != hash(id, destination_mask) => {
                            expected.1.push(i64::from(id))
                        }
                        (true, true) => expected.3 += 1,
                        (false, false) => {}
                    }
                }
                let context = format!("source {source_mask:08b}, destination {destination_mask:08b}");
                assert_eq!(keys(&changes.insert), expected.0, "{context}");
                assert_eq!(keys(&changes.update), expected.1, "{context}");
                assert_eq!(keys(&changes.delete), expected.2, "{context}");
                assert_eq!(changes.unchanged, expected.3, "{context}");

                // Classes are disjoint and cover the union of both key sets
                let classified = changes.insert.len()
                    + changes.update.len()
                    + changes.delete.len()
                    + changes.unchanged as usize;
                assert_eq!(
                    classified,
                    (source_mask | destination_mask).count_ones() as usize,
                    "{context}"
                );
                assert!(changes.insert.is_disjoint(&changes.update), "{context}");
                assert!(changes.insert.is_disjoint(&changes.delete), "{context}");
                assert!(changes.update.is_disjoint(&changes.delete), "{context}");
            }
        }
    }

    #[tokio::test]
    async fn test_non_ascii_text_keys_in_server_order() {
        let table = Table::with_columns(
            "Codes",
            vec![Column::new("Code", "nvarchar", true), Column::new("Label", "nvarchar", false)],
        );
        let scan = |rows: &[(&str, &str)]| -> RowStream<'static> {
            let columns: Arc<[String]> = vec!["Code".to_string(), "Hash".to_string()].into();
            let rows: Vec<Result<Row>> = rows
                .iter()
                .map(|(code, hash)| {
                    Ok(Row::new(
                        columns.clone(),
                        vec![
                            SqlValue::Text(code.to_string()),
                            SqlValue::Bytes(hash.as_bytes().to_vec()),
                        ],
                    ))
                })
                .collect();
            stream::iter(rows).boxed()
        };

        // Ordered by UTF-16LE bytes: U+0101 (01 01), U+017D (7D 01), U+00E9 (E9 00)
        let changes = detect_changes(
            &table,
            scan(&[("ā", "C"), ("Ž", "A"), ("é", "B")]),
            scan(&[("Ž", "A"), ("é", "X")]),
            |_| {},
        )
        .await
        .unwrap();
        let text = |s: &str| Key::new(vec![KeyValue::Text(s.to_string())]);
        assert_eq!(changes.update, BTreeSet::from([text("é")]));
        assert_eq!(changes.insert, BTreeSet::from([text("ā")]));
        assert!(changes.delete.is_empty());
        assert_eq!(changes.unchanged, 1);
    }

    #[test]
    fn test_hashed_row_from_row_decodes_guid_keys() {
        let table = Table::with_columns(
            "Docs",
            vec![Column::new("DocId", "uniqueidentifier", true)],
        );
        let id = uuid::Uuid::from_u128(0x1234);
        let columns: Arc<[String]> = vec!["DocId".to_string(), "Hash".to_string()].into();
        let row = Row::new(
            columns,
            vec![
                SqlValue::Bytes(crate::uuid_codec::uuid_to_engine_bytes(&id).to_vec()),
                SqlValue::Bytes(vec![9; 16]),
            ],
        );
        let hashed = HashedRow::from_row(&table, &row).unwrap();
        assert_eq!(hashed.key, Key::new(vec![KeyValue::Guid(id)]));
        assert_eq!(hashed.hash, Some(vec![9; 16]));
    }
}
