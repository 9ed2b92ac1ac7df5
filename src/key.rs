// ABOUTME: Primary-key tuples with the total order used by the merge-join
// ABOUTME: GUIDs sort like SQL Server; an exhausted cursor sorts after every key

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{NullKind, SqlValue};
use crate::uuid_codec;

/// One primary-key component.
#[derive(Debug, Clone)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Guid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl KeyValue {
    /// Rank used only when two different kinds meet, which a well-formed
    /// key column never produces.
    fn rank(&self) -> u8 {
        match self {
            KeyValue::Null => 0,
            KeyValue::Bool(_) => 1,
            KeyValue::Int(_) => 2,
            KeyValue::Float(_) => 3,
            KeyValue::Decimal(_) => 4,
            KeyValue::Text(_) => 5,
            KeyValue::Bytes(_) => 6,
            KeyValue::Guid(_) => 7,
            KeyValue::Date(_) => 8,
            KeyValue::Time(_) => 9,
            KeyValue::DateTime(_) => 10,
            KeyValue::DateTimeOffset(_) => 11,
        }
    }

    /// Convert back to a bindable parameter.
    pub fn to_sql(&self) -> SqlValue {
        match self {
            KeyValue::Null => SqlValue::Null(NullKind::Text),
            KeyValue::Bool(v) => SqlValue::Bool(*v),
            KeyValue::Int(v) => SqlValue::I64(*v),
            KeyValue::Float(v) => SqlValue::F64(*v),
            KeyValue::Decimal(v) => SqlValue::Decimal(*v),
            KeyValue::Text(v) => SqlValue::Text(v.clone()),
            KeyValue::Bytes(v) => SqlValue::Bytes(v.clone()),
            KeyValue::Guid(v) => SqlValue::Guid(*v),
            KeyValue::Date(v) => SqlValue::Date(*v),
            KeyValue::Time(v) => SqlValue::Time(*v),
            KeyValue::DateTime(v) => SqlValue::DateTime(*v),
            KeyValue::DateTimeOffset(v) => SqlValue::DateTimeOffset(*v),
        }
    }
}

impl From<&SqlValue> for KeyValue {
    fn from(value: &SqlValue) -> Self {
        match value {
            SqlValue::Null(_) => KeyValue::Null,
            SqlValue::Bool(v) => KeyValue::Bool(*v),
            SqlValue::U8(v) => KeyValue::Int(i64::from(*v)),
            SqlValue::I16(v) => KeyValue::Int(i64::from(*v)),
            SqlValue::I32(v) => KeyValue::Int(i64::from(*v)),
            SqlValue::I64(v) => KeyValue::Int(*v),
            SqlValue::F32(v) => KeyValue::Float(f64::from(*v)),
            SqlValue::F64(v) => KeyValue::Float(*v),
            SqlValue::Text(v) => KeyValue::Text(v.clone()),
            SqlValue::Bytes(v) => KeyValue::Bytes(v.clone()),
            SqlValue::Guid(v) => KeyValue::Guid(*v),
            SqlValue::Decimal(v) => KeyValue::Decimal(*v),
            SqlValue::Date(v) => KeyValue::Date(*v),
            SqlValue::Time(v) => KeyValue::Time(*v),
            SqlValue::DateTime(v) => KeyValue::DateTime(*v),
            SqlValue::DateTimeOffset(v) => KeyValue::DateTimeOffset(*v),
        }
    }
}

/// Compare two strings by their UTF-16LE encoding, byte by byte. This is
/// how the server orders `convert(varbinary(max), convert(nvarchar(max), c))`.
fn utf16le_cmp(a: &str, b: &str) -> Ordering {
    let bytes = |s: &str| s.encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<u8>>();
    if a.is_ascii() && b.is_ascii() {
        // Every code unit is one ASCII byte followed by zero
        return a.as_bytes().cmp(b.as_bytes());
    }
    bytes(a).cmp(&bytes(b))
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use KeyValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Decimal(a), Decimal(b)) => a.cmp(b),
            (Text(a), Text(b)) => utf16le_cmp(a, b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (Guid(a), Guid(b)) => uuid_codec::compare(a, b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (DateTimeOffset(a), DateTimeOffset(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_sql().fmt(f)
    }
}

/// A row's primary key, one value per key column in table order.
///
/// Keys of different length compare position by position; a missing
/// position behaves like NULL.
#[derive(Debug, Clone, Default)]
pub struct Key(Vec<KeyValue>);

impl Key {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parameters for the key, in key-column order.
    pub fn params(&self) -> impl Iterator<Item = SqlValue> + '_ {
        self.0.iter().map(KeyValue::to_sql)
    }
}

impl From<Vec<KeyValue>> for Key {
    fn from(values: Vec<KeyValue>) -> Self {
        Self(values)
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let ord = match (self.0.get(i), other.0.get(i)) {
                (Some(a), Some(b)) => a.cmp(b),
                (None, None) => Ordering::Equal,
                (None, Some(b)) => KeyValue::Null.cmp(b),
                (Some(a), None) => a.cmp(&KeyValue::Null),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")
    }
}

/// Position of a cursor: on a row with a key, or past the last row.
///
/// `End` sorts after every key, so an exhausted side never wins a
/// comparison against a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPosition<'a> {
    At(&'a Key),
    End,
}

impl<'a> From<Option<&'a Key>> for KeyPosition<'a> {
    fn from(key: Option<&'a Key>) -> Self {
        match key {
            Some(k) => KeyPosition::At(k),
            None => KeyPosition::End,
        }
    }
}
