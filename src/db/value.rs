// ABOUTME: Owned SQL values moved between source rows and destination statements
// ABOUTME: NULLs keep a type hint so they bind to binary and temporal columns correctly

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type hint carried by a NULL value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullKind {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
    Guid,
    Decimal,
    Date,
    Time,
    DateTime,
    DateTimeOffset,
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null(NullKind),
    Bool(bool),
    U8(u8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Text(String),
    Bytes(Vec<u8>),
    Guid(Uuid),
    Decimal(Decimal),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null(_))
    }

    /// Borrow as bytes, used for the hash column.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            SqlValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null(_) => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::U8(v) => write!(f, "{}", v),
            SqlValue::I16(v) => write!(f, "{}", v),
            SqlValue::I32(v) => write!(f, "{}", v),
            SqlValue::I64(v) => write!(f, "{}", v),
            SqlValue::F32(v) => write!(f, "{}", v),
            SqlValue::F64(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
            SqlValue::Bytes(v) => {
                write!(f, "0x")?;
                for b in v {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
            SqlValue::Guid(v) => write!(f, "{}", v),
            SqlValue::Decimal(v) => write!(f, "{}", v),
            SqlValue::Date(v) => write!(f, "{}", v),
            SqlValue::Time(v) => write!(f, "{}", v),
            SqlValue::DateTime(v) => write!(f, "{}", v),
            SqlValue::DateTimeOffset(v) => write!(f, "{}", v),
        }
    }
}

/// A literal in a partition filter, as written in config files or on the
/// command line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Int(i64),
    Text(String),
}

impl FilterValue {
    /// Parse a command-line literal. Integers stay integers, GUID-looking
    /// strings stay text and are converted server-side.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().parse::<i64>() {
            Ok(v) => FilterValue::Int(v),
            Err(_) => FilterValue::Text(raw.trim().to_string()),
        }
    }

    pub fn to_sql(&self) -> SqlValue {
        match self {
            FilterValue::Int(v) => SqlValue::I64(*v),
            FilterValue::Text(v) => SqlValue::Text(v.clone()),
        }
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Int(v) => write!(f, "{}", v),
            FilterValue::Text(v) => write!(f, "{}", v),
        }
    }
}
