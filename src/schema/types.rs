// ABOUTME: Closed set of SQL Server column type classes
// ABOUTME: Each class knows how it is hashed and how its key values decode

use crate::db::{NullKind, SqlValue};
use crate::error::{Result, SyncError};
use crate::key::KeyValue;
use crate::uuid_codec;

/// How a column contributes to the row hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    /// Fixed-width or orderable value, converted straight to varbinary.
    Fixed,
    /// Variable-length text, truncated before hashing.
    Text,
}

/// Scalar kinds understood by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeClass {
    Guid,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Bit,
    Decimal,
    Numeric,
    Money,
    SmallMoney,
    Float,
    Real,
    Date,
    Time,
    DateTime,
    DateTime2,
    SmallDateTime,
    DateTimeOffset,
    Char,
    NChar,
    VarChar,
    NVarChar,
    Text,
    NText,
    Image,
    /// A type name with no hash expression. Kept so the error surfaces
    /// when a query is built for the table.
    Unsupported(String),
}

impl TypeClass {
    /// Map a SQL Server `data_type` name.
    pub fn from_type_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "uniqueidentifier" => TypeClass::Guid,
            "tinyint" => TypeClass::TinyInt,
            "smallint" => TypeClass::SmallInt,
            "int" => TypeClass::Int,
            "bigint" => TypeClass::BigInt,
            "bit" => TypeClass::Bit,
            "decimal" => TypeClass::Decimal,
            "numeric" => TypeClass::Numeric,
            "money" => TypeClass::Money,
            "smallmoney" => TypeClass::SmallMoney,
            "float" => TypeClass::Float,
            "real" => TypeClass::Real,
            "date" => TypeClass::Date,
            "time" => TypeClass::Time,
            "datetime" => TypeClass::DateTime,
            "datetime2" => TypeClass::DateTime2,
            "smalldatetime" => TypeClass::SmallDateTime,
            "datetimeoffset" => TypeClass::DateTimeOffset,
            "char" => TypeClass::Char,
            "nchar" => TypeClass::NChar,
            "varchar" => TypeClass::VarChar,
            "nvarchar" => TypeClass::NVarChar,
            "text" => TypeClass::Text,
            "ntext" => TypeClass::NText,
            "image" => TypeClass::Image,
            _ => TypeClass::Unsupported(name.to_string()),
        }
    }

    pub fn hash_kind(&self) -> Option<HashKind> {
        match self {
            TypeClass::VarChar | TypeClass::NVarChar | TypeClass::Text | TypeClass::NText => {
                Some(HashKind::Text)
            }
            TypeClass::Unsupported(_) => None,
            _ => Some(HashKind::Fixed),
        }
    }

    /// Character types, ordered by their UTF-16LE bytes when used as keys.
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            TypeClass::Char
                | TypeClass::NChar
                | TypeClass::VarChar
                | TypeClass::NVarChar
                | TypeClass::Text
                | TypeClass::NText
        )
    }

    pub fn null_kind(&self) -> NullKind {
        match self {
            TypeClass::Guid => NullKind::Guid,
            TypeClass::TinyInt | TypeClass::SmallInt | TypeClass::Int | TypeClass::BigInt => {
                NullKind::Int
            }
            TypeClass::Bit => NullKind::Bool,
            TypeClass::Decimal | TypeClass::Numeric | TypeClass::Money | TypeClass::SmallMoney => {
                NullKind::Decimal
            }
            TypeClass::Float | TypeClass::Real => NullKind::Float,
            TypeClass::Date => NullKind::Date,
            TypeClass::Time => NullKind::Time,
            TypeClass::DateTime | TypeClass::DateTime2 | TypeClass::SmallDateTime => {
                NullKind::DateTime
            }
            TypeClass::DateTimeOffset => NullKind::DateTimeOffset,
            TypeClass::Image => NullKind::Bytes,
            _ => NullKind::Text,
        }
    }

    /// Turn a value read from a key column into a key component.
    ///
    /// GUIDs may arrive as the stored 16 bytes or as text; both become a
    /// [`KeyValue::Guid`] so they sort in engine order.
    pub fn decode_key(&self, value: &SqlValue) -> Result<KeyValue> {
        match (self, value) {
            (_, SqlValue::Null(_)) => Ok(KeyValue::Null),
            (TypeClass::Guid, SqlValue::Bytes(bytes)) => {
                Ok(KeyValue::Guid(uuid_codec::engine_slice_to_uuid(bytes)?))
            }
            (TypeClass::Guid, SqlValue::Text(text)) => uuid::Uuid::parse_str(text.trim())
                .map(KeyValue::Guid)
                .map_err(|e| SyncError::database(format!("Invalid uniqueidentifier '{}': {}", text, e))),
            (TypeClass::Unsupported(name), _) => Err(SyncError::database(format!(
                "Cannot decode key value of unsupported type '{}'",
                name
            ))),
            (_, other) => Ok(KeyValue::from(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_from_type_name_is_case_insensitive() {
        assert_eq!(TypeClass::from_type_name("NVARCHAR"), TypeClass::NVarChar);
        assert_eq!(TypeClass::from_type_name("uniqueIdentifier"), TypeClass::Guid);
        assert_eq!(
            TypeClass::from_type_name("geography"),
            TypeClass::Unsupported("geography".to_string())
        );
    }

    #[test]
    fn test_hash_kinds() {
        assert_eq!(TypeClass::Int.hash_kind(), Some(HashKind::Fixed));
        assert_eq!(TypeClass::NChar.hash_kind(), Some(HashKind::Fixed));
        assert_eq!(TypeClass::VarChar.hash_kind(), Some(HashKind::Text));
        assert_eq!(TypeClass::Text.hash_kind(), Some(HashKind::Text));
        assert_eq!(TypeClass::Unsupported("xml".into()).hash_kind(), None);
    }

    #[test]
    fn test_decode_guid_from_engine_bytes() {
        let uuid = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        let stored = uuid_codec::uuid_to_engine_bytes(&uuid).to_vec();
        let key = TypeClass::Guid.decode_key(&SqlValue::Bytes(stored)).unwrap();
        assert_eq!(key, KeyValue::Guid(uuid));

        let from_text = TypeClass::Guid
            .decode_key(&SqlValue::Text(uuid.to_string().to_uppercase()))
            .unwrap();
        assert_eq!(from_text, KeyValue::Guid(uuid));
    }

    #[test]
    fn test_decode_unsupported_fails() {
        let class = TypeClass::Unsupported("sql_variant".into());
        assert!(class.decode_key(&SqlValue::I32(1)).is_err());
    }
}
