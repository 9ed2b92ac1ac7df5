// ABOUTME: Conversion between RFC 4122 UUIDs and SQL Server's uniqueidentifier byte layout
// ABOUTME: Also provides a comparator that reproduces SQL Server's ORDER BY for GUIDs

use std::cmp::Ordering;

use uuid::Uuid;

use crate::error::{Result, SyncError};

/// Byte ranges of the engine layout, in the order SQL Server compares them:
/// node, clock_seq, time_hi, time_mid, time_low.
const COMPARE_GROUPS: [(usize, usize); 5] = [(10, 16), (8, 10), (6, 8), (4, 6), (0, 4)];

/// Reverse the first three UUID fields in place.
///
/// Applying this twice is the identity, so it serves both directions.
fn swap_fields(mut bytes: [u8; 16]) -> [u8; 16] {
    bytes[0..4].reverse(); // time_low
    bytes[4..6].reverse(); // time_mid
    bytes[6..8].reverse(); // time_hi + version
    bytes
}

/// Convert a UUID into the bytes SQL Server stores for a uniqueidentifier.
pub fn uuid_to_engine_bytes(uuid: &Uuid) -> [u8; 16] {
    swap_fields(*uuid.as_bytes())
}

/// Convert SQL Server uniqueidentifier bytes back into a UUID.
pub fn engine_bytes_to_uuid(bytes: [u8; 16]) -> Uuid {
    Uuid::from_bytes(swap_fields(bytes))
}

/// Like [`engine_bytes_to_uuid`] but for a slice read off the wire.
pub fn engine_slice_to_uuid(bytes: &[u8]) -> Result<Uuid> {
    let array: [u8; 16] = bytes.try_into().map_err(|_| {
        SyncError::database(format!(
            "Invalid uniqueidentifier: expected 16 bytes, got {}",
            bytes.len()
        ))
    })?;
    Ok(engine_bytes_to_uuid(array))
}

/// The engine bytes regrouped in comparison order.
///
/// Lexicographic order over these keys is SQL Server's GUID order.
pub fn engine_sort_key(uuid: &Uuid) -> [u8; 16] {
    let bytes = uuid_to_engine_bytes(uuid);
    let mut key = [0u8; 16];
    let mut pos = 0;
    for (start, end) in COMPARE_GROUPS {
        let len = end - start;
        key[pos..pos + len].copy_from_slice(&bytes[start..end]);
        pos += len;
    }
    key
}

/// Compare two UUIDs the way SQL Server sorts uniqueidentifier columns.
pub fn compare(left: &Uuid, right: &Uuid) -> Ordering {
    let left = uuid_to_engine_bytes(left);
    let right = uuid_to_engine_bytes(right);
    for (start, end) in COMPARE_GROUPS {
        match left[start..end].cmp(&right[start..end]) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Format 32 hex digits as a dashed UUID string.
pub fn add_dashes(hex: &str) -> Result<String> {
    if hex.len() != 32 || !hex.is_ascii() {
        return Err(SyncError::database(format!(
            "Expected 32 hex digits, got '{}'",
            hex
        )));
    }
    Ok(format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// UUIDs with a single interesting byte set at each position, the same
    /// shape SQL Server ordering is usually probed with.
    fn probe_uuids() -> Vec<Uuid> {
        let mut out = Vec::new();
        for i in 0..16 {
            for b in (0..256).step_by(64) {
                let mut bytes = [0u8; 16];
                bytes[i] = b as u8;
                out.push(engine_bytes_to_uuid(bytes));
            }
        }
        out
    }

    #[test]
    fn test_round_trip() {
        for uuid in probe_uuids() {
            assert_eq!(engine_bytes_to_uuid(uuid_to_engine_bytes(&uuid)), uuid);
        }
        let random = Uuid::new_v4();
        assert_eq!(engine_bytes_to_uuid(uuid_to_engine_bytes(&random)), random);
    }

    #[test]
    fn test_matches_mixed_endian_layout() {
        let uuid = Uuid::parse_str("00112233-4455-6677-8899-aabbccddeeff").unwrap();
        assert_eq!(
            uuid_to_engine_bytes(&uuid),
            [
                0x33, 0x22, 0x11, 0x00, 0x55, 0x44, 0x77, 0x66, 0x88, 0x99, 0xaa, 0xbb, 0xcc,
                0xdd, 0xee, 0xff
            ]
        );
        assert_eq!(uuid_to_engine_bytes(&uuid), uuid.to_bytes_le());
    }

    #[test]
    fn test_node_dominates_time_low() {
        let a = Uuid::parse_str("ffffffff-0000-0000-0000-000000000000").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        assert_eq!(compare(&a, &b), Ordering::Less);
        assert_eq!(compare(&b, &a), Ordering::Greater);
        assert_eq!(compare(&a, &a), Ordering::Equal);
    }

    #[test]
    fn test_clock_seq_before_time_fields() {
        let a = Uuid::parse_str("00000000-0000-ffff-0000-000000000000").unwrap();
        let b = Uuid::parse_str("00000000-0000-0000-0001-000000000000").unwrap();
        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_time_low_compares_stored_bytes() {
        // Stored little-endian: 01000000 vs 00000001
        let a = Uuid::parse_str("00000001-0000-0000-0000-000000000000").unwrap();
        let b = Uuid::parse_str("01000000-0000-0000-0000-000000000000").unwrap();
        assert_eq!(compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn test_sort_key_agrees_with_comparator() {
        let mut uuids = probe_uuids();
        uuids.extend((0..64).map(|_| Uuid::new_v4()));

        let mut by_compare = uuids.clone();
        by_compare.sort_by(compare);

        let mut by_key = uuids;
        by_key.sort_by_key(engine_sort_key);

        assert_eq!(by_compare, by_key);
    }

    #[test]
    fn test_engine_slice_rejects_bad_length() {
        assert!(engine_slice_to_uuid(&[0u8; 15]).is_err());
        assert!(engine_slice_to_uuid(&[0u8; 16]).is_ok());
    }

    #[test]
    fn test_add_dashes() {
        assert_eq!(
            add_dashes("00112233445566778899aabbccddeeff").unwrap(),
            "00112233-4455-6677-8899-aabbccddeeff"
        );
        assert!(add_dashes("0011").is_err());
    }
}
