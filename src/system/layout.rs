//! Handle table layouts returned by the system handle query.
//!
//! Both layouts are a count header followed by fixed-width records. Field
//! offsets depend on the pointer width of the OS that produced the buffer,
//! so the decoder takes it as a parameter instead of assuming the host's.
//!
//! Extended table (information class 64), per record:
//! - Object: pointer
//! - UniqueProcessId: pointer-sized
//! - HandleValue: pointer-sized
//! - GrantedAccess: u32
//! - CreatorBackTraceIndex: u16
//! - ObjectTypeIndex: u16
//! - HandleAttributes: u32
//! - Reserved: u32
//!
//! Legacy table (information class 16), per record:
//! - UniqueProcessId: u16, CreatorBackTraceIndex: u16
//! - ObjectTypeIndex: u8, HandleAttributes: u8
//! - HandleValue: u16
//! - Object: pointer (pointer aligned)
//! - GrantedAccess: u32, padded to pointer alignment
use crate::error::{QueryStage, ScanError};
use crate::system::{FieldReader, HandleRecord};

/// Pointer width of the running process, in bytes
pub const HOST_POINTER_WIDTH: usize = std::mem::size_of::<usize>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLayout {
    Extended,
    Legacy,
}

impl TableLayout {
    /// Information class that returns this layout
    pub fn info_class(self) -> u32 {
        match self {
            TableLayout::Extended => 64,
            TableLayout::Legacy => 16,
        }
    }

    /// Significant bits of the owner PID field. Larger PIDs come back
    /// truncated and may name a different process.
    pub fn owner_pid_bits(self) -> u32 {
        match self {
            TableLayout::Extended => 32,
            TableLayout::Legacy => 16,
        }
    }

    /// Bytes before the first record
    pub fn header_len(self, pointer_width: usize) -> usize {
        match self {
            // NumberOfHandles + Reserved
            TableLayout::Extended => 2 * pointer_width,
            // u32 count, padded so records are pointer aligned
            TableLayout::Legacy => pointer_width,
        }
    }

    pub fn record_len(self, pointer_width: usize) -> usize {
        match self {
            TableLayout::Extended => 3 * pointer_width + 16,
            TableLayout::Legacy => align_up(8 + pointer_width + 4, pointer_width),
        }
    }

    fn read_count(self, bytes: &[u8], pointer_width: usize) -> Option<u64> {
        match self {
            TableLayout::Extended => FieldReader::read_usize(bytes, 0, pointer_width),
            TableLayout::Legacy => FieldReader::read_u32(bytes, 0).map(u64::from),
        }
    }

    fn decode_record(self, rec: &[u8], pointer_width: usize) -> Option<HandleRecord> {
        let pw = pointer_width;
        match self {
            TableLayout::Extended => {
                let pid = FieldReader::read_usize(rec, pw, pw)?;
                Some(HandleRecord {
                    object: FieldReader::read_usize(rec, 0, pw)?,
                    owner_pid: u32::try_from(pid).ok()?,
                    handle_value: FieldReader::read_usize(rec, 2 * pw, pw)?,
                    granted_access: FieldReader::read_u32(rec, 3 * pw)?,
                    object_type: FieldReader::read_u16(rec, 3 * pw + 6)?,
                    flags: FieldReader::read_u32(rec, 3 * pw + 8)?,
                })
            }
            TableLayout::Legacy => Some(HandleRecord {
                owner_pid: u32::from(FieldReader::read_u16(rec, 0)?),
                object_type: u16::from(FieldReader::read_u8(rec, 4)?),
                flags: u32::from(FieldReader::read_u8(rec, 5)?),
                handle_value: u64::from(FieldReader::read_u16(rec, 6)?),
                object: FieldReader::read_usize(rec, 8, pw)?,
                granted_access: FieldReader::read_u32(rec, 8 + pw)?,
            }),
        }
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

fn malformed(detail: String) -> ScanError {
    ScanError::Malformed {
        stage: QueryStage::SystemHandles,
        detail,
    }
}

/// Decode a handle table buffer.
///
/// `bytes` must be exactly what the OS reported as written. The record
/// count is validated against it before any record is read.
pub fn decode_handle_table(
    bytes: &[u8],
    layout: TableLayout,
    pointer_width: usize,
) -> Result<Vec<HandleRecord>, ScanError> {
    if pointer_width != 4 && pointer_width != 8 {
        return Err(malformed(format!(
            "unsupported pointer width {}",
            pointer_width
        )));
    }

    let header_len = layout.header_len(pointer_width);
    let record_len = layout.record_len(pointer_width);

    let count = layout
        .read_count(bytes, pointer_width)
        .ok_or_else(|| malformed(format!("{} bytes is too short for a header", bytes.len())))?;
    let count = usize::try_from(count)
        .map_err(|_| malformed(format!("record count {} does not fit in memory", count)))?;

    let needed = count
        .checked_mul(record_len)
        .and_then(|n| n.checked_add(header_len))
        .ok_or_else(|| malformed(format!("record count {} overflows", count)))?;
    if needed > bytes.len() {
        return Err(malformed(format!(
            "{} records need {} bytes but only {} were returned",
            count,
            needed,
            bytes.len()
        )));
    }

    let mut records = Vec::with_capacity(count);
    for (index, rec) in bytes[header_len..needed]
        .chunks_exact(record_len)
        .enumerate()
    {
        let record = layout
            .decode_record(rec, pointer_width)
            .ok_or_else(|| malformed(format!("record {} could not be decoded", index)))?;
        records.push(record);
    }

    Ok(records)
}

/// Test and bench helper: encode records in a given layout
#[doc(hidden)]
pub fn encode_handle_table(
    records: &[HandleRecord],
    layout: TableLayout,
    pointer_width: usize,
) -> Vec<u8> {
    fn put(buf: &mut Vec<u8>, at: usize, value: u64, width: usize) {
        buf[at..at + width].copy_from_slice(&value.to_le_bytes()[..width]);
    }

    let pw = pointer_width;
    let header_len = layout.header_len(pw);
    let record_len = layout.record_len(pw);
    let mut buf = vec![0u8; header_len + records.len() * record_len];

    match layout {
        TableLayout::Extended => put(&mut buf, 0, records.len() as u64, pw),
        TableLayout::Legacy => put(&mut buf, 0, records.len() as u64, 4),
    }

    for (i, r) in records.iter().enumerate() {
        let base = header_len + i * record_len;
        match layout {
            TableLayout::Extended => {
                put(&mut buf, base, r.object, pw);
                put(&mut buf, base + pw, u64::from(r.owner_pid), pw);
                put(&mut buf, base + 2 * pw, r.handle_value, pw);
                put(&mut buf, base + 3 * pw, u64::from(r.granted_access), 4);
                put(&mut buf, base + 3 * pw + 6, u64::from(r.object_type), 2);
                put(&mut buf, base + 3 * pw + 8, u64::from(r.flags), 4);
            }
            TableLayout::Legacy => {
                put(&mut buf, base, u64::from(r.owner_pid), 2);
                put(&mut buf, base + 4, u64::from(r.object_type), 1);
                put(&mut buf, base + 5, u64::from(r.flags), 1);
                put(&mut buf, base + 6, r.handle_value, 2);
                put(&mut buf, base + 8, r.object, pw);
                put(&mut buf, base + 8 + pw, u64::from(r.granted_access), 4);
            }
        }
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<HandleRecord> {
        vec![
            HandleRecord {
                owner_pid: 4,
                handle_value: 0x4,
                object_type: 7,
                flags: 0,
                object: 0xffff_a000_0000_1000,
                granted_access: 0x001f_ffff,
            },
            HandleRecord {
                owner_pid: 1234,
                handle_value: 0x1a4,
                object_type: 37,
                flags: 2,
                object: 0xffff_a000_0000_2000,
                granted_access: 0x0012_0089,
            },
        ]
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(TableLayout::Extended.record_len(8), 40);
        assert_eq!(TableLayout::Extended.record_len(4), 28);
        assert_eq!(TableLayout::Legacy.record_len(8), 24);
        assert_eq!(TableLayout::Legacy.record_len(4), 16);
        assert_eq!(TableLayout::Extended.header_len(8), 16);
        assert_eq!(TableLayout::Legacy.header_len(8), 8);
    }

    #[test]
    fn test_decode_extended_64() {
        let records = sample();
        let bytes = encode_handle_table(&records, TableLayout::Extended, 8);
        assert_eq!(bytes.len(), 16 + 2 * 40);

        let decoded = decode_handle_table(&bytes, TableLayout::Extended, 8).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_decode_extended_fields_at_fixed_offsets() {
        let mut bytes = vec![0u8; 16 + 40];
        bytes[0] = 1;
        bytes[16 + 8..16 + 12].copy_from_slice(&70_000u32.to_le_bytes());
        bytes[16 + 16] = 0x44;
        bytes[16 + 24..16 + 28].copy_from_slice(&0x0012_019fu32.to_le_bytes());
        bytes[16 + 30] = 42;

        let decoded = decode_handle_table(&bytes, TableLayout::Extended, 8).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].owner_pid, 70_000);
        assert_eq!(decoded[0].handle_value, 0x44);
        assert_eq!(decoded[0].granted_access, 0x0012_019f);
        assert_eq!(decoded[0].object_type, 42);
    }

    #[test]
    fn test_decode_legacy_32_truncates_to_field_width() {
        let mut records = sample();
        records.iter_mut().for_each(|r| r.object &= 0xffff_ffff);
        let bytes = encode_handle_table(&records, TableLayout::Legacy, 4);
        assert_eq!(bytes.len(), 4 + 2 * 16);

        let decoded = decode_handle_table(&bytes, TableLayout::Legacy, 4).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_legacy_keeps_only_low_pid_bits() {
        let mut record = sample()[0];
        record.owner_pid = 70_000;
        record.handle_value = 0x44;
        let bytes = encode_handle_table(&[record], TableLayout::Legacy, 8);

        let decoded = decode_handle_table(&bytes, TableLayout::Legacy, 8).unwrap();
        let mask = (1u32 << TableLayout::Legacy.owner_pid_bits()) - 1;
        assert_eq!(decoded[0].owner_pid, 70_000 & mask);
        assert_ne!(decoded[0].owner_pid, 70_000);

        let bytes = encode_handle_table(&[record], TableLayout::Extended, 8);
        let decoded = decode_handle_table(&bytes, TableLayout::Extended, 8).unwrap();
        assert_eq!(decoded[0].owner_pid, 70_000);
        assert_eq!(TableLayout::Extended.owner_pid_bits(), 32);
    }

    #[test]
    fn test_count_beyond_buffer_is_malformed() {
        let mut bytes = encode_handle_table(&sample(), TableLayout::Extended, 8);
        bytes.truncate(bytes.len() - 1);

        let err = decode_handle_table(&bytes, TableLayout::Extended, 8).unwrap_err();
        match err {
            ScanError::Malformed { stage, detail } => {
                assert_eq!(stage, QueryStage::SystemHandles);
                assert!(detail.contains("2 records"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_huge_count_does_not_overflow() {
        let mut bytes = vec![0u8; 16];
        bytes[..8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            decode_handle_table(&bytes, TableLayout::Extended, 8),
            Err(ScanError::Malformed { .. })
        ));
    }

    #[test]
    fn test_short_header() {
        assert!(decode_handle_table(&[1, 0], TableLayout::Legacy, 8).is_err());
        assert!(decode_handle_table(&[0u8; 16], TableLayout::Extended, 3).is_err());
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = encode_handle_table(&sample(), TableLayout::Extended, 8);
        bytes.extend_from_slice(&[0xaa; 64]);
        let decoded = decode_handle_table(&bytes, TableLayout::Extended, 8).unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_empty_table() {
        let bytes = encode_handle_table(&[], TableLayout::Extended, 8);
        assert!(decode_handle_table(&bytes, TableLayout::Extended, 8)
            .unwrap()
            .is_empty());
    }
}
