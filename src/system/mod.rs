//! System snapshot types and the source trait the scanner runs against
use crate::error::ScanError;
use std::collections::HashMap;

pub mod buffer;
pub mod layout;
pub mod object_name;
pub mod worker;

#[cfg(windows)]
pub mod windows;

/// Running processes at snapshot time, keyed by PID
pub type ProcessTable = HashMap<u32, String>;

/// One open kernel handle at snapshot time.
///
/// Several records may share the same `object`: one kernel object, many handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleRecord {
    pub owner_pid: u32,
    pub handle_value: u64,
    pub object_type: u16,
    pub flags: u32,
    pub object: u64,
    pub granted_access: u32,
}

/// Handle table snapshot plus what was learned while taking it
#[derive(Debug, Clone, Default)]
pub struct HandleSnapshot {
    pub records: Vec<HandleRecord>,
    /// Object type number of "File" objects, when it could be determined
    pub file_type: Option<u16>,
}

/// Outcome of inspecting one handle that did not fail outright
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A file-system object with a non-empty path
    Path(String),
    /// Not a disk file, or an object without a name
    Unnamed,
    /// The name query did not finish within the configured wait
    TimedOut,
}

/// The OS-facing half of a scan.
///
/// Each call is one stage; the index drives them strictly in sequence.
pub trait LockSource {
    /// Snapshot running processes
    fn list_processes(&mut self) -> Result<ProcessTable, ScanError>;

    /// Snapshot every open handle in the system
    fn list_system_handles(&mut self) -> Result<HandleSnapshot, ScanError>;

    /// Duplicate, classify and name one handle.
    ///
    /// Errors here concern only this handle (`AccessDenied`, `NotFound`,
    /// object-name query failures); the index skips it and moves on.
    fn resolve_handle(
        &mut self,
        record: &HandleRecord,
        file_type: Option<u16>,
    ) -> Result<Resolution, ScanError>;
}

#[cfg(windows)]
pub type SystemSource = windows::WindowsSource;

#[cfg(not(windows))]
pub type SystemSource = UnsupportedSource;

/// The live source for this platform
#[cfg(windows)]
pub fn system_source(options: &crate::config::ScanOptions) -> SystemSource {
    windows::WindowsSource::new(options)
}

/// The live source for this platform
#[cfg(not(windows))]
pub fn system_source(_options: &crate::config::ScanOptions) -> SystemSource {
    UnsupportedSource
}

/// Stand-in on platforms without a handle table to inspect
#[cfg(not(windows))]
pub struct UnsupportedSource;

#[cfg(not(windows))]
impl LockSource for UnsupportedSource {
    fn list_processes(&mut self) -> Result<ProcessTable, ScanError> {
        Err(ScanError::Unsupported)
    }

    fn list_system_handles(&mut self) -> Result<HandleSnapshot, ScanError> {
        Err(ScanError::Unsupported)
    }

    fn resolve_handle(
        &mut self,
        _record: &HandleRecord,
        _file_type: Option<u16>,
    ) -> Result<Resolution, ScanError> {
        Err(ScanError::Unsupported)
    }
}

/// Bounds-checked little-endian field readers over raw query output
pub struct FieldReader;

impl FieldReader {
    /// Read a u8 at the given offset.
    pub fn read_u8(bytes: &[u8], offset: usize) -> Option<u8> {
        bytes.get(offset).copied()
    }

    /// Read a u16 (2 bytes) at the given offset.
    pub fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
        let raw = bytes.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes([raw[0], raw[1]]))
    }

    /// Read a u32 (4 bytes) at the given offset.
    pub fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
        let raw = bytes.get(offset..offset.checked_add(4)?)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(raw);
        Some(u32::from_le_bytes(buf))
    }

    /// Read a u64 (8 bytes) at the given offset.
    pub fn read_u64(bytes: &[u8], offset: usize) -> Option<u64> {
        let raw = bytes.get(offset..offset.checked_add(8)?)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Some(u64::from_le_bytes(buf))
    }

    /// Read a pointer-sized unsigned value, widened to u64
    pub fn read_usize(bytes: &[u8], offset: usize, pointer_width: usize) -> Option<u64> {
        match pointer_width {
            4 => Self::read_u32(bytes, offset).map(u64::from),
            8 => Self::read_u64(bytes, offset),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_bounds_checked() {
        let bytes = [0x01, 0x02, 0x03, 0x04, 0x05];
        assert_eq!(FieldReader::read_u16(&bytes, 0), Some(0x0201));
        assert_eq!(FieldReader::read_u32(&bytes, 1), Some(0x0504_0302));
        assert_eq!(FieldReader::read_u32(&bytes, 2), None);
        assert_eq!(FieldReader::read_u64(&bytes, 0), None);
        assert_eq!(FieldReader::read_u8(&bytes, 5), None);
        assert_eq!(FieldReader::read_u16(&bytes, usize::MAX), None);
    }

    #[test]
    fn test_read_usize_widths() {
        let bytes = [0xff, 0, 0, 0, 1, 0, 0, 0];
        assert_eq!(FieldReader::read_usize(&bytes, 0, 4), Some(0xff));
        assert_eq!(FieldReader::read_usize(&bytes, 0, 8), Some(0x1_0000_00ff));
        assert_eq!(FieldReader::read_usize(&bytes, 0, 2), None);
    }
}
