//! Object name buffers and NT device path translation
use crate::error::{QueryStage, ScanError};
use crate::system::FieldReader;

fn malformed(detail: String) -> ScanError {
    ScanError::Malformed {
        stage: QueryStage::ObjectName,
        detail,
    }
}

/// Decode the UNICODE_STRING at the start of an object name buffer.
///
/// The string's buffer pointer refers to memory inside the same query
/// buffer, so it is translated against `base_address` and must land within
/// `bytes`. Returns `None` for an unnamed object.
pub fn decode_object_name(
    bytes: &[u8],
    base_address: u64,
    pointer_width: usize,
) -> Result<Option<String>, ScanError> {
    if bytes.is_empty() {
        return Ok(None);
    }

    let byte_len = FieldReader::read_u16(bytes, 0)
        .ok_or_else(|| malformed(format!("{} bytes is too short for a name", bytes.len())))?;
    if byte_len == 0 {
        return Ok(None);
    }
    if byte_len % 2 != 0 {
        return Err(malformed(format!("odd UTF-16 length {}", byte_len)));
    }

    // Length, MaximumLength, then the pointer at its natural alignment
    let pointer = FieldReader::read_usize(bytes, pointer_width, pointer_width)
        .ok_or_else(|| malformed("name pointer is outside the buffer".to_string()))?;
    if pointer == 0 {
        return Ok(None);
    }

    let start = pointer
        .checked_sub(base_address)
        .and_then(|offset| usize::try_from(offset).ok())
        .ok_or_else(|| malformed(format!("name pointer 0x{:x} precedes the buffer", pointer)))?;
    let end = start
        .checked_add(usize::from(byte_len))
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| {
            malformed(format!(
                "name of {} bytes at offset {} overruns {} returned bytes",
                byte_len,
                start,
                bytes.len()
            ))
        })?;

    let units: Vec<u16> = bytes[start..end]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(Some(String::from_utf16_lossy(&units)))
}

/// Maps NT device prefixes (`\Device\HarddiskVolume3`) to DOS drives (`C:`)
#[derive(Debug, Clone, Default)]
pub struct DevicePathMap {
    entries: Vec<(String, String)>,
}

const MUP_PREFIX: &str = r"\Device\Mup";

impl DevicePathMap {
    pub fn new() -> Self {
        DevicePathMap {
            entries: Vec::new(),
        }
    }

    /// Register a device target for a drive (e.g. `C:`)
    pub fn insert(&mut self, device: impl Into<String>, drive: impl Into<String>) {
        let device = device.into();
        let device = device.trim_end_matches('\\').to_string();
        if device.is_empty() {
            return;
        }
        self.entries.push((device, drive.into()));
        // longest prefix wins when devices nest
        self.entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Rewrite a kernel path to its DOS form; unknown devices pass through
    pub fn translate(&self, path: &str) -> String {
        for (device, drive) in &self.entries {
            if let Some(rest) = strip_device(path, device) {
                return format!("{}{}", drive, rest);
            }
        }

        if let Some(rest) = strip_device(path, MUP_PREFIX) {
            if !rest.is_empty() {
                return format!(r"\{}", rest);
            }
        }

        path.to_string()
    }
}

/// Strip `device` from the front of `path` if it ends on a component boundary
fn strip_device<'a>(path: &'a str, device: &str) -> Option<&'a str> {
    let head = path.get(..device.len())?;
    if !head.eq_ignore_ascii_case(device) {
        return None;
    }
    let rest = &path[device.len()..];
    if rest.is_empty() || rest.starts_with('\\') {
        Some(rest)
    } else {
        None
    }
}
