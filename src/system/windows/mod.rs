//! Live Windows backend
use crate::config::ScanOptions;
use crate::error::ScanError;
use crate::system::object_name::DevicePathMap;
use crate::system::{HandleRecord, HandleSnapshot, LockSource, ProcessTable, Resolution};
use windows_sys::Win32::Storage::FileSystem::QueryDosDeviceW;

pub mod duplicate;
pub mod handles;
pub mod ntdll;
pub mod process;
pub mod resolver;

pub use duplicate::HandleDuplicator;
pub use handles::SystemHandleEnumerator;
pub use process::ProcessEnumerator;
pub use resolver::ObjectNameResolver;

/// Convert a NUL-terminated UTF-16 buffer to a String
pub fn utf16_until_nul(words: &[u16]) -> String {
    let end = words.iter().position(|&w| w == 0).unwrap_or(words.len());
    String::from_utf16_lossy(&words[..end])
}

/// Build the device -> drive letter map from the current DOS device table
#[allow(unsafe_code)]
pub fn query_device_map() -> DevicePathMap {
    let mut map = DevicePathMap::new();
    let mut target = vec![0u16; 1024];

    for letter in b'A'..=b'Z' {
        let drive = format!("{}:", letter as char);
        let name: Vec<u16> = drive.encode_utf16().chain(Some(0)).collect();
        let written = unsafe {
            QueryDosDeviceW(
                name.as_ptr(),
                target.as_mut_ptr(),
                u32::try_from(target.len()).unwrap_or(u32::MAX),
            )
        };
        if written == 0 {
            continue;
        }
        // first string of the returned list is the active mapping
        let device = utf16_until_nul(&target[..written as usize]);
        log::trace!("{} -> {}", drive, device);
        map.insert(device, drive);
    }

    map
}

/// `LockSource` over the running system
pub struct WindowsSource {
    processes: ProcessEnumerator,
    handles: SystemHandleEnumerator,
    duplicator: HandleDuplicator,
    resolver: ObjectNameResolver,
    translate_device_paths: bool,
    devices: DevicePathMap,
}

impl WindowsSource {
    pub fn new(options: &ScanOptions) -> Self {
        WindowsSource {
            processes: ProcessEnumerator::new(),
            handles: SystemHandleEnumerator::new(options.handle_table),
            duplicator: HandleDuplicator::new(),
            resolver: ObjectNameResolver::new(options.object_name, options.name_timeout),
            translate_device_paths: options.translate_device_paths,
            devices: DevicePathMap::new(),
        }
    }
}

impl LockSource for WindowsSource {
    fn list_processes(&mut self) -> Result<ProcessTable, ScanError> {
        self.processes.list_processes()
    }

    fn list_system_handles(&mut self) -> Result<HandleSnapshot, ScanError> {
        if self.translate_device_paths {
            self.devices = query_device_map();
            log::debug!("{} drive letters mapped", self.devices.len());
        }
        self.handles.list_system_handles()
    }

    fn resolve_handle(
        &mut self,
        record: &HandleRecord,
        file_type: Option<u16>,
    ) -> Result<Resolution, ScanError> {
        if file_type.is_some_and(|t| t != record.object_type) {
            return Ok(Resolution::Unnamed);
        }

        let handle = self
            .duplicator
            .duplicate(record.owner_pid, record.handle_value)?;
        match self.resolver.resolve(handle)? {
            Resolution::Path(path) if self.translate_device_paths => {
                Ok(Resolution::Path(self.devices.translate(&path)))
            }
            other => Ok(other),
        }
    }
}
