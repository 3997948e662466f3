//! Process snapshot via Toolhelp
use crate::error::ScanError;
use crate::system::windows::utf16_until_nul;
use crate::system::ProcessTable;
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use windows_sys::Win32::Foundation::{ERROR_NO_MORE_FILES, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Diagnostics::ToolHelp::{
    CreateToolhelp32Snapshot, Process32FirstW, Process32NextW, PROCESSENTRY32W, TH32CS_SNAPPROCESS,
};

pub struct ProcessEnumerator;

impl ProcessEnumerator {
    pub fn new() -> Self {
        ProcessEnumerator
    }

    /// Snapshot running processes as PID -> image name
    #[allow(unsafe_code)]
    pub fn list_processes(&self) -> Result<ProcessTable, ScanError> {
        let raw = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) };
        if raw == INVALID_HANDLE_VALUE {
            return Err(ScanError::Enumeration(io::Error::last_os_error()));
        }
        // SAFETY: a fresh, valid handle that nothing else owns
        let snapshot = unsafe { OwnedHandle::from_raw_handle(raw as RawHandle) };
        let snapshot_handle = snapshot.as_raw_handle() as HANDLE;

        let mut entry = PROCESSENTRY32W {
            dwSize: u32::try_from(std::mem::size_of::<PROCESSENTRY32W>()).unwrap_or(u32::MAX),
            ..unsafe { std::mem::zeroed() }
        };

        let mut processes = ProcessTable::new();
        let mut ok = unsafe { Process32FirstW(snapshot_handle, &mut entry) };
        while ok != 0 {
            processes.insert(entry.th32ProcessID, utf16_until_nul(&entry.szExeFile));
            ok = unsafe { Process32NextW(snapshot_handle, &mut entry) };
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(ERROR_NO_MORE_FILES as i32) {
            return Err(ScanError::Enumeration(err));
        }

        log::trace!("process snapshot holds {} entries", processes.len());
        Ok(processes)
    }
}
