//! Bringing another process's handle into our own handle table
use crate::error::{QueryStage, ScanError};
use std::io;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use windows_sys::Win32::Foundation::{
    DuplicateHandle, ERROR_ACCESS_DENIED, ERROR_INVALID_HANDLE, ERROR_INVALID_PARAMETER, HANDLE,
};
use windows_sys::Win32::System::Threading::{GetCurrentProcess, OpenProcess, PROCESS_DUP_HANDLE};

const DUPLICATE_SAME_ACCESS: u32 = 0x0000_0002;

pub struct HandleDuplicator {
    current_process: HANDLE,
}

impl HandleDuplicator {
    #[allow(unsafe_code)]
    pub fn new() -> Self {
        HandleDuplicator {
            // pseudo handle; never closed
            current_process: unsafe { GetCurrentProcess() },
        }
    }

    /// Duplicate `handle_value` from `owner_pid` into this process.
    ///
    /// The owner is opened with `PROCESS_DUP_HANDLE` only and closed again
    /// before returning, whether or not duplication worked.
    #[allow(unsafe_code)]
    pub fn duplicate(&self, owner_pid: u32, handle_value: u64) -> Result<OwnedHandle, ScanError> {
        let not_found = ScanError::NotFound {
            pid: owner_pid,
            handle: handle_value,
        };
        let Ok(source) = HANDLE::try_from(handle_value) else {
            return Err(not_found);
        };

        let raw_owner = unsafe { OpenProcess(PROCESS_DUP_HANDLE, 0, owner_pid) };
        if raw_owner == 0 {
            let err = io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                // the process exited after the snapshot
                Some(code) if code == ERROR_INVALID_PARAMETER as i32 => not_found,
                _ => ScanError::AccessDenied { pid: owner_pid },
            });
        }
        // SAFETY: a fresh, valid handle that nothing else owns
        let owner = unsafe { OwnedHandle::from_raw_handle(raw_owner as RawHandle) };

        let mut duplicated: HANDLE = 0;
        let ok = unsafe {
            DuplicateHandle(
                owner.as_raw_handle() as HANDLE,
                source,
                self.current_process,
                &mut duplicated,
                0,
                0,
                DUPLICATE_SAME_ACCESS,
            )
        };
        let err = (ok == 0).then(io::Error::last_os_error);
        drop(owner);

        match err {
            None if duplicated != 0 => {
                // SAFETY: DuplicateHandle succeeded; the new handle is ours alone
                Ok(unsafe { OwnedHandle::from_raw_handle(duplicated as RawHandle) })
            }
            None => Err(not_found),
            Some(err) => match err.raw_os_error() {
                Some(code) if code == ERROR_INVALID_HANDLE as i32 => Err(not_found),
                // protected objects refuse duplication even when the owner opened
                Some(code) if code == ERROR_ACCESS_DENIED as i32 => Err(ScanError::HandleDenied {
                    pid: owner_pid,
                    handle: handle_value,
                }),
                code => Err(ScanError::QueryFailed {
                    stage: QueryStage::Duplicate,
                    status: code.unwrap_or(0) as u32,
                }),
            },
        }
    }
}
