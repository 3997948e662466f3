//! Object name resolution for duplicated handles.
//!
//! Name queries on some file objects (synchronous handles with I/O pending,
//! pipes waiting for a peer) can block indefinitely. Non-disk handles are
//! filtered out with `GetFileType`, and with a timeout configured, the query
//! runs on a `TimedWorker` the scan only waits on for a bounded time.
use crate::error::{QueryStage, ScanError};
use crate::system::buffer::{query_with_growing_buffer, GrowPolicy};
use crate::system::layout::HOST_POINTER_WIDTH;
use crate::system::object_name::decode_object_name;
use crate::system::windows::ntdll;
use crate::system::worker::{Inspect, TimedWorker, WorkOutcome};
use crate::system::Resolution;
use std::os::windows::io::{AsRawHandle, OwnedHandle};
use std::sync::Arc;
use std::time::Duration;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Storage::FileSystem::{GetFileType, FILE_TYPE_DISK};

type Reply = Result<Option<String>, ScanError>;

/// Classify and name one handle. Runs on whichever thread owns the handle.
#[allow(unsafe_code)]
fn inspect(handle: &OwnedHandle, policy: &GrowPolicy) -> Reply {
    let raw = handle.as_raw_handle() as HANDLE;
    if unsafe { GetFileType(raw) } != FILE_TYPE_DISK {
        return Ok(None);
    }

    let query = ntdll::nt_query_object()?;
    let output = query_with_growing_buffer(QueryStage::ObjectName, policy, |buf| {
        ntdll::query_object(query, raw, ntdll::OBJECT_NAME_INFORMATION, buf)
    })?;
    decode_object_name(output.bytes(), output.base_address(), HOST_POINTER_WIDTH)
}

pub struct ObjectNameResolver {
    policy: GrowPolicy,
    worker: Option<TimedWorker<OwnedHandle, Reply>>,
}

impl ObjectNameResolver {
    pub fn new(policy: GrowPolicy, timeout: Option<Duration>) -> Self {
        let worker = timeout.filter(|t| !t.is_zero()).map(|timeout| {
            let inspect: Inspect<OwnedHandle, Reply> =
                Arc::new(move |handle: &OwnedHandle| inspect(handle, &policy));
            TimedWorker::new("lockscan-names", timeout, inspect)
        });
        ObjectNameResolver { policy, worker }
    }

    /// Resolve the name of a duplicated handle, consuming (and closing) it
    pub fn resolve(&mut self, handle: OwnedHandle) -> Result<Resolution, ScanError> {
        let Some(worker) = self.worker.as_mut() else {
            let reply = inspect(&handle, &self.policy);
            drop(handle);
            return to_resolution(reply);
        };

        match worker.run(handle)? {
            WorkOutcome::Done(reply) => to_resolution(reply),
            WorkOutcome::TimedOut => {
                // the stuck worker closes the handle once the query returns
                log::warn!("object name query exceeded its timeout, skipping handle");
                Ok(Resolution::TimedOut)
            }
            WorkOutcome::Lost => {
                log::warn!("name worker stopped unexpectedly");
                Ok(Resolution::Unnamed)
            }
        }
    }
}

fn to_resolution(reply: Reply) -> Result<Resolution, ScanError> {
    match reply? {
        Some(path) if !path.is_empty() => Ok(Resolution::Path(path)),
        _ => Ok(Resolution::Unnamed),
    }
}
