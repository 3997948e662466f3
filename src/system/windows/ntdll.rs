//! ntdll exports, looked up once per process and kept for its lifetime
use crate::error::ScanError;
use crate::system::buffer::QueryStatus;
use std::ffi::c_void;
use std::sync::OnceLock;
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::LibraryLoader::{GetModuleHandleW, GetProcAddress};

/// ObjectNameInformation class for NtQueryObject
pub const OBJECT_NAME_INFORMATION: u32 = 1;

pub type NtQuerySystemInformationFn = unsafe extern "system" fn(
    system_information_class: u32,
    system_information: *mut c_void,
    system_information_length: u32,
    return_length: *mut u32,
) -> i32;

pub type NtQueryObjectFn = unsafe extern "system" fn(
    handle: HANDLE,
    object_information_class: u32,
    object_information: *mut c_void,
    object_information_length: u32,
    return_length: *mut u32,
) -> i32;

static NT_QUERY_SYSTEM_INFORMATION: OnceLock<Option<NtQuerySystemInformationFn>> =
    OnceLock::new();
static NT_QUERY_OBJECT: OnceLock<Option<NtQueryObjectFn>> = OnceLock::new();

type RawExport = unsafe extern "system" fn() -> isize;

#[allow(unsafe_code)]
fn ntdll_export(name: &'static [u8]) -> Option<RawExport> {
    debug_assert_eq!(name.last(), Some(&0));
    let module_name: Vec<u16> = "ntdll.dll".encode_utf16().chain(Some(0)).collect();
    // ntdll is mapped into every process and never unloaded
    let module = unsafe { GetModuleHandleW(module_name.as_ptr()) };
    if module == 0 {
        return None;
    }
    unsafe { GetProcAddress(module, name.as_ptr()) }
}

#[allow(unsafe_code)]
pub fn nt_query_system_information() -> Result<NtQuerySystemInformationFn, ScanError> {
    let export = *NT_QUERY_SYSTEM_INFORMATION.get_or_init(|| {
        ntdll_export(b"NtQuerySystemInformation\0").map(|f| {
            // SAFETY: the export has this documented signature
            unsafe { std::mem::transmute::<RawExport, NtQuerySystemInformationFn>(f) }
        })
    });
    export.ok_or(ScanError::MissingExport("NtQuerySystemInformation"))
}

#[allow(unsafe_code)]
pub fn nt_query_object() -> Result<NtQueryObjectFn, ScanError> {
    let export = *NT_QUERY_OBJECT.get_or_init(|| {
        ntdll_export(b"NtQueryObject\0").map(|f| {
            // SAFETY: the export has this documented signature
            unsafe { std::mem::transmute::<RawExport, NtQueryObjectFn>(f) }
        })
    });
    export.ok_or(ScanError::MissingExport("NtQueryObject"))
}

fn buffer_args(buf: &mut [u8]) -> (*mut c_void, u32) {
    if buf.is_empty() {
        (std::ptr::null_mut(), 0)
    } else {
        let len = u32::try_from(buf.len()).unwrap_or(u32::MAX);
        (buf.as_mut_ptr().cast(), len)
    }
}

/// One NtQuerySystemInformation call into `buf`
#[allow(unsafe_code)]
pub fn query_system_information(
    query: NtQuerySystemInformationFn,
    class: u32,
    buf: &mut [u8],
) -> QueryStatus {
    let (ptr, len) = buffer_args(buf);
    let mut return_length = 0u32;
    // SAFETY: ptr/len describe a writable buffer we own for the whole call
    let status = unsafe { query(class, ptr, len, &mut return_length) };
    QueryStatus::from_ntstatus(status as u32, return_length, buf.len())
}

/// One NtQueryObject call for `handle` into `buf`
#[allow(unsafe_code)]
pub fn query_object(query: NtQueryObjectFn, handle: HANDLE, class: u32, buf: &mut [u8]) -> QueryStatus {
    let (ptr, len) = buffer_args(buf);
    let mut return_length = 0u32;
    // SAFETY: as above; the handle is owned by the caller for the call's duration
    let status = unsafe { query(handle, class, ptr, len, &mut return_length) };
    QueryStatus::from_ntstatus(status as u32, return_length, buf.len())
}
