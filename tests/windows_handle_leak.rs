#![cfg(windows)]
//! Kept in its own test binary so no other test opens handles concurrently.

use lockscan::system::buffer::GrowPolicy;
use lockscan::system::system_source;
use lockscan::{LockedFileIndex, ScanError, ScanOptions};
use std::time::Duration;
use windows_sys::Win32::System::Threading::{GetCurrentProcess, GetProcessHandleCount};

fn own_handle_count() -> u32 {
    let mut count = 0u32;
    let ok = unsafe { GetProcessHandleCount(GetCurrentProcess(), &mut count) };
    assert_ne!(ok, 0);
    count
}

fn scan_once(options: ScanOptions) {
    let mut index = LockedFileIndex::new(system_source(&options), options);
    let _ = index.find_all().unwrap();
    let _ = index.find_by_pid(std::process::id()).unwrap();
}

fn failing_scan(options: ScanOptions) -> ScanError {
    let mut index = LockedFileIndex::new(system_source(&options), options);
    index.find_all().unwrap_err()
}

fn settle() {
    // let the resolver worker threads exit
    std::thread::sleep(Duration::from_millis(200));
}

#[test]
fn test_scans_do_not_leak_handles() {
    // first scan resolves ntdll exports and warms up the runtime
    scan_once(ScanOptions::default());
    settle();

    // successful scans; protected processes make these partial failures
    let before = own_handle_count();
    scan_once(ScanOptions::default());
    scan_once(ScanOptions {
        name_timeout: None,
        ..ScanOptions::default()
    });
    settle();
    assert_eq!(own_handle_count(), before);

    // handle table never fits: aborts after the type probe file is open
    let before = own_handle_count();
    let err = failing_scan(ScanOptions {
        handle_table: GrowPolicy {
            max_len: 16,
            ..GrowPolicy::system_handles()
        },
        ..ScanOptions::default()
    });
    assert!(matches!(err, ScanError::ResourceExhausted { .. }), "{err}");
    settle();
    assert_eq!(own_handle_count(), before);

    // deadline already passed
    let before = own_handle_count();
    let err = failing_scan(ScanOptions {
        deadline: Some(Duration::ZERO),
        ..ScanOptions::default()
    });
    assert!(matches!(err, ScanError::Cancelled), "{err}");
    settle();
    assert_eq!(own_handle_count(), before);
}
