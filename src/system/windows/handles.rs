//! System-wide handle table snapshot
use crate::error::{QueryStage, ScanError};
use crate::system::buffer::{ntstatus, query_with_growing_buffer, GrowPolicy};
use crate::system::layout::{decode_handle_table, TableLayout, HOST_POINTER_WIDTH};
use crate::system::windows::ntdll;
use crate::system::{HandleRecord, HandleSnapshot};
use std::fs::File;
use std::os::windows::io::AsRawHandle;

/// A file we hold open across the query so its record reveals the
/// object type number the running OS uses for files.
struct FileTypeProbe {
    file: File,
    pid: u32,
}

impl FileTypeProbe {
    fn open() -> Option<Self> {
        let path = std::env::current_exe().ok()?;
        match File::open(&path) {
            Ok(file) => Some(FileTypeProbe {
                file,
                pid: std::process::id(),
            }),
            Err(e) => {
                log::debug!("cannot open {} as a type probe: {}", path.display(), e);
                None
            }
        }
    }

    fn handle_value(&self) -> u64 {
        self.file.as_raw_handle() as usize as u64
    }

    fn is_probe(&self, record: &HandleRecord) -> bool {
        record.owner_pid == self.pid && record.handle_value == self.handle_value()
    }
}

pub struct SystemHandleEnumerator {
    policy: GrowPolicy,
    layout: TableLayout,
}

impl SystemHandleEnumerator {
    pub fn new(policy: GrowPolicy) -> Self {
        SystemHandleEnumerator {
            policy,
            layout: TableLayout::Extended,
        }
    }

    /// Snapshot every open handle in the system
    pub fn list_system_handles(&mut self) -> Result<HandleSnapshot, ScanError> {
        let probe = FileTypeProbe::open();
        let mut records = self.query_records()?;

        let mut file_type = None;
        if let Some(probe) = &probe {
            file_type = records
                .iter()
                .find(|r| probe.is_probe(r))
                .map(|r| r.object_type);
            records.retain(|r| !probe.is_probe(r));
        }
        drop(probe);

        match file_type {
            Some(t) => log::debug!("file objects use type number {}", t),
            None => log::debug!("file type number unknown, classifying every handle"),
        }

        Ok(HandleSnapshot { records, file_type })
    }

    fn query_records(&mut self) -> Result<Vec<HandleRecord>, ScanError> {
        match self.query_layout(self.layout) {
            Err(ScanError::QueryFailed { status, .. })
                if self.layout == TableLayout::Extended
                    && (status == ntstatus::STATUS_INVALID_INFO_CLASS
                        || status == ntstatus::STATUS_NOT_IMPLEMENTED) =>
            {
                log::warn!(
                    "extended handle table unavailable, using the legacy layout; it keeps only \
                     the low {} bits of owner PIDs, so files may be attributed to the wrong \
                     process on hosts with larger PIDs",
                    TableLayout::Legacy.owner_pid_bits()
                );
                self.layout = TableLayout::Legacy;
                self.query_layout(TableLayout::Legacy)
            }
            other => other,
        }
    }

    fn query_layout(&self, layout: TableLayout) -> Result<Vec<HandleRecord>, ScanError> {
        let query = ntdll::nt_query_system_information()?;
        let class = layout.info_class();
        let output = query_with_growing_buffer(QueryStage::SystemHandles, &self.policy, |buf| {
            ntdll::query_system_information(query, class, buf)
        })?;

        log::trace!(
            "handle table query returned {} bytes ({} byte buffer)",
            output.bytes().len(),
            output.capacity()
        );
        decode_handle_table(output.bytes(), layout, HOST_POINTER_WIDTH)
    }
}
