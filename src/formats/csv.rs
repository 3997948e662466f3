//! CSV output formatter for lockscan
use crate::error::ScanError;
use crate::formats::traits::OutputFormatter;
use crate::index::LockedFileEntry;
use csv::Writer;

/// CSV formatter that outputs data in comma-separated values format
pub struct CsvFormatter;

impl OutputFormatter for CsvFormatter {
    fn format_locked_files(&self, entries: &[LockedFileEntry]) -> Result<String, ScanError> {
        let mut wtr = Writer::from_writer(vec![]);

        // Write header
        wtr.write_record(["pid", "process_name", "file_path"])?;

        // Write data rows
        for entry in entries {
            wtr.write_record([
                entry.pid.to_string(),
                entry.process_name.clone(),
                entry.file_path.clone(),
            ])?;
        }

        wtr.flush()?;
        let data = wtr.into_inner()?;
        Ok(String::from_utf8(data)?)
    }
}
