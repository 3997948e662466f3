//! JSONL (JSON Lines) output formatter for lockscan
use crate::error::ScanError;
use crate::formats::traits::OutputFormatter;
use crate::index::LockedFileEntry;

/// JSONL formatter that outputs data as JSON objects, one per line
pub struct JsonlFormatter;

impl OutputFormatter for JsonlFormatter {
    fn format_locked_files(&self, entries: &[LockedFileEntry]) -> Result<String, ScanError> {
        let mut output = String::new();

        for entry in entries {
            let line = serde_json::to_string(entry)?;
            output.push_str(&line);
            output.push('\n');
        }

        Ok(output)
    }
}
