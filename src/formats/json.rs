//! JSON output formatter for lockscan
use crate::error::ScanError;
use crate::formats::traits::OutputFormatter;
use crate::index::LockedFileEntry;

#[derive(serde::Serialize)]
struct OutputWrapper<'a, T> {
    tool: String,
    timestamp: String,
    count: usize,
    results: &'a [T],
}

/// JSON formatter that outputs data in JSON format with metadata
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format_locked_files(&self, entries: &[LockedFileEntry]) -> Result<String, ScanError> {
        let wrapper = OutputWrapper {
            tool: "lockscan".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            count: entries.len(),
            results: entries,
        };

        let json = serde_json::to_string_pretty(&wrapper)?;
        Ok(json)
    }
}
