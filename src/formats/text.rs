//! Text (table) output formatter for lockscan
use crate::error::ScanError;
use crate::formats::traits::OutputFormatter;
use crate::index::LockedFileEntry;
use prettytable::{Cell, Row, Table};

/// Text formatter that outputs data in a human-readable table format
pub struct TextFormatter;

impl OutputFormatter for TextFormatter {
    fn format_locked_files(&self, entries: &[LockedFileEntry]) -> Result<String, ScanError> {
        let mut table = Table::new();
        table.set_format(*prettytable::format::consts::FORMAT_NO_LINESEP_WITH_TITLE);

        // Header
        table.set_titles(Row::new(vec![
            Cell::new("PID").style_spec("c"),
            Cell::new("Process Name").style_spec("c"),
            Cell::new("File Path").style_spec("c"),
        ]));

        // Data rows
        for entry in entries {
            table.add_row(Row::new(vec![
                Cell::new(&entry.pid.to_string()),
                Cell::new(&entry.process_name),
                Cell::new(&entry.file_path),
            ]));
        }

        Ok(table.to_string())
    }
}
