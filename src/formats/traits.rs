//! Output format traits for lockscan
use crate::error::ScanError;
use crate::index::LockedFileEntry;

/// Trait for output formatters
pub trait OutputFormatter: Send + Sync {
    fn format_locked_files(&self, entries: &[LockedFileEntry]) -> Result<String, ScanError>;
}

/// Enum for output format types
#[derive(Debug, Clone, PartialEq)]
pub enum OutputFormat {
    Text,
    Csv,
    Json,
    Jsonl,
}

/// Enum for output destination
#[derive(Debug, Clone)]
pub enum OutputDestination {
    Stdout,
    File(std::path::PathBuf),
}

/// Output writer that combines format and destination
pub struct OutputWriter {
    formatter: Box<dyn OutputFormatter>,
    destination: OutputDestination,
}

impl OutputWriter {
    /// Create a new output writer
    pub fn new(format: OutputFormat, destination: OutputDestination) -> Self {
        let formatter: Box<dyn OutputFormatter> = match format {
            OutputFormat::Text => Box::new(crate::formats::text::TextFormatter),
            OutputFormat::Csv => Box::new(crate::formats::csv::CsvFormatter),
            OutputFormat::Json => Box::new(crate::formats::json::JsonFormatter),
            OutputFormat::Jsonl => Box::new(crate::formats::jsonl::JsonlFormatter),
        };

        Self {
            formatter,
            destination,
        }
    }

    /// Render entries with the configured formatter
    pub fn render(&self, entries: &[LockedFileEntry]) -> Result<String, ScanError> {
        self.formatter.format_locked_files(entries)
    }

    /// Write locked files to the configured destination
    pub fn write_locked_files(&self, entries: &[LockedFileEntry]) -> Result<(), ScanError> {
        let content = self.render(entries)?;

        match &self.destination {
            OutputDestination::Stdout => {
                println!("{}", content);
            }
            OutputDestination::File(path) => {
                std::fs::write(path, content)?;
            }
        }

        Ok(())
    }
}
