//! Custom error types for the application
use std::fmt;

/// Which system query an error came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStage {
    SystemHandles,
    Duplicate,
    ObjectName,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            QueryStage::SystemHandles => f.write_str("system handle table"),
            QueryStage::Duplicate => f.write_str("handle duplication"),
            QueryStage::ObjectName => f.write_str("object name"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The process snapshot could not be created or walked
    #[error("process enumeration failed: {0}")]
    Enumeration(#[source] std::io::Error),

    /// A system query returned a status other than success or "too small"
    #[error("{stage} query failed with status 0x{status:08x}")]
    QueryFailed { stage: QueryStage, status: u32 },

    /// Buffer growth retries were used up
    #[error("{stage} query still did not fit after {attempts} attempts")]
    ResourceExhausted { stage: QueryStage, attempts: u32 },

    #[error("{stage} buffer is malformed: {detail}")]
    Malformed { stage: QueryStage, detail: String },

    #[error("access denied to process {pid}")]
    AccessDenied { pid: u32 },

    /// The owner could be opened but this one handle refused duplication
    #[error("access denied to handle 0x{handle:x} in process {pid}")]
    HandleDenied { pid: u32, handle: u64 },

    #[error("handle 0x{handle:x} in process {pid} no longer exists")]
    NotFound { pid: u32, handle: u64 },

    #[error("ntdll export {0} is not available")]
    MissingExport(&'static str),

    #[error("scan cancelled")]
    Cancelled,

    #[error("handle scanning is only supported on Windows")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV into_inner error: {0}")]
    CsvIntoInner(#[from] csv::IntoInnerError<csv::Writer<Vec<u8>>>),

    #[error("UTF-8 conversion error: {0}")]
    FromUtf8(#[from] std::string::FromUtf8Error),
}

impl ScanError {
    /// Whether this error only concerns a single handle and the scan can go on
    pub fn is_per_handle(&self) -> bool {
        match self {
            ScanError::AccessDenied { .. }
            | ScanError::HandleDenied { .. }
            | ScanError::NotFound { .. } => true,
            ScanError::QueryFailed { stage, .. }
            | ScanError::ResourceExhausted { stage, .. }
            | ScanError::Malformed { stage, .. } => {
                matches!(stage, QueryStage::Duplicate | QueryStage::ObjectName)
            }
            _ => false,
        }
    }
}
