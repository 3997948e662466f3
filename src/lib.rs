//! Library crate for lockscan: find which processes hold files open

#![deny(unsafe_code)]

// Allow clippy lints that would require significant refactoring
#![allow(clippy::new_without_default)]
#![allow(clippy::collapsible_if)]
#![allow(clippy::unnecessary_cast)]

pub mod config;
pub mod error;
pub mod index;
pub mod notify;
pub mod system;

// CLI modules
pub mod cli {
    pub mod args;
}

// Format modules
pub mod formats {
    pub mod csv;
    pub mod json;
    pub mod jsonl;
    pub mod text;
    pub mod traits;
}

pub use config::ScanOptions;
pub use error::{QueryStage, ScanError};
pub use index::{CancelToken, LockedFileEntry, LockedFileIndex, LockedFiles, ScanSummary};
