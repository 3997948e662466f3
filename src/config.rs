//! Scan configuration
use crate::system::buffer::GrowPolicy;
use regex::Regex;
use std::time::Duration;

/// Knobs for a single scan.
///
/// Built from command-line arguments by the binary; library users can start
/// from `ScanOptions::default()` and override fields.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Buffer policy for the system handle table query
    pub handle_table: GrowPolicy,
    /// Buffer policy for each object name query
    pub object_name: GrowPolicy,
    /// Longest wait for one handle's name; `None` queries inline without a bound
    pub name_timeout: Option<Duration>,
    /// Abort the scan with `Cancelled` once this much time has passed
    pub deadline: Option<Duration>,
    /// Rewrite `\Device\HarddiskVolumeN` prefixes to drive letters
    pub translate_device_paths: bool,
    /// Only consider processes whose image name matches
    pub process_filter: Option<Regex>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            handle_table: GrowPolicy::system_handles(),
            object_name: GrowPolicy::object_name(),
            name_timeout: Some(Duration::from_millis(200)),
            deadline: None,
            translate_device_paths: true,
            process_filter: None,
        }
    }
}

impl ScanOptions {
    /// Set the process name filter from a regex pattern
    pub fn with_process_filter(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.process_filter = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Whether a process with this image name takes part in the scan
    pub fn accepts_process(&self, image_name: &str) -> bool {
        self.process_filter
            .as_ref()
            .map_or(true, |re| re.is_match(image_name))
    }
}
