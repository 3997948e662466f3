//! Command-line argument parsing for lockscan
use clap::{ArgGroup, Parser, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "lockscan")]
#[command(about = "Find which processes hold files open", long_about = None)]
#[command(group(ArgGroup::new("mode").args(["list", "pid", "file"])))]
pub struct Cli {
    /// Lists all locked files
    #[arg(long)]
    pub list: bool,

    /// PID of the process to inspect
    #[arg(long, value_name = "PID")]
    pub pid: Option<u32>,

    /// File path (or part of one, case-insensitive) to find the locking process for
    #[arg(long, value_name = "PATH")]
    pub file: Option<String>,

    /// Only consider processes whose image name matches this regex
    #[arg(long, value_name = "REGEX")]
    pub name: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormatArg,

    /// Output file (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<std::path::PathBuf>,

    /// Keep kernel device paths instead of drive letters
    #[arg(long)]
    pub raw_paths: bool,

    /// Longest wait for one handle's name in milliseconds (0 waits forever)
    #[arg(long, value_name = "MS", default_value_t = 200)]
    pub name_timeout_ms: u64,

    /// Give up on the whole scan after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout_secs: Option<u64>,

    /// Show a progress bar while scanning handles
    #[arg(long)]
    pub progress: bool,

    /// Enable debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Enable verbose output (warnings, status messages)
    #[arg(short, long)]
    pub verbose: bool,
}

/// Which query the user asked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    All,
    Pid(u32),
    Path(String),
}

impl Cli {
    /// The selected query, if any. `--pid 0` counts as no selection.
    pub fn mode(&self) -> Option<ScanMode> {
        if self.list {
            Some(ScanMode::All)
        } else if let Some(pid) = self.pid.filter(|&p| p != 0) {
            Some(ScanMode::Pid(pid))
        } else {
            self.file
                .as_ref()
                .filter(|f| !f.is_empty())
                .map(|f| ScanMode::Path(f.clone()))
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormatArg {
    Text,
    Csv,
    Json,
    Jsonl,
}
