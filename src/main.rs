//! Main entry point for lockscan
use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::process::ExitCode;
use std::time::Duration;

use lockscan::cli::args::{Cli, OutputFormatArg, ScanMode};
use lockscan::config::ScanOptions;
use lockscan::formats::traits::{OutputDestination, OutputFormat, OutputWriter};
use lockscan::index::LockedFileIndex;
use lockscan::system::system_source;

fn main() -> ExitCode {
    // Parse command-line arguments
    let cli = Cli::parse();
    init_logging(&cli);

    let Some(mode) = cli.mode() else {
        println!("Please provide an option. Use --help for more information.");
        return ExitCode::FAILURE;
    };

    match run(&cli, &mode) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::debug!("{:?}", e);
            eprintln!("Error: {}", one_line(&e));
            ExitCode::FAILURE
        }
    }
}

/// The error and its causes on a single line
fn one_line(err: &anyhow::Error) -> String {
    format!("{:#}", err)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn init_logging(cli: &Cli) {
    let default_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(env_logger::Env::new().filter_or("LOCKSCAN_LOG", default_level))
        .format_timestamp(None)
        .init();
}

/// Translate CLI flags into scan options
fn scan_options(cli: &Cli) -> anyhow::Result<ScanOptions> {
    let mut options = ScanOptions {
        name_timeout: Some(Duration::from_millis(cli.name_timeout_ms)).filter(|t| !t.is_zero()),
        deadline: cli.timeout_secs.map(Duration::from_secs),
        translate_device_paths: !cli.raw_paths,
        ..ScanOptions::default()
    };
    if let Some(pattern) = &cli.name {
        options = options
            .with_process_filter(pattern)
            .with_context(|| format!("invalid --name pattern {:?}", pattern))?;
    }
    Ok(options)
}

fn progress_bar() -> anyhow::Result<ProgressBar> {
    let style = ProgressStyle::with_template("{spinner} {pos}/{len} handles [{elapsed_precise}]")?;
    Ok(ProgressBar::new(0).with_style(style))
}

fn run(cli: &Cli, mode: &ScanMode) -> anyhow::Result<()> {
    let options = scan_options(cli)?;
    let source = system_source(&options);
    let mut index = LockedFileIndex::new(source, options);
    if cli.progress {
        index = index.with_progress(progress_bar()?);
    }

    let files = match mode {
        ScanMode::All => index.find_all().context("scanning all handles")?,
        ScanMode::Pid(pid) => index
            .find_by_pid(*pid)
            .with_context(|| format!("scanning process {}", pid))?,
        ScanMode::Path(query) => index
            .find_by_path_substring(query)
            .with_context(|| format!("scanning for {:?}", query))?,
    };

    let summary = index.summary();
    log::info!(
        "{} files held by {} processes ({} handles examined, {} owners denied)",
        files.len(),
        files.process_count(),
        summary.considered,
        summary.denied
    );

    if files.is_empty() {
        println!("No locked files found.");
        return Ok(());
    }

    // Determine output format and destination
    let output_format = match cli.format {
        OutputFormatArg::Text => OutputFormat::Text,
        OutputFormatArg::Csv => OutputFormat::Csv,
        OutputFormatArg::Json => OutputFormat::Json,
        OutputFormatArg::Jsonl => OutputFormat::Jsonl,
    };

    let output_dest = if let Some(output_path) = &cli.output {
        OutputDestination::File(output_path.clone())
    } else {
        OutputDestination::Stdout
    };

    let output_writer = OutputWriter::new(output_format, output_dest);
    output_writer
        .write_locked_files(&files.to_entries())
        .context("writing results")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_line_flattens_multiline_causes() {
        let cause = regex::Regex::new("(").unwrap_err();
        let err = anyhow::Error::new(cause).context("invalid --name pattern \"(\"");

        let message = one_line(&err);
        assert!(!message.contains('\n'));
        assert!(message.starts_with("invalid --name pattern \"(\": regex parse error:"));
        assert!(message.contains("unclosed group"));
    }
}
