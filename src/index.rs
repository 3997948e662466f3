//! Correlates the handle table with the process list into locked-file results
use crate::config::ScanOptions;
use crate::error::ScanError;
use crate::notify::{LogSink, PathSink};
use crate::system::{LockSource, ProcessTable, Resolution};
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One output row: a process holding a file open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockedFileEntry {
    pub pid: u32,
    pub process_name: String,
    pub file_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockedFile {
    pub process_name: String,
    pub file_path: String,
}

/// Scan result: every file each process holds, in handle table order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedFiles {
    by_pid: BTreeMap<u32, Vec<LockedFile>>,
}

impl LockedFiles {
    pub fn new() -> Self {
        LockedFiles {
            by_pid: BTreeMap::new(),
        }
    }

    /// Record a file for a process. Returns false if that exact pair was
    /// already recorded (a second handle to the same file).
    pub fn insert(&mut self, pid: u32, process_name: &str, file_path: String) -> bool {
        let files = self.by_pid.entry(pid).or_default();
        if files
            .iter()
            .any(|f| f.file_path == file_path && f.process_name == process_name)
        {
            return false;
        }
        files.push(LockedFile {
            process_name: process_name.to_string(),
            file_path,
        });
        true
    }

    pub fn get(&self, pid: u32) -> Option<&[LockedFile]> {
        self.by_pid.get(&pid).map(Vec::as_slice)
    }

    pub fn pids(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_pid.keys().copied()
    }

    /// Number of processes with at least one locked file
    pub fn process_count(&self) -> usize {
        self.by_pid.len()
    }

    /// Total number of entries across all processes
    pub fn len(&self) -> usize {
        self.by_pid.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    /// Flatten into rows, ordered by PID
    pub fn entries(&self) -> impl Iterator<Item = LockedFileEntry> + '_ {
        self.by_pid.iter().flat_map(|(&pid, files)| {
            files.iter().map(move |f| LockedFileEntry {
                pid,
                process_name: f.process_name.clone(),
                file_path: f.file_path.clone(),
            })
        })
    }

    pub fn to_entries(&self) -> Vec<LockedFileEntry> {
        self.entries().collect()
    }

    /// Keep only one process
    pub fn for_pid(&self, pid: u32) -> LockedFiles {
        let mut out = LockedFiles::new();
        if let Some(files) = self.by_pid.get(&pid) {
            out.by_pid.insert(pid, files.clone());
        }
        out
    }

    /// Keep entries whose path contains `query`, ignoring case
    pub fn filter_path(&self, query: &str) -> LockedFiles {
        let needle = query.to_lowercase();
        let mut out = LockedFiles::new();
        for (&pid, files) in &self.by_pid {
            let kept: Vec<LockedFile> = files
                .iter()
                .filter(|f| f.file_path.to_lowercase().contains(&needle))
                .cloned()
                .collect();
            if !kept.is_empty() {
                out.by_pid.insert(pid, kept);
            }
        }
        out
    }
}

/// Cooperative cancellation flag, checked between handle records
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counters for one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Processes in the active set
    pub processes: usize,
    /// Records in the handle table snapshot
    pub records: usize,
    /// Records owned by an active process and handed to the resolver
    pub considered: usize,
    pub matched: usize,
    /// Skipped because the owner or the handle refused duplication
    pub denied: usize,
    /// Handle or owner disappeared after the snapshot
    pub vanished: usize,
    /// Not a disk file, or no name
    pub unnamed: usize,
    pub timed_out: usize,
    /// Name query failed for this handle only
    pub failed: usize,
}

/// Runs locked-file queries against a `LockSource`
pub struct LockedFileIndex<S: LockSource> {
    source: S,
    options: ScanOptions,
    sink: Box<dyn PathSink>,
    cancel: CancelToken,
    progress: ProgressBar,
    summary: ScanSummary,
}

impl<S: LockSource> LockedFileIndex<S> {
    pub fn new(source: S, options: ScanOptions) -> Self {
        LockedFileIndex {
            source,
            options,
            sink: Box::new(LogSink),
            cancel: CancelToken::new(),
            progress: ProgressBar::hidden(),
            summary: ScanSummary::default(),
        }
    }

    /// Replace the notification sink
    pub fn with_sink(mut self, sink: impl PathSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Show progress over handle records on this bar
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Counters from the most recent scan
    pub fn summary(&self) -> ScanSummary {
        self.summary
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Every file held open by every process
    pub fn find_all(&mut self) -> Result<LockedFiles, ScanError> {
        let started = Instant::now();
        let active = self.active_processes()?;
        self.scan(&active, started)
    }

    /// Files held by one process; an unknown PID gives an empty result
    pub fn find_by_pid(&mut self, pid: u32) -> Result<LockedFiles, ScanError> {
        let started = Instant::now();
        let mut active = self.active_processes()?;
        active.retain(|&p, _| p == pid);

        if active.is_empty() {
            log::debug!("process {} is not running, nothing to scan", pid);
            self.summary = ScanSummary::default();
            return Ok(LockedFiles::new());
        }

        self.scan(&active, started)
    }

    /// Files whose path contains `query`, ignoring case
    pub fn find_by_path_substring(&mut self, query: &str) -> Result<LockedFiles, ScanError> {
        let all = self.find_all()?;
        Ok(all.filter_path(query))
    }

    fn active_processes(&mut self) -> Result<ProcessTable, ScanError> {
        let mut processes = self.source.list_processes()?;
        let total = processes.len();
        processes.retain(|_, name| self.options.accepts_process(name));
        log::debug!(
            "{} running processes, {} selected",
            total,
            processes.len()
        );
        Ok(processes)
    }

    fn check_cancelled(&self, started: Instant) -> Result<(), ScanError> {
        if self.cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        if let Some(deadline) = self.options.deadline {
            if started.elapsed() >= deadline {
                log::warn!("scan deadline of {:?} reached", deadline);
                return Err(ScanError::Cancelled);
            }
        }
        Ok(())
    }

    fn scan(&mut self, active: &ProcessTable, started: Instant) -> Result<LockedFiles, ScanError> {
        self.check_cancelled(started)?;
        let snapshot = self.source.list_system_handles()?;

        let mut summary = ScanSummary {
            processes: active.len(),
            records: snapshot.records.len(),
            ..ScanSummary::default()
        };
        let mut denied_pids: HashSet<u32> = HashSet::new();
        let mut found = LockedFiles::new();

        self.progress.set_length(snapshot.records.len() as u64);
        self.progress.set_position(0);

        for record in &snapshot.records {
            if let Err(e) = self.check_cancelled(started) {
                self.progress.abandon();
                self.summary = summary;
                return Err(e);
            }
            self.progress.inc(1);

            // Process may have exited between the two snapshots
            let Some(process_name) = active.get(&record.owner_pid) else {
                continue;
            };
            if denied_pids.contains(&record.owner_pid) {
                summary.denied += 1;
                continue;
            }
            summary.considered += 1;

            match self.source.resolve_handle(record, snapshot.file_type) {
                Ok(Resolution::Path(path)) if !path.is_empty() => {
                    if let Err(e) = self.sink.notify(&path) {
                        log::trace!("dropped notification for {}: {}", path, e);
                    }
                    if found.insert(record.owner_pid, process_name, path) {
                        summary.matched += 1;
                    }
                }
                Ok(Resolution::Path(_)) | Ok(Resolution::Unnamed) => summary.unnamed += 1,
                Ok(Resolution::TimedOut) => summary.timed_out += 1,
                Err(ScanError::AccessDenied { pid }) => {
                    log::trace!("cannot duplicate handles of process {}, skipping it", pid);
                    denied_pids.insert(record.owner_pid);
                    summary.denied += 1;
                }
                Err(ScanError::HandleDenied { pid, handle }) => {
                    log::trace!("handle 0x{:x} of process {} refused duplication", handle, pid);
                    summary.denied += 1;
                }
                Err(ScanError::NotFound { pid, handle }) => {
                    log::trace!("handle 0x{:x} of process {} is gone", handle, pid);
                    summary.vanished += 1;
                }
                Err(e) if e.is_per_handle() => {
                    log::trace!(
                        "skipping handle 0x{:x} of process {}: {}",
                        record.handle_value,
                        record.owner_pid,
                        e
                    );
                    summary.failed += 1;
                }
                Err(e) => {
                    self.progress.abandon();
                    self.summary = summary;
                    return Err(e);
                }
            }
        }

        self.progress.finish_and_clear();
        log::debug!(
            "scan of {} handles took {:?}: {} matched, {} denied, {} vanished, {} unnamed, {} timed out, {} failed",
            summary.records,
            started.elapsed(),
            summary.matched,
            summary.denied,
            summary.vanished,
            summary.unnamed,
            summary.timed_out,
            summary.failed
        );
        self.summary = summary;
        Ok(found)
    }
}
