//! Best-effort notifications for every resolved path
use std::sync::mpsc::{SyncSender, TrySendError};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("notification queue is full")]
    Full,
    #[error("notification receiver is gone")]
    Disconnected,
}

/// Receives each non-empty path the scan resolves.
///
/// Implementations must not block. Errors are logged and dropped by the
/// caller; they never change scan results.
pub trait PathSink {
    fn notify(&self, path: &str) -> Result<(), SinkError>;
}

/// Emits a debug log record per path
pub struct LogSink;

impl PathSink for LogSink {
    fn notify(&self, path: &str) -> Result<(), SinkError> {
        log::debug!(target: "lockscan::report", "resolved {}", path);
        Ok(())
    }
}

/// Discards everything
pub struct NullSink;

impl PathSink for NullSink {
    fn notify(&self, _path: &str) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Forwards paths over a bounded channel, dropping them when it is full
pub struct ChannelSink {
    sender: SyncSender<String>,
}

impl ChannelSink {
    pub fn new(sender: SyncSender<String>) -> Self {
        ChannelSink { sender }
    }
}

impl PathSink for ChannelSink {
    fn notify(&self, path: &str) -> Result<(), SinkError> {
        self.sender
            .try_send(path.to_string())
            .map_err(|e| match e {
                TrySendError::Full(_) => SinkError::Full,
                TrySendError::Disconnected(_) => SinkError::Disconnected,
            })
    }
}
