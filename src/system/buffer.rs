//! Query-with-growing-buffer protocol shared by the system handle and
//! object name queries.
//!
//! The query is first issued with an empty buffer to learn the required
//! size, then re-issued with that size plus slack. If the data grew in
//! between (the handle table is live), the buffer is grown and the query
//! retried, up to a fixed number of attempts.
use crate::error::{QueryStage, ScanError};

/// NTSTATUS values the protocol cares about
pub mod ntstatus {
    pub const STATUS_SUCCESS: u32 = 0x0000_0000;
    pub const STATUS_BUFFER_OVERFLOW: u32 = 0x8000_0005;
    pub const STATUS_INFO_LENGTH_MISMATCH: u32 = 0xC000_0004;
    pub const STATUS_INVALID_HANDLE: u32 = 0xC000_0008;
    pub const STATUS_NOT_IMPLEMENTED: u32 = 0xC000_0002;
    pub const STATUS_INVALID_INFO_CLASS: u32 = 0xC000_0003;
    pub const STATUS_ACCESS_DENIED: u32 = 0xC000_0022;
    pub const STATUS_BUFFER_TOO_SMALL: u32 = 0xC000_0023;
}

/// What a single call of the underlying query reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// Data fits; `written` bytes are valid
    Complete { written: usize },
    /// Buffer too small; `required` is the size hint, 0 when none was given
    TooSmall { required: usize },
    /// Any other status
    Failed(u32),
}

impl QueryStatus {
    /// Map a raw NTSTATUS and return length to a protocol outcome
    pub fn from_ntstatus(status: u32, return_length: u32, buffer_len: usize) -> Self {
        use ntstatus::*;
        match status {
            STATUS_SUCCESS => {
                // Some classes leave the return length at zero on success
                let written = if return_length == 0 {
                    buffer_len
                } else {
                    return_length as usize
                };
                QueryStatus::Complete { written }
            }
            STATUS_INFO_LENGTH_MISMATCH | STATUS_BUFFER_OVERFLOW | STATUS_BUFFER_TOO_SMALL => {
                QueryStatus::TooSmall {
                    required: return_length as usize,
                }
            }
            other => QueryStatus::Failed(other),
        }
    }
}

/// Sizing limits for one growing-buffer query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrowPolicy {
    /// Size used when the empty probe returns no size hint
    pub initial_len: usize,
    /// Added on top of every size hint to absorb growth between calls
    pub slack: usize,
    /// Sized attempts after the empty probe
    pub max_attempts: u32,
    /// Hard ceiling on a single allocation
    pub max_len: usize,
}

impl GrowPolicy {
    /// Policy for the system-wide handle table
    pub fn system_handles() -> Self {
        GrowPolicy {
            initial_len: 1024 * 1024,
            slack: 64 * 1024,
            max_attempts: 8,
            max_len: 512 * 1024 * 1024,
        }
    }

    /// Policy for a single object's name
    pub fn object_name() -> Self {
        GrowPolicy {
            initial_len: 1024,
            slack: 256,
            max_attempts: 4,
            max_len: 64 * 1024,
        }
    }
}

/// Zeroed, 8-byte aligned scratch buffer handed to the OS.
///
/// Backed by u64 words so the start address satisfies the alignment the
/// kernel expects for the structures it writes. Contents are only ever
/// read back as bytes.
#[derive(Debug)]
pub struct QueryBuffer {
    words: Vec<u64>,
    len: usize,
}

impl QueryBuffer {
    pub fn with_len(len: usize) -> Self {
        QueryBuffer {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[allow(unsafe_code)]
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: the word vector owns at least `len` initialized bytes, and
        // u8 has no alignment requirement.
        unsafe { std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    #[allow(unsafe_code)]
    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: as above; the exclusive borrow of self covers the words.
        unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

/// Result of a completed query
#[derive(Debug)]
pub struct QueryOutput {
    buffer: QueryBuffer,
    written: usize,
}

impl QueryOutput {
    /// The bytes the OS reported as written
    pub fn bytes(&self) -> &[u8] {
        &self.buffer.as_bytes()[..self.written]
    }

    /// Address of the first byte, for resolving pointers the OS wrote into the buffer
    pub fn base_address(&self) -> u64 {
        self.buffer.as_bytes().as_ptr() as u64
    }

    /// Size of the buffer the final call used
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

/// Run `query` under the growing-buffer protocol.
///
/// `query` receives the buffer to fill (empty on the first, probing call)
/// and reports what happened.
pub fn query_with_growing_buffer<F>(
    stage: QueryStage,
    policy: &GrowPolicy,
    mut query: F,
) -> Result<QueryOutput, ScanError>
where
    F: FnMut(&mut [u8]) -> QueryStatus,
{
    let mut probe = QueryBuffer::with_len(0);
    let mut len = match query(probe.as_mut_bytes()) {
        QueryStatus::Complete { .. } => {
            return Ok(QueryOutput {
                buffer: probe,
                written: 0,
            })
        }
        QueryStatus::TooSmall { required: 0 } => policy.initial_len,
        QueryStatus::TooSmall { required } => required.saturating_add(policy.slack),
        QueryStatus::Failed(status) => return Err(ScanError::QueryFailed { stage, status }),
    };

    for attempt in 1..=policy.max_attempts {
        if len > policy.max_len {
            return Err(ScanError::ResourceExhausted {
                stage,
                attempts: attempt - 1,
            });
        }

        let mut buffer = QueryBuffer::with_len(len);
        match query(buffer.as_mut_bytes()) {
            QueryStatus::Complete { written } => {
                if written > buffer.len() {
                    return Err(ScanError::Malformed {
                        stage,
                        detail: format!(
                            "reported {} bytes written into a {} byte buffer",
                            written,
                            buffer.len()
                        ),
                    });
                }
                return Ok(QueryOutput { buffer, written });
            }
            QueryStatus::TooSmall { required } => {
                log::trace!(
                    "{} query needs {} bytes, had {} (attempt {})",
                    stage,
                    required,
                    len,
                    attempt
                );
                let next = if required > len {
                    required
                } else {
                    len.saturating_mul(2)
                };
                len = next.saturating_add(policy.slack);
            }
            QueryStatus::Failed(status) => return Err(ScanError::QueryFailed { stage, status }),
        }
    }

    Err(ScanError::ResourceExhausted {
        stage,
        attempts: policy.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntstatus::*;

    fn small_policy() -> GrowPolicy {
        GrowPolicy {
            initial_len: 16,
            slack: 4,
            max_attempts: 3,
            max_len: 1024,
        }
    }

    #[test]
    fn test_sizing_call_then_fill() {
        let mut calls = Vec::new();
        let out = query_with_growing_buffer(QueryStage::SystemHandles, &small_policy(), |buf| {
            calls.push(buf.len());
            if buf.len() < 10 {
                QueryStatus::TooSmall { required: 10 }
            } else {
                buf[..10].copy_from_slice(b"0123456789");
                QueryStatus::Complete { written: 10 }
            }
        })
        .unwrap();

        assert_eq!(calls, vec![0, 14]);
        assert_eq!(out.bytes(), b"0123456789");
        assert_eq!(out.capacity(), 14);
    }

    #[test]
    fn test_retries_when_table_grows_between_calls() {
        let mut required = 10;
        let mut grew = false;
        let mut calls = 0;
        let out = query_with_growing_buffer(QueryStage::SystemHandles, &small_policy(), |buf| {
            calls += 1;
            if buf.len() < required {
                let hint = required;
                // handles opened between the probe and the fill
                if !grew {
                    required += 20;
                    grew = true;
                }
                QueryStatus::TooSmall { required: hint }
            } else {
                QueryStatus::Complete { written: required }
            }
        })
        .unwrap();

        assert_eq!(calls, 3);
        assert_eq!(out.bytes().len(), 30);
    }

    #[test]
    fn test_no_size_hint_uses_initial_len_then_doubles() {
        let mut calls = Vec::new();
        query_with_growing_buffer(QueryStage::SystemHandles, &small_policy(), |buf| {
            calls.push(buf.len());
            if buf.len() < 40 {
                QueryStatus::TooSmall { required: 0 }
            } else {
                QueryStatus::Complete { written: 1 }
            }
        })
        .unwrap();

        assert_eq!(calls, vec![0, 16, 36, 76]);
    }

    #[test]
    fn test_exhausts_after_max_attempts() {
        let err = query_with_growing_buffer(QueryStage::SystemHandles, &small_policy(), |buf| {
            QueryStatus::TooSmall {
                required: buf.len() + 1,
            }
        })
        .unwrap_err();

        match err {
            ScanError::ResourceExhausted { stage, attempts } => {
                assert_eq!(stage, QueryStage::SystemHandles);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_exhausts_at_size_ceiling() {
        let err = query_with_growing_buffer(QueryStage::ObjectName, &small_policy(), |_| {
            QueryStatus::TooSmall { required: 4096 }
        })
        .unwrap_err();

        assert!(matches!(
            err,
            ScanError::ResourceExhausted {
                stage: QueryStage::ObjectName,
                attempts: 0
            }
        ));
    }

    #[test]
    fn test_other_status_fails() {
        let err = query_with_growing_buffer(QueryStage::SystemHandles, &small_policy(), |_| {
            QueryStatus::Failed(STATUS_ACCESS_DENIED)
        })
        .unwrap_err();

        assert!(matches!(
            err,
            ScanError::QueryFailed {
                stage: QueryStage::SystemHandles,
                status: STATUS_ACCESS_DENIED
            }
        ));
    }

    #[test]
    fn test_overreported_length_is_malformed() {
        let err = query_with_growing_buffer(QueryStage::ObjectName, &small_policy(), |buf| {
            if buf.is_empty() {
                QueryStatus::TooSmall { required: 8 }
            } else {
                QueryStatus::Complete { written: 500 }
            }
        })
        .unwrap_err();

        assert!(matches!(err, ScanError::Malformed { .. }));
    }

    #[test]
    fn test_empty_success_on_sizing_call() {
        let out = query_with_growing_buffer(QueryStage::ObjectName, &small_policy(), |_| {
            QueryStatus::Complete { written: 0 }
        })
        .unwrap();
        assert!(out.bytes().is_empty());
    }

    #[test]
    fn test_ntstatus_mapping() {
        assert_eq!(
            QueryStatus::from_ntstatus(STATUS_SUCCESS, 24, 64),
            QueryStatus::Complete { written: 24 }
        );
        assert_eq!(
            QueryStatus::from_ntstatus(STATUS_SUCCESS, 0, 64),
            QueryStatus::Complete { written: 64 }
        );
        assert_eq!(
            QueryStatus::from_ntstatus(STATUS_INFO_LENGTH_MISMATCH, 4096, 0),
            QueryStatus::TooSmall { required: 4096 }
        );
        assert_eq!(
            QueryStatus::from_ntstatus(STATUS_BUFFER_OVERFLOW, 0, 16),
            QueryStatus::TooSmall { required: 0 }
        );
        assert_eq!(
            QueryStatus::from_ntstatus(STATUS_INVALID_HANDLE, 0, 16),
            QueryStatus::Failed(STATUS_INVALID_HANDLE)
        );
    }

    #[test]
    fn test_query_buffer_alignment() {
        let buf = QueryBuffer::with_len(13);
        assert_eq!(buf.len(), 13);
        assert_eq!(buf.as_bytes().as_ptr() as usize % 8, 0);
        assert!(buf.as_bytes().iter().all(|&b| b == 0));
    }
}
