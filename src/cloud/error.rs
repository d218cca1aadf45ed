//! Error type for the cloud storage environment.
//!
//! One enum covers both layers: the classification an object-store or stream
//! adapter must produce (`NotFound`, `NoSuchBucket`, `Throttled`, ...) and the
//! kinds the environment surfaces to the engine (`NotSupported`, `Busy`,
//! `TimedOut`, `InvalidArgument`). Adapters map SDK errors into this enum;
//! the retry layer asks `is_retryable` to separate transient faults from
//! definite ones.

use std::io::{Error as IoError, ErrorKind};

/// Error type for cloud environment operations
#[derive(Debug)]
pub enum CloudError {
    /// Object or file not found
    NotFound(String),
    /// The named bucket does not exist
    NoSuchBucket(String),
    /// Object or bucket already exists (create-if-absent collisions)
    AlreadyExists(String),
    /// Permission denied by the cloud service
    AccessDenied(String),
    /// The cloud service asked us to slow down
    Throttled(String),
    /// Transient fault (network, 5xx-class); safe to retry
    Transient(String),
    /// Operation exceeded its deadline
    TimedOut(String),
    /// Resource busy (e.g. a second tailer on one env)
    Busy(String),
    /// Operation is not supported on this file class
    NotSupported(String),
    /// Configuration or argument validation failure
    InvalidArgument(String),
    /// Local I/O error
    Io(IoError),
    /// Anything else
    Other(String),
}

impl std::fmt::Display for CloudError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloudError::NotFound(msg) => write!(f, "not found: {}", msg),
            CloudError::NoSuchBucket(msg) => write!(f, "no such bucket: {}", msg),
            CloudError::AlreadyExists(msg) => write!(f, "already exists: {}", msg),
            CloudError::AccessDenied(msg) => write!(f, "access denied: {}", msg),
            CloudError::Throttled(msg) => write!(f, "throttled: {}", msg),
            CloudError::Transient(msg) => write!(f, "transient fault: {}", msg),
            CloudError::TimedOut(msg) => write!(f, "timed out: {}", msg),
            CloudError::Busy(msg) => write!(f, "busy: {}", msg),
            CloudError::NotSupported(msg) => write!(f, "not supported: {}", msg),
            CloudError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            CloudError::Io(e) => write!(f, "I/O error: {}", e),
            CloudError::Other(msg) => write!(f, "cloud error: {}", msg),
        }
    }
}

impl std::error::Error for CloudError {}

// io::Error is not Clone; rebuild it from kind and message so error-state
// file handles can hand the open failure to every subsequent read.
impl Clone for CloudError {
    fn clone(&self) -> Self {
        match self {
            CloudError::NotFound(m) => CloudError::NotFound(m.clone()),
            CloudError::NoSuchBucket(m) => CloudError::NoSuchBucket(m.clone()),
            CloudError::AlreadyExists(m) => CloudError::AlreadyExists(m.clone()),
            CloudError::AccessDenied(m) => CloudError::AccessDenied(m.clone()),
            CloudError::Throttled(m) => CloudError::Throttled(m.clone()),
            CloudError::Transient(m) => CloudError::Transient(m.clone()),
            CloudError::TimedOut(m) => CloudError::TimedOut(m.clone()),
            CloudError::Busy(m) => CloudError::Busy(m.clone()),
            CloudError::NotSupported(m) => CloudError::NotSupported(m.clone()),
            CloudError::InvalidArgument(m) => CloudError::InvalidArgument(m.clone()),
            CloudError::Io(e) => CloudError::Io(IoError::new(e.kind(), e.to_string())),
            CloudError::Other(m) => CloudError::Other(m.clone()),
        }
    }
}

impl From<IoError> for CloudError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => CloudError::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => CloudError::AccessDenied(e.to_string()),
            ErrorKind::AlreadyExists => CloudError::AlreadyExists(e.to_string()),
            ErrorKind::TimedOut => CloudError::TimedOut(e.to_string()),
            _ => CloudError::Io(e),
        }
    }
}

impl CloudError {
    /// Whether retrying the same call can plausibly succeed.
    /// Definite faults (not-found, access-denied, validation) never retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CloudError::Throttled(_) | CloudError::Transient(_) | CloudError::TimedOut(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_) | CloudError::NoSuchBucket(_))
    }
}

/// Result alias used throughout the cloud module
pub type CloudResult<T> = Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CloudError::Throttled("slow down".into()).is_retryable());
        assert!(CloudError::Transient("connection reset".into()).is_retryable());
        assert!(CloudError::TimedOut("600s".into()).is_retryable());

        assert!(!CloudError::NotFound("k".into()).is_retryable());
        assert!(!CloudError::AccessDenied("k".into()).is_retryable());
        assert!(!CloudError::InvalidArgument("bad".into()).is_retryable());
    }

    #[test]
    fn test_from_io_error() {
        let e = IoError::new(ErrorKind::NotFound, "missing");
        assert!(matches!(CloudError::from(e), CloudError::NotFound(_)));

        let e = IoError::new(ErrorKind::AlreadyExists, "dup");
        assert!(matches!(CloudError::from(e), CloudError::AlreadyExists(_)));

        let e = IoError::new(ErrorKind::BrokenPipe, "pipe");
        assert!(matches!(CloudError::from(e), CloudError::Io(_)));
    }

    #[test]
    fn test_not_found_helper() {
        assert!(CloudError::NotFound("x".into()).is_not_found());
        assert!(CloudError::NoSuchBucket("b".into()).is_not_found());
        assert!(!CloudError::Other("x".into()).is_not_found());
    }
}
