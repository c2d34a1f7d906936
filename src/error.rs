//! Error types for GazeMemory

use crate::version::ServiceVersion;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for GazeMemory operations
pub type Result<T, E = TransportError> = std::result::Result<T, E>;

/// Status codes reported by session initialization.
///
/// The discriminants are part of the C ABI and match the order the tracking
/// service SDK has always used.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitializationStatus {
    Success = 0,
    FailedToAccessSharedResources = 1,
    FailedToMapSharedResources = 2,
    FailedToInitializeChannel = 3,
    AllChannelsBusy = 4,
    InternalError = 5,
    ServiceVersionTooLow = 6,
    ServiceVersionTooHigh = 7,
    Cancelled = 8,
    Timeout = 9,
    Failure = 10,
}

/// Errors that can occur while establishing or tearing down a session
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The shared region (or the service behind it) could not be reached
    #[error("Failed to access shared region '{name}': {source}")]
    ResourceAccess {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The shared region exists but could not be mapped
    #[error("Failed to map shared region '{name}': {source}")]
    Mapping {
        name: String,
        #[source]
        source: io::Error,
    },

    /// The rendezvous channel could not be opened or broke during handshake
    #[error("Failed to initialize channel at {}: {source}", path.display())]
    ChannelInit {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Every session endpoint of the service is taken
    #[error("All service channels at {} are busy", path.display())]
    AllChannelsBusy { path: PathBuf },

    #[error("Service version {found} is lower than the lowest supported version {lowest}")]
    VersionTooLow {
        found: ServiceVersion,
        lowest: ServiceVersion,
    },

    #[error("Service version {found} is higher than the highest supported version {highest}")]
    VersionTooHigh {
        found: ServiceVersion,
        highest: ServiceVersion,
    },

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Protocol or layout violation
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    #[error("{reason}")]
    Failure { reason: String },
}

impl TransportError {
    /// Status code reported for this error across the C surface.
    pub fn status(&self) -> InitializationStatus {
        match self {
            TransportError::ResourceAccess { .. } => {
                InitializationStatus::FailedToAccessSharedResources
            }
            TransportError::Mapping { .. } => InitializationStatus::FailedToMapSharedResources,
            TransportError::ChannelInit { .. } => InitializationStatus::FailedToInitializeChannel,
            TransportError::AllChannelsBusy { .. } => InitializationStatus::AllChannelsBusy,
            TransportError::VersionTooLow { .. } => InitializationStatus::ServiceVersionTooLow,
            TransportError::VersionTooHigh { .. } => InitializationStatus::ServiceVersionTooHigh,
            TransportError::Cancelled => InitializationStatus::Cancelled,
            TransportError::Timeout { .. } => InitializationStatus::Timeout,
            TransportError::Internal { .. } => InitializationStatus::InternalError,
            TransportError::InvalidNamespace { .. } | TransportError::Failure { .. } => {
                InitializationStatus::Failure
            }
        }
    }

    /// Returns whether a later attempt to create a session may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::ResourceAccess { .. } => true,
            TransportError::ChannelInit { .. } => true,
            TransportError::AllChannelsBusy { .. } => true,
            TransportError::Timeout { .. } => true,
            TransportError::Cancelled => true,
            TransportError::Mapping { .. } => false,
            TransportError::VersionTooLow { .. } => false,
            TransportError::VersionTooHigh { .. } => false,
            TransportError::Internal { .. } => false,
            TransportError::InvalidNamespace { .. } => false,
            TransportError::Failure { .. } => false,
        }
    }

    pub(crate) fn internal(reason: impl Into<String>) -> Self {
        TransportError::Internal {
            reason: reason.into(),
        }
    }

    pub(crate) fn failure(reason: impl Into<String>) -> Self {
        TransportError::Failure {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{HIGHEST_SUPPORTED_SERVICE_VERSION, LOWEST_SUPPORTED_SERVICE_VERSION};

    #[test]
    fn status_codes_follow_abi_order() {
        assert_eq!(InitializationStatus::Success as u32, 0);
        assert_eq!(InitializationStatus::AllChannelsBusy as u32, 4);
        assert_eq!(InitializationStatus::Timeout as u32, 9);
        assert_eq!(InitializationStatus::Failure as u32, 10);
    }

    #[test]
    fn errors_map_to_status() {
        let io_err = || io::Error::new(io::ErrorKind::NotFound, "missing");

        let cases = [
            (
                TransportError::ResourceAccess { name: "r".into(), source: io_err() },
                InitializationStatus::FailedToAccessSharedResources,
            ),
            (
                TransportError::Mapping { name: "r".into(), source: io_err() },
                InitializationStatus::FailedToMapSharedResources,
            ),
            (
                TransportError::ChannelInit { path: "/tmp/x".into(), source: io_err() },
                InitializationStatus::FailedToInitializeChannel,
            ),
            (
                TransportError::AllChannelsBusy { path: "/tmp/x".into() },
                InitializationStatus::AllChannelsBusy,
            ),
            (
                TransportError::VersionTooLow {
                    found: ServiceVersion::new(0, 1, 0),
                    lowest: LOWEST_SUPPORTED_SERVICE_VERSION,
                },
                InitializationStatus::ServiceVersionTooLow,
            ),
            (
                TransportError::VersionTooHigh {
                    found: ServiceVersion::new(9, 0, 0),
                    highest: HIGHEST_SUPPORTED_SERVICE_VERSION,
                },
                InitializationStatus::ServiceVersionTooHigh,
            ),
            (TransportError::Cancelled, InitializationStatus::Cancelled),
            (
                TransportError::Timeout { duration: Duration::from_millis(5) },
                InitializationStatus::Timeout,
            ),
            (TransportError::internal("bad magic"), InitializationStatus::InternalError),
            (TransportError::failure("boom"), InitializationStatus::Failure),
        ];

        for (error, status) in cases {
            assert_eq!(error.status(), status, "{error}");
        }
    }

    #[test]
    fn version_errors_name_both_versions() {
        let error = TransportError::VersionTooHigh {
            found: ServiceVersion::new(3, 1, 4),
            highest: ServiceVersion::new(2, 0, 0),
        };
        let msg = error.to_string();
        assert!(msg.contains("3.1.4"));
        assert!(msg.contains("2.0.0"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<TransportError>();
    }
}
