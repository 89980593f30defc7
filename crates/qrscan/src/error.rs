//! Error taxonomy surfaced to the caller of a scanning session.

use std::backtrace::Backtrace;

/// Errors a `start` request (or a session) can end with.
///
/// Validation problems are returned synchronously from `start`; hardware
/// problems arrive through the pending start result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanError {
    #[error("camera permission was not granted")]
    NoPermission,

    #[error("no camera matches the requested facing")]
    NoMatchingCamera,

    #[error("device has no back-facing camera")]
    NoBackCamera,

    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    #[error("start cannot be called when already running")]
    AlreadyRunning,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("session was stopped before the camera finished opening")]
    Cancelled,

    #[error("unexpected camera fault: {message}")]
    Unknown { message: String, trace: Vec<String> },
}

impl ScanError {
    /// Wrap an unexpected fault, capturing where it was observed.
    pub fn unknown(message: impl Into<String>) -> Self {
        let trace = Backtrace::force_capture()
            .to_string()
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        ScanError::Unknown {
            message: message.into(),
            trace,
        }
    }

    /// Error code used at the caller boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ScanError::AlreadyRunning => "ALREADY_RUNNING",
            ScanError::InvalidArgument(_) => "INVALID_ARGUMENT",
            ScanError::Unknown { .. } => "UNKNOWN_ERROR",
            _ => "QRREADER_ERROR",
        }
    }

    /// Reason token reported alongside [`ScanError::code`].
    pub fn reason(&self) -> &'static str {
        match self {
            ScanError::NoPermission => "noPermission",
            ScanError::NoMatchingCamera => "noMatchingCamera",
            ScanError::NoBackCamera => "noBackCamera",
            ScanError::CameraUnavailable(_) => "cameraUnavailable",
            ScanError::AlreadyRunning => "alreadyRunning",
            ScanError::InvalidArgument(_) => "invalidArgument",
            ScanError::Cancelled => "cancelled",
            ScanError::Unknown { .. } => "unknown",
        }
    }
}

/// Errors reported by a camera hardware layer.
#[derive(Debug, thiserror::Error)]
pub enum HalError {
    #[error("camera access failed: {0}")]
    Access(String),

    #[error("camera {0} is already in use")]
    InUse(String),

    #[error("camera disconnected")]
    Disconnected,

    #[error("camera device error {0}")]
    Device(i32),

    #[error("failed to configure outputs: {0}")]
    Configure(String),

    #[error("camera fault: {0}")]
    Fault(String),
}

impl From<HalError> for ScanError {
    fn from(err: HalError) -> Self {
        match err {
            HalError::Fault(message) => ScanError::unknown(message),
            other => ScanError::CameraUnavailable(other.to_string()),
        }
    }
}
