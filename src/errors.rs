// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the scanning pipeline
//!
//! Every error a pipeline run can produce ends up in exactly one place: the
//! listener's `on_error` callback. None of the run errors are retried; the
//! caller restarts the pipeline (usually by changing its configuration).

use std::fmt;
use std::io;

/// Result type alias using ScanError
pub type ScanResult<T> = Result<T, ScanError>;

/// Main error type for the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Device enumeration found no video input and no explicit constraints were given
    NoCapableDeviceFound,
    /// The media runtime refused or failed to hand out a stream
    MediaAcquisition(AcquisitionError),
    /// The decode worker could not be constructed or went away
    WorkerUnavailable(String),
    /// Configuration file errors
    Config(String),
    /// Filesystem errors outside the capture path (still images, settings)
    Io(String),
}

/// Reasons a stream could not be acquired
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    /// Access to the device was denied
    PermissionDenied(String),
    /// Device is opened exclusively by someone else
    DeviceInUse(String),
    /// Device exists but cannot satisfy the requested constraints
    ConstraintMismatch(String),
    /// The requested device does not exist (anymore)
    DeviceNotFound(String),
    /// Any other backend failure
    Backend(String),
}

impl ScanError {
    /// Whether this error ends the current pipeline run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanError::NoCapableDeviceFound
                | ScanError::MediaAcquisition(_)
                | ScanError::WorkerUnavailable(_)
        )
    }
}

impl AcquisitionError {
    /// Classify an I/O error raised while opening or configuring a device
    pub fn from_io(context: &str, err: &io::Error) -> Self {
        let msg = format!("{}: {}", context, err);
        match err.kind() {
            io::ErrorKind::PermissionDenied => AcquisitionError::PermissionDenied(msg),
            io::ErrorKind::ResourceBusy => AcquisitionError::DeviceInUse(msg),
            io::ErrorKind::NotFound => AcquisitionError::DeviceNotFound(msg),
            io::ErrorKind::InvalidInput => AcquisitionError::ConstraintMismatch(msg),
            _ => AcquisitionError::Backend(msg),
        }
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::NoCapableDeviceFound => write!(f, "No capable video input device found"),
            ScanError::MediaAcquisition(e) => write!(f, "Media acquisition error: {}", e),
            ScanError::WorkerUnavailable(msg) => write!(f, "Decode worker unavailable: {}", msg),
            ScanError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ScanError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcquisitionError::PermissionDenied(msg) => write!(f, "Permission denied: {}", msg),
            AcquisitionError::DeviceInUse(msg) => write!(f, "Device in use: {}", msg),
            AcquisitionError::ConstraintMismatch(msg) => {
                write!(f, "Constraints not satisfiable: {}", msg)
            }
            AcquisitionError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            AcquisitionError::Backend(msg) => write!(f, "Backend error: {}", msg),
        }
    }
}

impl std::error::Error for ScanError {}
impl std::error::Error for AcquisitionError {}

impl From<AcquisitionError> for ScanError {
    fn from(err: AcquisitionError) -> Self {
        ScanError::MediaAcquisition(err)
    }
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        ScanError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_errors_are_classified() {
        let busy = io::Error::from(io::ErrorKind::ResourceBusy);
        assert!(matches!(
            AcquisitionError::from_io("/dev/video0", &busy),
            AcquisitionError::DeviceInUse(_)
        ));

        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(
            AcquisitionError::from_io("/dev/video0", &denied),
            AcquisitionError::PermissionDenied(_)
        ));

        let other = io::Error::other("boom");
        assert!(matches!(
            AcquisitionError::from_io("/dev/video0", &other),
            AcquisitionError::Backend(_)
        ));
    }

    #[test]
    fn test_terminal_errors() {
        assert!(ScanError::NoCapableDeviceFound.is_terminal());
        assert!(ScanError::WorkerUnavailable("gone".into()).is_terminal());
        assert!(!ScanError::Config("bad".into()).is_terminal());
    }
}
