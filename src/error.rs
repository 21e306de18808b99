//! Error types for the tether engine.
//!
//! Native EDSDK calls report a 32-bit status. [`ErrorKind::from_status`] folds that
//! status into a closed set of kinds the rest of the engine reasons about:
//! retry decisions look at the kind, callers see `(kind, native_code, message)`.
//!
//! ## Error Hierarchy
//!
//! - **`SdkError`**: one failed native call. Carries the classified kind, the raw
//!   status, and the context the call was made in.
//! - **`EngineError`**: everything the public engine API can return. Native failures
//!   arrive as `EngineError::Sdk`; the remaining variants are produced by the engine
//!   itself (wrong session state, live view inactive, cancellation, timeouts).
//!
//! `EngineError::kind()` maps every variant onto the taxonomy where one applies, so a
//! GUI can render both native and engine-side failures the same way.

use edsdk_sys as sys;
use std::fmt;
use thiserror::Error;

/// Convenience alias for results of raw SDK calls.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Convenience alias for results using the engine error type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Closed classification of native status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No camera, or the driver is missing
    DeviceNotFound,
    /// Camera or SDK not ready; usually worth retrying
    DeviceBusy,
    /// Call needs an open session
    SessionNotOpen,
    /// USB, PTP or STI transport failure
    Communication,
    /// Model or SDK version lacks the feature
    NotSupported,
    /// Operation or transaction cancelled
    Cancelled,
    /// File, directory or stream failure
    FileIO,
    /// SDK allocation failure
    OutOfMemory,
    /// SDK or camera internal fault
    Internal,
    /// Any status without a dedicated kind. Holds the masked error id.
    Unknown(u32),
}

impl ErrorKind {
    /// Classify a native status. Total over the 32-bit space.
    ///
    /// Only the error id bits (`EDS_ERRORID_MASK`) take part in the mapping; the
    /// component and reserved bits are ignored. Zero is success and is never passed
    /// here by the engine; if it is, it classifies as `Unknown(0)`.
    pub fn from_status(status: u32) -> Self {
        let id = status & sys::EDS_ERRORID_MASK;
        match id {
            sys::EDS_ERR_DEVICE_NOT_FOUND | sys::EDS_ERR_DEVICE_NOT_INSTALLED => {
                ErrorKind::DeviceNotFound
            }

            sys::EDS_ERR_DEVICE_BUSY
            | sys::EDS_ERR_PTP_DEVICE_BUSY
            | sys::EDS_ERR_OBJECT_NOTREADY
            | sys::EDS_ERR_MEMORYSTATUS_NOTREADY => ErrorKind::DeviceBusy,

            sys::EDS_ERR_SESSION_NOT_OPEN => ErrorKind::SessionNotOpen,

            sys::EDS_ERR_COMM_PORT_IS_IN_USE..=sys::EDS_ERR_COMM_USB_BUS_ERR
            | sys::EDS_ERR_USB_DEVICE_LOCK_ERROR
            | sys::EDS_ERR_USB_DEVICE_UNLOCK_ERROR
            | sys::EDS_ERR_STI_UNKNOWN_ERROR..=sys::EDS_ERR_STI_DEVICE_RELEASE_ERROR
            | sys::EDS_ERR_WAIT_TIMEOUT_ERROR
            | sys::EDS_ERR_INCOMPLETE_TRANSFER => ErrorKind::Communication,

            sys::EDS_ERR_UNIMPLEMENTED
            | sys::EDS_ERR_NOT_SUPPORTED
            | sys::EDS_ERR_DEVICEPROP_NOT_SUPPORTED
            | sys::EDS_ERR_UNKNOWN_COMMAND
            | sys::EDS_ERR_NOT_CAMERA_SUPPORT_SDK_VERSION => ErrorKind::NotSupported,

            sys::EDS_ERR_OPERATION_CANCELLED | sys::EDS_ERR_TRANSACTION_CANCELLED => {
                ErrorKind::Cancelled
            }

            sys::EDS_ERR_FILE_IO_ERROR..=sys::EDS_ERR_FILE_NAMING_NA
            | sys::EDS_ERR_DIR_NOT_FOUND..=sys::EDS_ERR_DIR_NOT_EMPTY
            | sys::EDS_ERR_STREAM_IO_ERROR..=sys::EDS_ERR_STREAM_END_OF_STREAM => {
                ErrorKind::FileIO
            }

            sys::EDS_ERR_MEM_ALLOC_FAILED | sys::EDS_ERR_MEM_FREE_FAILED => {
                ErrorKind::OutOfMemory
            }

            sys::EDS_ERR_INTERNAL_ERROR
            | sys::EDS_ERR_UNEXPECTED_EXCEPTION
            | sys::EDS_ERR_DEVICE_INTERNAL_ERROR
            | sys::EDS_ERR_SELF_TEST_FAILED => ErrorKind::Internal,

            other => ErrorKind::Unknown(other),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::DeviceNotFound => f.write_str("device not found"),
            ErrorKind::DeviceBusy => f.write_str("device busy"),
            ErrorKind::SessionNotOpen => f.write_str("session not open"),
            ErrorKind::Communication => f.write_str("communication error"),
            ErrorKind::NotSupported => f.write_str("not supported"),
            ErrorKind::Cancelled => f.write_str("cancelled"),
            ErrorKind::FileIO => f.write_str("file i/o error"),
            ErrorKind::OutOfMemory => f.write_str("out of memory"),
            ErrorKind::Internal => f.write_str("internal error"),
            ErrorKind::Unknown(code) => write!(f, "unknown error 0x{code:04X}"),
        }
    }
}

/// How far a busy command got before the device refused it.
///
/// The SDK reports busy at two layers. `EDS_ERR_DEVICE_BUSY` is raised host-side
/// before the transaction is sent, so the command was never accepted. The PTP layer
/// answers `EDS_ERR_PTP_DEVICE_BUSY` after the transaction reached the camera, so a
/// relative command may already have been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyDisposition {
    /// Refused before reaching the camera; safe to resend
    NotAccepted,
    /// Refused by the camera itself; a relative command may have run
    MaybeExecuted,
}

/// A failed native call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{context}: {kind} (0x{code:08X})")]
pub struct SdkError {
    /// Classified status
    pub kind: ErrorKind,
    /// Raw status as returned by the SDK.
    pub code: u32,
    /// What the engine was doing, e.g. `"open session"`
    pub context: String,
}

impl SdkError {
    /// Classify `status` and attach `context`.
    pub fn from_status(status: u32, context: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::from_status(status),
            code: status,
            context: context.into(),
        }
    }

    /// Busy layer of this failure, or `None` if it is not a busy condition.
    pub fn busy_disposition(&self) -> Option<BusyDisposition> {
        if self.kind != ErrorKind::DeviceBusy {
            return None;
        }
        match self.code & sys::EDS_ERRORID_MASK {
            sys::EDS_ERR_PTP_DEVICE_BUSY => Some(BusyDisposition::MaybeExecuted),
            _ => Some(BusyDisposition::NotAccepted),
        }
    }
}

/// Turn a native status into a result.
pub fn check(status: u32, context: &str) -> SdkResult<()> {
    if status == sys::EDS_ERR_OK {
        Ok(())
    } else {
        Err(SdkError::from_status(status, context))
    }
}

/// Errors returned by the engine API.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    /// A native call failed.
    #[error("SDK error: {0}")]
    Sdk(#[from] SdkError),

    /// Device operation without an open session
    #[error("Session is not open")]
    SessionNotOpen,

    /// Session lifecycle call made in the wrong state
    #[error("Invalid session state: expected {expected}, found {found}")]
    InvalidSessionState {
        /// State the call needs
        expected: &'static str,
        /// State the session was in
        found: &'static str,
    },

    /// Live-view operation while live view is off
    #[error("Live view is not active")]
    LiveViewNotActive,

    /// Cancelled before or between attempts
    #[error("Command cancelled")]
    Cancelled,

    /// The caller stopped waiting.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Rejected before reaching the device
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Download of a captured image failed and was cancelled.
    #[error("Image transfer failed: {0}")]
    TransferFailed(String),

    /// The engine has shut down.
    #[error("Dispatch worker is not running")]
    DispatcherClosed,
}

impl EngineError {
    /// Taxonomy kind of this error, when it has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Sdk(err) => Some(err.kind),
            EngineError::SessionNotOpen => Some(ErrorKind::SessionNotOpen),
            EngineError::Cancelled => Some(ErrorKind::Cancelled),
            EngineError::TransferFailed(_) => Some(ErrorKind::FileIO),
            _ => None,
        }
    }

    /// Raw native status, if the failure came from the SDK.
    pub fn code(&self) -> Option<u32> {
        match self {
            EngineError::Sdk(err) => Some(err.code),
            _ => None,
        }
    }

    /// Whether the failure is a busy condition.
    pub fn is_busy(&self) -> bool {
        self.kind() == Some(ErrorKind::DeviceBusy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_codes_classify_as_busy() {
        for code in [
            sys::EDS_ERR_DEVICE_BUSY,
            sys::EDS_ERR_PTP_DEVICE_BUSY,
            sys::EDS_ERR_OBJECT_NOTREADY,
        ] {
            assert_eq!(ErrorKind::from_status(code), ErrorKind::DeviceBusy);
        }
    }

    #[test]
    fn test_component_bits_are_masked() {
        let status = 0x0003_0000 | sys::EDS_ERR_DEVICE_NOT_FOUND;
        assert_eq!(ErrorKind::from_status(status), ErrorKind::DeviceNotFound);
    }

    #[test]
    fn test_ranges() {
        assert_eq!(ErrorKind::from_status(0xC2), ErrorKind::Communication);
        assert_eq!(ErrorKind::from_status(0x27), ErrorKind::FileIO);
        assert_eq!(ErrorKind::from_status(0xA5), ErrorKind::FileIO);
        assert_eq!(
            ErrorKind::from_status(sys::EDS_ERR_SESSION_NOT_OPEN),
            ErrorKind::SessionNotOpen
        );
        assert_eq!(ErrorKind::from_status(0x3), ErrorKind::OutOfMemory);
        assert_eq!(ErrorKind::from_status(0x5), ErrorKind::Cancelled);
    }

    #[test]
    fn test_unmapped_status_is_unknown() {
        assert_eq!(ErrorKind::from_status(0x1234), ErrorKind::Unknown(0x1234));
        assert_eq!(
            ErrorKind::from_status(0xFFFF_FFFF),
            ErrorKind::Unknown(0xFFFF)
        );
    }

    #[test]
    fn test_busy_disposition() {
        let host = SdkError::from_status(sys::EDS_ERR_DEVICE_BUSY, "drive lens");
        let ptp = SdkError::from_status(sys::EDS_ERR_PTP_DEVICE_BUSY, "drive lens");
        let other = SdkError::from_status(sys::EDS_ERR_INTERNAL_ERROR, "drive lens");
        assert_eq!(host.busy_disposition(), Some(BusyDisposition::NotAccepted));
        assert_eq!(ptp.busy_disposition(), Some(BusyDisposition::MaybeExecuted));
        assert_eq!(other.busy_disposition(), None);
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::from(SdkError::from_status(0x81, "open session"));
        assert_eq!(
            err.to_string(),
            "SDK error: open session: device busy (0x00000081)"
        );
        assert_eq!(err.code(), Some(0x81));
        assert!(err.is_busy());
    }
}
