//! Kernel error taxonomy
//!
//! Errors come in four flavours:
//! - not found: lookups that miss, answered with a neutral value
//! - invalid parameter: rejected arguments, recorded as the caller's last error
//! - protocol fault: a malformed or unmatched reply, fatal only to one awaiter
//! - fatal: a system stop with a stop code
//!
//! `KernelError` is serializable so a handler failure can travel back to the
//! caller as the payload of an error reply.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const ERROR_SUCCESS: u32 = 0;
pub const ERROR_ACCESS_DENIED: u32 = 5;
pub const ERROR_INVALID_HANDLE: u32 = 6;
pub const ERROR_NOT_FOUND: u32 = 1168;
pub const ERROR_INVALID_PARAMETER: u32 = 87;
pub const ERROR_CALL_NOT_IMPLEMENTED: u32 = 120;
pub const ERROR_CANCELLED: u32 = 1223;
pub const ERROR_INVALID_WINDOW_HANDLE: u32 = 1400;
pub const ERROR_INVALID_MENU_HANDLE: u32 = 1401;
pub const ERROR_TLW_WITH_WSCHILD: u32 = 1406;
pub const ERROR_CANNOT_FIND_WND_CLASS: u32 = 1407;
pub const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;
pub const ERROR_INVALID_INDEX: u32 = 1413;
pub const ERROR_TIMEOUT: u32 = 1460;
pub const ERROR_NOT_ENOUGH_QUOTA: u32 = 1816;
pub const ERROR_PROCESS_ABORTED: u32 = 1067;
pub const ERROR_STACK_OVERFLOW: u32 = 1001;
pub const ERROR_INVALID_MESSAGE: u32 = 1002;

/// Errors raised by kernel operations and subsystem handlers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelError {
    /// Handle is unknown, stale, or of the wrong type
    InvalidHandle,
    /// Window handle does not name a live window
    InvalidWindowHandle,
    /// Menu handle does not name a menu
    InvalidMenuHandle,
    /// Child window requested without a parent
    ChildWithoutParent,
    /// Window class lookup failed
    ClassNotFound(String),
    /// A class of that name is already registered
    ClassAlreadyExists(String),
    /// Window-long or extra-slot index out of range
    InvalidIndex(i32),
    /// Argument rejected
    InvalidParameter(String),
    /// Caller may not touch this object
    AccessDenied,
    /// Lookup missed
    NotFound,
    /// No subsystem listens on this channel
    UnknownChannel(i64),
    /// Subsystem has no handler for this opcode
    UnknownOpcode { subsystem: String, opcode: u32 },
    /// Malformed or unmatched message
    Protocol(String),
    /// Payload could not be decoded
    BadPayload(String),
    /// Reply will never arrive (process gone)
    Cancelled,
    /// Target process is not running
    ProcessTerminated(u32),
    /// Window procedure did not answer in time
    Timeout,
    /// Message queue is full
    QueueFull,
    /// Nested dispatch exceeded the configured depth
    DispatchDepthExceeded,
    /// NCCREATE or CREATE asked to abort creation
    CreationAborted,
    /// Window procedure failed
    Procedure(String),
    /// Operation not supported
    NotSupported,
}

impl KernelError {
    /// The last-error code recorded for the caller when this error surfaces
    pub fn last_error_code(&self) -> u32 {
        match self {
            KernelError::InvalidHandle => ERROR_INVALID_HANDLE,
            KernelError::InvalidWindowHandle => ERROR_INVALID_WINDOW_HANDLE,
            KernelError::InvalidMenuHandle => ERROR_INVALID_MENU_HANDLE,
            KernelError::ChildWithoutParent => ERROR_TLW_WITH_WSCHILD,
            KernelError::ClassNotFound(_) => ERROR_CANNOT_FIND_WND_CLASS,
            KernelError::ClassAlreadyExists(_) => ERROR_CLASS_ALREADY_EXISTS,
            KernelError::InvalidIndex(_) => ERROR_INVALID_INDEX,
            KernelError::InvalidParameter(_) | KernelError::BadPayload(_) => {
                ERROR_INVALID_PARAMETER
            }
            KernelError::AccessDenied => ERROR_ACCESS_DENIED,
            KernelError::NotFound => ERROR_NOT_FOUND,
            KernelError::UnknownChannel(_) | KernelError::UnknownOpcode { .. } => {
                ERROR_CALL_NOT_IMPLEMENTED
            }
            KernelError::Protocol(_) => ERROR_INVALID_MESSAGE,
            KernelError::Cancelled | KernelError::CreationAborted => ERROR_CANCELLED,
            KernelError::ProcessTerminated(_) => ERROR_PROCESS_ABORTED,
            KernelError::Timeout => ERROR_TIMEOUT,
            KernelError::QueueFull => ERROR_NOT_ENOUGH_QUOTA,
            KernelError::DispatchDepthExceeded => ERROR_STACK_OVERFLOW,
            KernelError::Procedure(_) => ERROR_INVALID_MESSAGE,
            KernelError::NotSupported => ERROR_CALL_NOT_IMPLEMENTED,
        }
    }

    /// Whether this error is a lookup miss rather than a rejected call
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KernelError::NotFound | KernelError::InvalidHandle | KernelError::InvalidWindowHandle
        )
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::InvalidHandle => write!(f, "invalid handle"),
            KernelError::InvalidWindowHandle => write!(f, "invalid window handle"),
            KernelError::InvalidMenuHandle => write!(f, "invalid menu handle"),
            KernelError::ChildWithoutParent => {
                write!(f, "cannot create a top-level child window")
            }
            KernelError::ClassNotFound(name) => write!(f, "window class not found: {}", name),
            KernelError::ClassAlreadyExists(name) => {
                write!(f, "window class already exists: {}", name)
            }
            KernelError::InvalidIndex(index) => write!(f, "invalid index: {}", index),
            KernelError::InvalidParameter(msg) => write!(f, "invalid parameter: {}", msg),
            KernelError::AccessDenied => write!(f, "access denied"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::UnknownChannel(channel) => write!(f, "unknown channel {}", channel),
            KernelError::UnknownOpcode { subsystem, opcode } => {
                write!(f, "unknown opcode {:#x} for subsystem {}", opcode, subsystem)
            }
            KernelError::Protocol(msg) => write!(f, "protocol fault: {}", msg),
            KernelError::BadPayload(msg) => write!(f, "bad payload: {}", msg),
            KernelError::Cancelled => write!(f, "request cancelled"),
            KernelError::ProcessTerminated(pid) => write!(f, "process {} terminated", pid),
            KernelError::Timeout => write!(f, "timed out"),
            KernelError::QueueFull => write!(f, "message queue full"),
            KernelError::DispatchDepthExceeded => write!(f, "dispatch nested too deeply"),
            KernelError::CreationAborted => write!(f, "window creation aborted"),
            KernelError::Procedure(msg) => write!(f, "window procedure failed: {}", msg),
            KernelError::NotSupported => write!(f, "not supported"),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<serde_json::Error> for KernelError {
    fn from(e: serde_json::Error) -> Self {
        KernelError::BadPayload(e.to_string())
    }
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;

/// Stop codes raised when the system cannot continue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopCode {
    /// A process flagged critical exited
    CriticalProcessDied,
    /// An internal consistency check failed
    KernelInvariantBroken,
}

impl StopCode {
    pub fn code(&self) -> u32 {
        match self {
            StopCode::CriticalProcessDied => 0xEF,
            StopCode::KernelInvariantBroken => 0x139,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StopCode::CriticalProcessDied => "CRITICAL_PROCESS_DIED",
            StopCode::KernelInvariantBroken => "KERNEL_INVARIANT_BROKEN",
        }
    }
}

/// A full system stop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemStop {
    pub code: StopCode,
    pub detail: String,
}

impl fmt::Display for SystemStop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STOP {:#010x} ({}): {}",
            self.code.code(),
            self.code.name(),
            self.detail
        )
    }
}

impl std::error::Error for SystemStop {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_error_codes() {
        assert_eq!(KernelError::ChildWithoutParent.last_error_code(), 1406);
        assert_eq!(
            KernelError::ClassNotFound("x".into()).last_error_code(),
            1407
        );
        assert_eq!(KernelError::InvalidMenuHandle.last_error_code(), 1401);
        assert_eq!(KernelError::AccessDenied.last_error_code(), 5);
    }

    #[test]
    fn test_error_survives_json() {
        let err = KernelError::UnknownOpcode {
            subsystem: "user32".into(),
            opcode: 7,
        };
        let value = serde_json::to_value(&err).unwrap();
        let back: KernelError = serde_json::from_value(value).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_stop_display() {
        let stop = SystemStop {
            code: StopCode::CriticalProcessDied,
            detail: "csrss".into(),
        };
        assert_eq!(
            stop.to_string(),
            "STOP 0x000000ef (CRITICAL_PROCESS_DIED): csrss"
        );
    }
}
