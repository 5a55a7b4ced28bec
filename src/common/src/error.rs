//! System-wide error taxonomy for Trine.

use core::fmt;

/// Errors surfaced by system calls.
///
/// User programs only ever see [`SysError::code`], a negative integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SysError {
    /// No free task slot or no free descriptor.
    ResourceExhausted = 1,
    /// Program or file name could not be resolved.
    NotFound = 2,
    /// Executable signature mismatch or corrupt store image.
    InvalidFormat = 3,
    /// Address is unmapped or not user accessible.
    PermissionDenied = 4,
    /// Descriptor out of range or not open.
    InvalidDescriptor = 5,
    /// Operation not supported by the descriptor's backend.
    Unsupported = 6,
    /// CPU exception during task execution.
    Fault = 7,
    /// Argument out of range, bad user pointer or unknown syscall.
    InvalidArgument = 8,
}

impl SysError {
    const ALL: [SysError; 8] = [
        SysError::ResourceExhausted,
        SysError::NotFound,
        SysError::InvalidFormat,
        SysError::PermissionDenied,
        SysError::InvalidDescriptor,
        SysError::Unsupported,
        SysError::Fault,
        SysError::InvalidArgument,
    ];

    /// The negative status returned across the syscall boundary.
    pub const fn code(self) -> i32 {
        -(self as i32)
    }

    /// Maps a negative status back to its error, if it is one.
    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|e| i64::from(e.code()) == code)
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysError::ResourceExhausted => write!(f, "resource exhausted"),
            SysError::NotFound => write!(f, "not found"),
            SysError::InvalidFormat => write!(f, "invalid executable format"),
            SysError::PermissionDenied => write!(f, "permission denied"),
            SysError::InvalidDescriptor => write!(f, "invalid file descriptor"),
            SysError::Unsupported => write!(f, "operation not supported"),
            SysError::Fault => write!(f, "task faulted"),
            SysError::InvalidArgument => write!(f, "invalid argument"),
        }
    }
}
