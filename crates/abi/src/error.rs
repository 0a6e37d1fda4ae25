// abi/src/error.rs
//! Type-safe kernel errors
//!
//! This module defines the single error type used across the whole kernel
//! and reported to user programs through the register file.
//!
//! # Design Philosophy
//!
//! - **One enum**: every core operation reports a `KernelError`; there is no
//!   second, exception-style channel.
//! - **ABI-safe**: the discriminants are stable `u16` values carried in `rax`
//!   when the carry flag is set.
//! - **Pattern matching**: callers handle errors explicitly, no magic numbers.

/// Kernel error type
///
/// Represented as a `u16` for efficient ABI crossing. The discriminant values
/// are stable and must not be changed.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelError {
    /// Operation completed successfully (not an error)
    ///
    /// This variant exists for wire compatibility but should never be used
    /// in an `Err` context.
    Success = 0,

    /// Invalid argument provided
    InvalidArgument = 1,

    /// File, directory, or path component does not exist
    ///
    /// Also reported for paths that cannot be parsed; the kernel does not
    /// distinguish a malformed path from a missing one.
    FileNotFound = 2,

    /// Directory still contains entries
    DirectoryNotEmpty = 3,

    /// No free allocation-table entries remain on the volume
    NotEnoughDiskSpace = 4,

    /// A fixed-capacity kernel table is full
    OutOfMemory = 5,

    /// Operation not permitted on this object
    PermissionDenied = 6,

    /// Block-device transfer failed or a position is out of range
    IoError = 7,

    /// Pipe write with every reader endpoint closed
    BrokenPipe = 8,

    /// Internal error that has no better classification
    Unknown = 0xFFFF,
}

impl KernelError {
    /// Convert from the raw wire value
    #[must_use]
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::InvalidArgument,
            2 => Self::FileNotFound,
            3 => Self::DirectoryNotEmpty,
            4 => Self::NotEnoughDiskSpace,
            5 => Self::OutOfMemory,
            6 => Self::PermissionDenied,
            7 => Self::IoError,
            8 => Self::BrokenPipe,
            _ => Self::Unknown,
        }
    }

    /// Get the raw wire value
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Get a human-readable description
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::InvalidArgument => "invalid argument",
            Self::FileNotFound => "file not found",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::NotEnoughDiskSpace => "not enough disk space",
            Self::OutOfMemory => "out of memory",
            Self::PermissionDenied => "permission denied",
            Self::IoError => "I/O error",
            Self::BrokenPipe => "broken pipe",
            Self::Unknown => "unknown error",
        }
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for KernelError {}

/// Result type alias for kernel operations
pub type Result<T> = core::result::Result<T, KernelError>;
