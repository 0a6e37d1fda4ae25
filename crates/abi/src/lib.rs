// abi/src/lib.rs
//! Shared ABI definitions for the kernel/user boundary
//!
//! User programs talk to the kernel through a simulated register file: the
//! service class sits in the high byte of `rax`'s low word, the operation in
//! the low byte, arguments in the remaining registers. On return `rax` holds
//! the result, or the error code with the carry flag set.
//!
//! Everything in this crate is wire-stable: discriminants and record layouts
//! must not change once a volume has been formatted or a program compiled.

#![warn(missing_docs)]

pub mod error;

pub use error::{KernelError, Result};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Number of slots in the kernel-wide descriptor table.
pub const MAX_FD: usize = 64;

/// Maximum number of registrable filesystem drivers.
pub const MAX_FS_REGISTERED: usize = 4;

/// Maximum number of simultaneously mounted filesystems.
pub const MAX_FS_MOUNTED: usize = 8;

/// Maximum number of entries in a non-root directory.
pub const MAX_DIR_ENTRIES: usize = 21;

/// Maximum file-name length in bytes, excluding the NUL terminator.
pub const MAX_NAME_LEN: usize = 11;

/// Number of slots in the process table.
pub const MAX_PROCESSES: usize = 64;

/// Descriptor index as carried in registers.
pub type Handle = u16;

/// Thread identifier: a stable hash of the host thread id.
pub type Tid = u64;

/// Exit code of a thread or process.
pub type ExitCode = u16;

bitflags::bitflags! {
    /// File-attribute bits, stored verbatim in directory entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        /// File may only be opened for reading.
        const READ_ONLY = 0x01;
        /// System object (console, supervisor-owned files).
        const SYSTEM = 0x04;
        /// Entry is a directory.
        const DIRECTORY = 0x10;
    }
}

/// Service class, carried in the high byte of `rax`'s low word.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceClass {
    /// File-system services ([`FsCall`] minors).
    FileSystem = 1,
    /// Process and thread services ([`ProcessCall`] minors).
    Process = 2,
}

impl ServiceClass {
    /// Decode from the raw byte; `None` for unknown classes.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::FileSystem),
            2 => Some(Self::Process),
            _ => None,
        }
    }
}

/// File-system operations, carried in the low byte of `rax`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsCall {
    /// Open an existing file: path in `rdx`/`rcx`, attributes in `rdi`.
    Open = 1,
    /// Write through a descriptor: handle in `rdx`, buffer in `rdi`/`rcx`.
    Write = 2,
    /// Read through a descriptor: handle in `rdx`, buffer in `rdi`/`rcx`.
    Read = 3,
    /// Move a descriptor position: handle in `rdx`, offset in `rdi`, base in `rcx`.
    Seek = 4,
    /// Close a descriptor: handle in `rdx`.
    Close = 5,
    /// Delete by path: path in `rdx`/`rcx`.
    Delete = 6,
    /// Change the working directory: path in `rdx`/`rcx`.
    SetWorkingDir = 7,
    /// Copy the working directory into a buffer: buffer in `rdi`/`rcx`.
    GetWorkingDir = 8,
    /// Create a pipe; the two handles are stored to the array at `rdx`.
    CreatePipe = 9,
    /// Resize a file: handle in `rdx`, offset in `rdi`, base in `rcx`.
    SetSize = 10,
    /// Create (or overwrite) a file: path in `rdx`/`rcx`, attributes in `rdi`.
    Create = 11,
}

impl FsCall {
    /// Decode from the raw byte; `None` for unknown operations.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Open),
            2 => Some(Self::Write),
            3 => Some(Self::Read),
            4 => Some(Self::Seek),
            5 => Some(Self::Close),
            6 => Some(Self::Delete),
            7 => Some(Self::SetWorkingDir),
            8 => Some(Self::GetWorkingDir),
            9 => Some(Self::CreatePipe),
            10 => Some(Self::SetSize),
            11 => Some(Self::Create),
            _ => None,
        }
    }
}

/// Process operations, carried in the low byte of `rax`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessCall {
    /// Start a program: name in `rdx`/`rsi`, argument string in
    /// `rdi`/`rcx`, stdin/stdout handles packed in `rbx`.
    Clone = 1,
    /// Block until one of the listed threads terminates: tid array at `rdx`,
    /// count in `rcx`.
    WaitFor = 2,
    /// Collect a terminated thread's exit code: tid in `rdx`.
    ReadExitCode = 3,
    /// Terminate the calling thread: exit code in `rcx`.
    Exit = 4,
    /// Stop every process and thread.
    Shutdown = 5,
    /// Install (or clear) the cooperative terminate handler: handler in `rdx`.
    RegisterSignalHandler = 6,
}

impl ProcessCall {
    /// Decode from the raw byte; `None` for unknown operations.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Clone),
            2 => Some(Self::WaitFor),
            3 => Some(Self::ReadExitCode),
            4 => Some(Self::Exit),
            5 => Some(Self::Shutdown),
            6 => Some(Self::RegisterSignalHandler),
            _ => None,
        }
    }
}

/// Base of a seek or resize request.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekBase {
    /// Offset is relative to the start of the file.
    Beginning = 0,
    /// Offset is relative to the descriptor's current position.
    Current = 1,
    /// Offset is relative to the end of the file (one past the last byte).
    End = 2,
}

impl SeekBase {
    /// Decode from the raw byte; `None` for unknown bases.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Beginning),
            1 => Some(Self::Current),
            2 => Some(Self::End),
            _ => None,
        }
    }
}

/// Directory record as returned by reading a directory descriptor.
///
/// A directory read packs as many of these as fit into the caller's buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DirRecord {
    /// NUL-terminated entry name.
    pub name: [u8; 12],
    /// Attribute bits of the entry ([`FileAttributes`]).
    pub attributes: u8,
    _pad: [u8; 3],
}

impl DirRecord {
    /// Build a record from a name and attribute bits.
    ///
    /// The name is truncated to [`MAX_NAME_LEN`] bytes.
    #[must_use]
    pub fn new(name: &str, attributes: FileAttributes) -> Self {
        let mut record = Self {
            name: [0; 12],
            attributes: attributes.bits(),
            _pad: [0; 3],
        };
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME_LEN);
        record.name[..len].copy_from_slice(&bytes[..len]);
        record
    }

    /// The entry name as a string slice (up to the first NUL).
    #[must_use]
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

/// The simulated register file crossing the syscall boundary.
///
/// Pointers travel as raw addresses in `u64` registers; the kernel
/// reconstructs slices from pointer/length pairs after validation, exactly
/// as in-process user threads handed them over.
#[derive(Debug, Default, Clone, Copy)]
pub struct Registers {
    /// Service selector on entry, result or error code on exit.
    pub rax: u64,
    /// Auxiliary argument (stdin/stdout handles for `Clone`).
    pub rbx: u64,
    /// Length or count argument.
    pub rcx: u64,
    /// Primary argument (handle, pointer).
    pub rdx: u64,
    /// Secondary length argument.
    pub rsi: u64,
    /// Buffer or offset argument.
    pub rdi: u64,
    /// Set by the kernel when the call failed; `rax` then holds the error.
    pub carry: bool,
}

impl Registers {
    /// Build a register file selecting the given service and operation.
    #[must_use]
    pub fn syscall(class: ServiceClass, minor: u8) -> Self {
        Self {
            rax: ((class as u64) << 8) | u64::from(minor),
            ..Self::default()
        }
    }

    /// Service class byte of the request.
    #[must_use]
    pub const fn major(&self) -> u8 {
        (self.rax >> 8) as u8
    }

    /// Operation byte of the request.
    #[must_use]
    pub const fn minor(&self) -> u8 {
        self.rax as u8
    }

    /// Report success with a result value in `rax`.
    pub fn set_result(&mut self, value: u64) {
        self.carry = false;
        self.rax = value;
    }

    /// Report failure; `rax` carries the error code.
    pub fn set_error(&mut self, error: KernelError) {
        self.carry = true;
        self.rax = u64::from(error.to_u16());
    }

    /// Decode the outcome of a completed call.
    ///
    /// # Errors
    ///
    /// Returns the carried [`KernelError`] when the carry flag is set.
    pub fn result(&self) -> Result<u64> {
        if self.carry {
            Err(KernelError::from_u16(self.rax as u16))
        } else {
            Ok(self.rax)
        }
    }

    /// Pack stdin/stdout handles into `rbx` for a `Clone` request.
    pub fn set_std_handles(&mut self, stdin: Handle, stdout: Handle) {
        self.rbx = (u64::from(stdin) << 16) | u64::from(stdout);
    }

    /// Unpack the stdin/stdout handles of a `Clone` request.
    #[must_use]
    pub const fn std_handles(&self) -> (Handle, Handle) {
        (((self.rbx >> 16) & 0xFFFF) as Handle, (self.rbx & 0xFFFF) as Handle)
    }

    /// Point `rdi`/`rcx` at an argument string for a `Clone` request.
    ///
    /// Only the address and length travel; the caller keeps the string
    /// alive until the call completes (the kernel copies it into the new
    /// process before returning).
    pub fn set_argument(&mut self, argument: &str) {
        self.rdi = argument.as_ptr() as u64;
        self.rcx = argument.len() as u64;
    }

    /// The argument string handed to a program's initial thread.
    ///
    /// Empty for a null pointer, a zero length, or bytes that are not
    /// valid UTF-8.
    #[must_use]
    pub fn argument(&self) -> &str {
        if self.rdi == 0 || self.rcx == 0 {
            return "";
        }
        // SAFETY: the kernel built this register file with `rdi`/`rcx`
        // describing a live buffer it owns for the thread's lifetime.
        let bytes =
            unsafe { core::slice::from_raw_parts(self.rdi as *const u8, self.rcx as usize) };
        core::str::from_utf8(bytes).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syscall_selector_roundtrip() {
        let regs = Registers::syscall(ServiceClass::FileSystem, FsCall::Open as u8);
        assert_eq!(ServiceClass::from_u8(regs.major()), Some(ServiceClass::FileSystem));
        assert_eq!(FsCall::from_u8(regs.minor()), Some(FsCall::Open));
    }

    #[test]
    fn test_result_and_error() {
        let mut regs = Registers::default();
        regs.set_result(42);
        assert_eq!(regs.result(), Ok(42));

        regs.set_error(KernelError::FileNotFound);
        assert_eq!(regs.result(), Err(KernelError::FileNotFound));
    }

    #[test]
    fn test_std_handle_packing() {
        let mut regs = Registers::default();
        regs.set_std_handles(3, 9);
        assert_eq!(regs.std_handles(), (3, 9));
    }

    #[test]
    fn test_argument_roundtrip() {
        let argument = String::from("-r C:\\a b.txt");
        let mut regs = Registers::default();
        regs.set_argument(&argument);
        assert_eq!(regs.argument(), argument);

        assert_eq!(Registers::default().argument(), "");
    }

    #[test]
    fn test_dir_record_name() {
        let record = DirRecord::new("notes.txt", FileAttributes::empty());
        assert_eq!(record.name(), "notes.txt");

        let long = DirRecord::new("a-very-long-name", FileAttributes::DIRECTORY);
        assert_eq!(long.name().len(), MAX_NAME_LEN);
    }

    #[test]
    fn test_dir_record_size() {
        assert_eq!(core::mem::size_of::<DirRecord>(), 16);
    }
}
