// kernel/src/vfs/file.rs
//! Backend file objects and the open-file reference counts
//!
//! A [`File`] is the in-memory identity of a named file, directory, pipe or
//! console. Backends keep their own per-file re-entrant lock; the VFS talks
//! to them through `&self` and never assumes exclusive access. The
//! [`OpenFile`] wrapper adds the read/write reference counts that tie a file
//! object to the descriptors (and working directories) holding it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use vesta_os_abi::{FileAttributes, KernelError, Result};

use super::descriptor::Capabilities;

/// A backend file object.
pub trait File: Send + Sync {
    /// Attribute bits of the object.
    fn attributes(&self) -> FileAttributes;

    /// Current size in bytes; streams report 0.
    fn size(&self) -> usize {
        0
    }

    /// Read at `position` into `buf`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Backend-specific; block-device failures surface as `IoError`.
    fn read(&self, buf: &mut [u8], position: usize) -> Result<usize>;

    /// Write `buf` at `position`, returning the byte count.
    ///
    /// # Errors
    ///
    /// Backend-specific; `PermissionDenied` for read-only objects.
    fn write(&self, buf: &[u8], position: usize) -> Result<usize>;

    /// Grow or shrink the object to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` unless the backend supports resizing.
    fn resize(&self, new_size: usize) -> Result<()> {
        let _ = new_size;
        Err(KernelError::PermissionDenied)
    }

    /// One endpoint is going away; `caps` identifies which capability the
    /// closing descriptor held. Only pipes care.
    fn close(&self, caps: Capabilities) {
        let _ = caps;
    }
}

/// A cached file object plus its open reference counts.
///
/// Lives in the open-file table exactly while `read_count + write_count > 0`.
/// Count transitions happen under the open-file table lock; the atomics give
/// lock-free reads for assertions and size queries.
pub struct OpenFile {
    file: Arc<dyn File>,
    /// Table key; `None` for anonymous objects (pipes).
    path: Option<String>,
    read_count: AtomicU32,
    write_count: AtomicU32,
}

impl OpenFile {
    /// Wrap a backend object cached under `path`.
    #[must_use]
    pub fn new(file: Arc<dyn File>, path: Option<String>) -> Self {
        Self {
            file,
            path,
            read_count: AtomicU32::new(0),
            write_count: AtomicU32::new(0),
        }
    }

    /// The backend object.
    #[must_use]
    pub fn file(&self) -> &Arc<dyn File> {
        &self.file
    }

    /// The open-file table key, if the object has a name.
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Number of descriptors holding the read capability.
    #[must_use]
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Acquire)
    }

    /// Number of descriptors holding the write capability.
    #[must_use]
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::Acquire)
    }

    /// Whether any descriptor (or working directory) still references this.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.read_count() + self.write_count() > 0
    }

    /// Bump the counts for a descriptor acquiring `caps`.
    pub fn retain(&self, caps: Capabilities) {
        if caps.contains(Capabilities::READ) {
            self.read_count.fetch_add(1, Ordering::AcqRel);
        }
        if caps.contains(Capabilities::WRITE) {
            self.write_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Drop the counts for a descriptor releasing `caps`.
    pub fn release(&self, caps: Capabilities) {
        if caps.contains(Capabilities::READ) {
            self.read_count.fetch_sub(1, Ordering::AcqRel);
        }
        if caps.contains(Capabilities::WRITE) {
            self.write_count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFile;

    impl File for NullFile {
        fn attributes(&self) -> FileAttributes {
            FileAttributes::empty()
        }

        fn read(&self, _buf: &mut [u8], _position: usize) -> Result<usize> {
            Ok(0)
        }

        fn write(&self, buf: &[u8], _position: usize) -> Result<usize> {
            Ok(buf.len())
        }
    }

    #[test]
    fn test_counts_follow_capabilities() {
        let open = OpenFile::new(Arc::new(NullFile), Some("C:\\x".into()));
        assert!(!open.is_open());

        open.retain(Capabilities::READ | Capabilities::WRITE);
        open.retain(Capabilities::READ);
        assert_eq!(open.read_count(), 2);
        assert_eq!(open.write_count(), 1);

        open.release(Capabilities::READ | Capabilities::WRITE);
        open.release(Capabilities::READ);
        assert!(!open.is_open());
    }

    #[test]
    fn test_resize_defaults_to_denied() {
        let file = NullFile;
        assert_eq!(file.resize(10), Err(KernelError::PermissionDenied));
    }
}
