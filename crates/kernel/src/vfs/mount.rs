// kernel/src/vfs/mount.rs
//! Filesystem driver and mount contracts
//!
//! A [`FileSystem`] is a registered driver ("fat", "stdio"); a
//! [`MountedFilesystem`] is one labeled instance of it. The VFS resolves a
//! normalized path's label to a mount and delegates open/create/delete; the
//! backend returns bare [`File`] objects and never sees descriptors or
//! reference counts.

use std::sync::Arc;

use vesta_os_abi::{FileAttributes, Result};

use super::file::File;
use super::path::Path;
use crate::hal::DiskAdapter;

/// A registered filesystem driver.
pub trait FileSystem: Send + Sync {
    /// Driver name used when mounting (e.g. `"fat"`).
    fn name(&self) -> &str;

    /// Instantiate a mount with the given label.
    ///
    /// Disk-backed drivers require `device`; device-less drivers ignore it.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when a required device is missing; `IoError` when
    /// the volume cannot be brought up.
    fn create_mount(
        &self,
        label: &str,
        device: Option<Arc<DiskAdapter>>,
    ) -> Result<Arc<dyn MountedFilesystem>>;
}

/// One mounted filesystem instance.
pub trait MountedFilesystem: Send + Sync {
    /// The mount label paths are resolved against.
    fn label(&self) -> &str;

    /// Open an existing file or directory; the mount root is addressed by a
    /// path with an empty final name.
    ///
    /// # Errors
    ///
    /// `FileNotFound` when any component is missing.
    fn open_file(&self, path: &Path, attributes: FileAttributes) -> Result<Arc<dyn File>>;

    /// Create a file, materializing missing intermediate directories and
    /// overwriting an existing entry of the same name.
    ///
    /// # Errors
    ///
    /// `NotEnoughDiskSpace` when the volume or directory is full.
    fn create_file(&self, path: &Path, attributes: FileAttributes) -> Result<Arc<dyn File>>;

    /// Remove a file or empty directory.
    ///
    /// # Errors
    ///
    /// `FileNotFound` for missing entries, `DirectoryNotEmpty` for
    /// non-empty directories.
    fn delete_file(&self, path: &Path) -> Result<()>;
}
