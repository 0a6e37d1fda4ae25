// kernel/src/vfs/mod.rs
//! Virtual file system
//!
//! One pathname space over every mounted backend. Four independently locked
//! structures: the descriptor table, the registered-driver list, the mount
//! table, and the open-file table. The open-file table coalesces all
//! descriptors naming one file onto one backend object and tracks its
//! read/write reference counts; a file is present in it exactly while some
//! descriptor (or working directory) references it.
//!
//! Lock order: open-file table before descriptor table before per-file
//! locks; the device lock is innermost.

pub mod descriptor;
pub mod file;
pub mod mount;
pub mod path;

pub use descriptor::{Capabilities, DescriptorTable};
pub use file::{File, OpenFile};
pub use mount::{FileSystem, MountedFilesystem};
pub use path::Path;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use vesta_os_abi::{
    FileAttributes, Handle, KernelError, Result, SeekBase, MAX_FS_MOUNTED, MAX_FS_REGISTERED,
};

use crate::fs::pipe::Pipe;
use crate::hal::DiskAdapter;
use crate::sync::{self, ReentrantMutex};

struct OpenFileTable {
    /// Re-entrant: removing a backend file during close may re-enter
    /// through descriptor teardown.
    lock: ReentrantMutex,
    map: Mutex<HashMap<String, Arc<OpenFile>>>,
}

/// The VFS service.
pub struct VirtualFileSystem {
    descriptors: DescriptorTable,
    filesystems: Mutex<Vec<Arc<dyn FileSystem>>>,
    mounts: Mutex<HashMap<String, Arc<dyn MountedFilesystem>>>,
    open_files: OpenFileTable,
}

impl Default for VirtualFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl VirtualFileSystem {
    /// Create an empty VFS with no drivers or mounts.
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptors: DescriptorTable::new(),
            filesystems: Mutex::new(Vec::new()),
            mounts: Mutex::new(HashMap::new()),
            open_files: OpenFileTable {
                lock: ReentrantMutex::new(),
                map: Mutex::new(HashMap::new()),
            },
        }
    }

    /// Register a filesystem driver.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when the driver list is full.
    pub fn register_filesystem(&self, fs: Arc<dyn FileSystem>) -> Result<()> {
        let mut filesystems = sync::lock(&self.filesystems);
        if filesystems.len() >= MAX_FS_REGISTERED {
            return Err(KernelError::OutOfMemory);
        }
        log::debug!("vfs: registered filesystem '{}'", fs.name());
        filesystems.push(fs);
        Ok(())
    }

    /// Mount a registered driver under `label`.
    ///
    /// # Errors
    ///
    /// `FileNotFound` for unknown drivers, `InvalidArgument` for duplicate
    /// labels, `OutOfMemory` when the mount table is full.
    pub fn mount(
        &self,
        fs_name: &str,
        label: &str,
        device: Option<Arc<DiskAdapter>>,
    ) -> Result<()> {
        let driver = {
            let filesystems = sync::lock(&self.filesystems);
            filesystems
                .iter()
                .find(|fs| fs.name() == fs_name)
                .cloned()
                .ok_or(KernelError::FileNotFound)?
        };

        let mut mounts = sync::lock(&self.mounts);
        if mounts.len() >= MAX_FS_MOUNTED {
            return Err(KernelError::OutOfMemory);
        }
        if mounts.contains_key(label) {
            return Err(KernelError::InvalidArgument);
        }

        let mounted = driver.create_mount(label, device)?;
        mounts.insert(label.to_string(), mounted);
        log::info!("vfs: mounted '{fs_name}' as '{label}'");
        Ok(())
    }

    fn resolve_mount(&self, path: &Path) -> Result<Arc<dyn MountedFilesystem>> {
        sync::lock(&self.mounts)
            .get(path.mount())
            .cloned()
            .ok_or(KernelError::FileNotFound)
    }

    fn cached(&self, absolute: &str) -> Option<Arc<OpenFile>> {
        sync::lock(&self.open_files.map).get(absolute).cloned()
    }

    /// Whether a path is currently present in the open-file table.
    #[must_use]
    pub fn is_cached(&self, absolute: &str) -> bool {
        self.cached(absolute).is_some()
    }

    fn capabilities_for(attributes: FileAttributes) -> Capabilities {
        if attributes.contains(FileAttributes::READ_ONLY) {
            Capabilities::READ
        } else {
            Capabilities::READ | Capabilities::WRITE
        }
    }

    /// Open an existing file, returning a descriptor.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when no descriptor slot is free, `FileNotFound` for
    /// unresolvable paths, `PermissionDenied` for a write request on a
    /// read-only file.
    pub fn open(
        &self,
        raw_path: &str,
        working_dir: Option<&str>,
        attributes: FileAttributes,
    ) -> Result<Handle> {
        let fd = self.descriptors.reserve()?;
        match self.open_into(fd, raw_path, working_dir, attributes) {
            Ok(()) => Ok(fd),
            Err(err) => {
                self.descriptors.release_reserved(fd);
                Err(err)
            }
        }
    }

    fn open_into(
        &self,
        fd: Handle,
        raw_path: &str,
        working_dir: Option<&str>,
        attributes: FileAttributes,
    ) -> Result<()> {
        let path = Path::normalize(raw_path, working_dir)?;
        let caps = Self::capabilities_for(attributes);

        let _table = self.open_files.lock.lock();

        let (open_file, fresh) = match self.cached(path.absolute()) {
            Some(cached) => (cached, false),
            None => {
                let mount = self.resolve_mount(&path)?;
                let file = mount.open_file(&path, attributes)?;
                (
                    Arc::new(OpenFile::new(file, Some(path.absolute().to_string()))),
                    true,
                )
            }
        };

        let file_attributes = open_file.file().attributes();
        if caps.contains(Capabilities::WRITE)
            && file_attributes.contains(FileAttributes::READ_ONLY)
        {
            return Err(KernelError::PermissionDenied);
        }
        if attributes.contains(FileAttributes::DIRECTORY)
            && !file_attributes.contains(FileAttributes::DIRECTORY)
        {
            return Err(KernelError::FileNotFound);
        }

        if fresh {
            sync::lock(&self.open_files.map)
                .insert(path.absolute().to_string(), Arc::clone(&open_file));
        }
        open_file.retain(caps);
        self.descriptors.publish(fd, open_file, caps);
        Ok(())
    }

    /// Create (or overwrite) a file, returning a descriptor.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` when the target is currently open; otherwise as
    /// the backend reports.
    pub fn create(
        &self,
        raw_path: &str,
        working_dir: Option<&str>,
        attributes: FileAttributes,
    ) -> Result<Handle> {
        let fd = self.descriptors.reserve()?;
        match self.create_into(fd, raw_path, working_dir, attributes) {
            Ok(()) => Ok(fd),
            Err(err) => {
                self.descriptors.release_reserved(fd);
                Err(err)
            }
        }
    }

    fn create_into(
        &self,
        fd: Handle,
        raw_path: &str,
        working_dir: Option<&str>,
        attributes: FileAttributes,
    ) -> Result<()> {
        let path = Path::normalize(raw_path, working_dir)?;
        let caps = Self::capabilities_for(attributes);

        let _table = self.open_files.lock.lock();

        if let Some(existing) = self.cached(path.absolute()) {
            if existing.is_open() {
                return Err(KernelError::PermissionDenied);
            }
            // Stale cache entry: drop it and let the backend overwrite.
            sync::lock(&self.open_files.map).remove(path.absolute());
        }

        let mount = self.resolve_mount(&path)?;
        let file = mount.create_file(&path, attributes)?;
        let open_file = Arc::new(OpenFile::new(file, Some(path.absolute().to_string())));

        sync::lock(&self.open_files.map)
            .insert(path.absolute().to_string(), Arc::clone(&open_file));
        open_file.retain(caps);
        self.descriptors.publish(fd, open_file, caps);
        Ok(())
    }

    /// Close a descriptor, dropping the file from the open-file table when
    /// its last reference goes away.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unpublished handles.
    pub fn close(&self, fd: Handle) -> Result<()> {
        let _table = self.open_files.lock.lock();

        let (open_file, caps) = self.descriptors.take(fd)?;
        open_file.file().close(caps);
        open_file.release(caps);

        if !open_file.is_open() {
            if let Some(absolute) = open_file.path() {
                sync::lock(&self.open_files.map).remove(absolute);
            }
        }
        Ok(())
    }

    /// Read through a descriptor, advancing its position.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without the read capability.
    pub fn read(&self, fd: Handle, buf: &mut [u8]) -> Result<usize> {
        let desc = self.descriptors.get(fd)?;
        if !desc.caps.contains(Capabilities::READ) {
            return Err(KernelError::PermissionDenied);
        }

        // The table lock is not held here: a pipe read may block.
        let transferred = desc.file.file().read(buf, desc.position)?;
        self.descriptors.advance_position(fd, desc.position, transferred);
        Ok(transferred)
    }

    /// Write through a descriptor, advancing its position.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` without the write capability.
    pub fn write(&self, fd: Handle, buf: &[u8]) -> Result<usize> {
        let desc = self.descriptors.get(fd)?;
        if !desc.caps.contains(Capabilities::WRITE) {
            return Err(KernelError::PermissionDenied);
        }

        let transferred = desc.file.file().write(buf, desc.position)?;
        self.descriptors.advance_position(fd, desc.position, transferred);
        Ok(transferred)
    }

    /// Move a descriptor position; `End` is exactly one past the last byte.
    ///
    /// # Errors
    ///
    /// `IoError` when the target lies outside `0..=size`.
    pub fn seek(&self, fd: Handle, offset: i64, base: SeekBase) -> Result<usize> {
        let desc = self.descriptors.get(fd)?;
        let size = desc.file.file().size();

        let target = Self::offset_from(base, offset, desc.position, size)?;
        if target > size {
            return Err(KernelError::IoError);
        }
        self.descriptors.set_position(fd, target)?;
        Ok(target)
    }

    /// Resize the file behind a descriptor using seek-style addressing.
    ///
    /// # Errors
    ///
    /// `IoError` for a negative target; backend errors pass through.
    pub fn set_size(&self, fd: Handle, offset: i64, base: SeekBase) -> Result<()> {
        let desc = self.descriptors.get(fd)?;
        if !desc.caps.contains(Capabilities::WRITE) {
            return Err(KernelError::PermissionDenied);
        }
        let size = desc.file.file().size();

        let target = Self::offset_from(base, offset, desc.position, size)?;
        desc.file.file().resize(target)
    }

    fn offset_from(base: SeekBase, offset: i64, position: usize, size: usize) -> Result<usize> {
        let anchor = match base {
            SeekBase::Beginning => 0i64,
            SeekBase::Current => i64::try_from(position).map_err(|_| KernelError::IoError)?,
            SeekBase::End => i64::try_from(size).map_err(|_| KernelError::IoError)?,
        };
        let target = anchor + offset;
        usize::try_from(target).map_err(|_| KernelError::IoError)
    }

    /// Delete a file or empty directory.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` while the target is open (a working directory
    /// counts as open), `DirectoryNotEmpty` for non-empty directories.
    pub fn delete(&self, raw_path: &str, working_dir: Option<&str>) -> Result<()> {
        let path = Path::normalize(raw_path, working_dir)?;

        let _table = self.open_files.lock.lock();

        if let Some(existing) = self.cached(path.absolute()) {
            if existing.is_open() {
                return Err(KernelError::PermissionDenied);
            }
        }

        let mount = self.resolve_mount(&path)?;
        mount.delete_file(&path)?;
        sync::lock(&self.open_files.map).remove(path.absolute());
        Ok(())
    }

    /// Create a pipe, returning `(write_end, read_end)`.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when two descriptor slots cannot be reserved.
    pub fn create_pipe(&self) -> Result<(Handle, Handle)> {
        let write_fd = self.descriptors.reserve()?;
        let read_fd = match self.descriptors.reserve() {
            Ok(fd) => fd,
            Err(err) => {
                self.descriptors.release_reserved(write_fd);
                return Err(err);
            }
        };

        let open_file = Arc::new(OpenFile::new(Arc::new(Pipe::new()), None));
        self.descriptors.with_table_locked(|| {
            open_file.retain(Capabilities::WRITE);
            self.descriptors
                .publish(write_fd, Arc::clone(&open_file), Capabilities::WRITE);
            open_file.retain(Capabilities::READ);
            self.descriptors
                .publish(read_fd, Arc::clone(&open_file), Capabilities::READ);
        });
        Ok((write_fd, read_fd))
    }

    /// Take a working-directory reference on a directory, returning its
    /// normalized absolute path.
    ///
    /// The caller swaps its previous working directory only afterwards, so
    /// revisiting the same directory never drops it from the table.
    ///
    /// # Errors
    ///
    /// `FileNotFound` when the path does not name a directory.
    pub fn acquire_directory(&self, raw_path: &str, working_dir: Option<&str>) -> Result<String> {
        let path = Path::normalize(raw_path, working_dir)?;

        let _table = self.open_files.lock.lock();

        let (open_file, fresh) = match self.cached(path.absolute()) {
            Some(cached) => (cached, false),
            None => {
                let mount = self.resolve_mount(&path)?;
                let file = mount.open_file(&path, FileAttributes::DIRECTORY)?;
                (
                    Arc::new(OpenFile::new(file, Some(path.absolute().to_string()))),
                    true,
                )
            }
        };

        if !open_file
            .file()
            .attributes()
            .contains(FileAttributes::DIRECTORY)
        {
            return Err(KernelError::FileNotFound);
        }

        if fresh {
            sync::lock(&self.open_files.map)
                .insert(path.absolute().to_string(), Arc::clone(&open_file));
        }
        open_file.retain(Capabilities::READ);
        Ok(path.absolute().to_string())
    }

    /// Drop a working-directory reference taken by
    /// [`VirtualFileSystem::acquire_directory`].
    pub fn release_directory(&self, absolute: &str) {
        let _table = self.open_files.lock.lock();
        if let Some(open_file) = self.cached(absolute) {
            open_file.release(Capabilities::READ);
            if !open_file.is_open() {
                sync::lock(&self.open_files.map).remove(absolute);
            }
        }
    }
}
