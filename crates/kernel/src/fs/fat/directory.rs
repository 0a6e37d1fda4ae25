// kernel/src/fs/fat/directory.rs
//! Directory entries and directory objects
//!
//! A directory is a packed array of [`DirEntryRaw`] records backed by a
//! single cluster. The root stores its own byte size in a 4-byte prefix of
//! its cluster; every other directory's size lives in its parent's entry
//! for it. Directory objects reach their parent by replaying the entry
//! chain from the root, so there is no parent pointer to cycle on.

use std::sync::{Arc, Mutex};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use vesta_os_abi::{
    DirRecord, FileAttributes, KernelError, Result, MAX_DIR_ENTRIES, MAX_NAME_LEN,
};

use crate::sync::{self, ReentrantMutex};
use crate::vfs::descriptor::Capabilities;
use crate::vfs::file::File;

use super::file::FatFile;
use super::table::{FatIndex, FatVolume};

/// Size of one on-disk directory entry.
pub const DIR_ENTRY_SIZE: usize = core::mem::size_of::<DirEntryRaw>();

/// Byte length of the root directory's size prefix.
pub const ROOT_SIZE_PREFIX: usize = core::mem::size_of::<u32>();

/// On-disk directory entry, little-endian.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct DirEntryRaw {
    /// NUL-terminated entry name.
    pub name: [u8; 12],
    /// Attribute bits ([`FileAttributes`]).
    pub attributes: u8,
    _pad: [u8; 3],
    /// Head of the entry's allocation chain.
    pub start: FatIndex,
    /// Byte size of the entry's content.
    pub size: u32,
}

impl DirEntryRaw {
    /// Build an entry for a freshly created, empty object.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the name is empty or longer than
    /// [`MAX_NAME_LEN`] bytes.
    pub fn new(name: &str, attributes: FileAttributes, start: FatIndex) -> Result<Self> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
            return Err(KernelError::InvalidArgument);
        }
        let mut entry = Self {
            name: [0; 12],
            attributes: attributes.bits(),
            _pad: [0; 3],
            start,
            size: 0,
        };
        entry.name[..bytes.len()].copy_from_slice(bytes);
        Ok(entry)
    }

    /// The entry name up to the first NUL.
    #[must_use]
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Attribute bits as flags.
    #[must_use]
    pub fn file_attributes(&self) -> FileAttributes {
        FileAttributes::from_bits_truncate(self.attributes)
    }

    /// Whether the entry names a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.file_attributes().contains(FileAttributes::DIRECTORY)
    }
}

enum DirLocation {
    Root,
    Sub {
        entry: DirEntryRaw,
        /// Ancestors below the root, outermost first.
        parents: Vec<DirEntryRaw>,
    },
}

/// A directory object of a mounted volume.
pub struct FatDirectory {
    volume: Arc<FatVolume>,
    location: DirLocation,
    lock: ReentrantMutex,
    entries: Mutex<Vec<DirEntryRaw>>,
}

impl FatDirectory {
    /// The root directory object; exactly one exists per mount.
    #[must_use]
    pub fn root(volume: Arc<FatVolume>) -> Arc<Self> {
        Arc::new(Self {
            volume,
            location: DirLocation::Root,
            lock: ReentrantMutex::new(),
            entries: Mutex::new(Vec::new()),
        })
    }

    /// A subdirectory object reachable through `parents`.
    #[must_use]
    pub fn subdirectory(
        volume: Arc<FatVolume>,
        entry: DirEntryRaw,
        parents: Vec<DirEntryRaw>,
    ) -> Arc<Self> {
        Arc::new(Self {
            volume,
            location: DirLocation::Sub { entry, parents },
            lock: ReentrantMutex::new(),
            entries: Mutex::new(Vec::new()),
        })
    }

    fn name(&self) -> &str {
        match &self.location {
            DirLocation::Root => "",
            DirLocation::Sub { entry, .. } => entry.name(),
        }
    }

    /// The directory-entry chain from the root to this directory.
    pub(crate) fn chain_to_self(&self) -> Vec<DirEntryRaw> {
        match &self.location {
            DirLocation::Root => Vec::new(),
            DirLocation::Sub { entry, parents } => {
                let mut chain = parents.clone();
                chain.push(*entry);
                chain
            }
        }
    }

    fn load(&self) -> Result<()> {
        let cluster_size = self.volume.cluster_size();
        let mut buf = vec![0u8; cluster_size];

        let (data_offset, byte_size) = match &self.location {
            DirLocation::Root => {
                self.volume
                    .read_clusters(&mut buf, self.volume.superblock().root_cluster, 1)?;
                let size = u32::from_le_bytes(buf[..ROOT_SIZE_PREFIX].try_into().unwrap());
                (ROOT_SIZE_PREFIX, size as usize)
            }
            DirLocation::Sub { entry, parents } => {
                let parent = self.volume.load_directory(parents)?;
                let size = parent.entry_size(self.name())?;
                self.volume.read_data_cluster(&mut buf, entry.start)?;
                (0, size as usize)
            }
        };

        let count = byte_size / DIR_ENTRY_SIZE;
        let mut parsed = Vec::with_capacity(count);
        for index in 0..count {
            let offset = data_offset + index * DIR_ENTRY_SIZE;
            let record = DirEntryRaw::read_from_bytes(&buf[offset..offset + DIR_ENTRY_SIZE])
                .map_err(|_| KernelError::IoError)?;
            parsed.push(record);
        }

        *sync::lock(&self.entries) = parsed;
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let cluster_size = self.volume.cluster_size();
        let mut buf = vec![0u8; cluster_size];
        let entries = sync::lock(&self.entries).clone();
        let byte_size = (entries.len() * DIR_ENTRY_SIZE) as u32;

        match &self.location {
            DirLocation::Root => {
                buf[..ROOT_SIZE_PREFIX].copy_from_slice(&byte_size.to_le_bytes());
                for (index, entry) in entries.iter().enumerate() {
                    let offset = ROOT_SIZE_PREFIX + index * DIR_ENTRY_SIZE;
                    buf[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(entry.as_bytes());
                }
                self.volume
                    .write_clusters(&buf, self.volume.superblock().root_cluster, 1)
            }
            DirLocation::Sub { entry, parents } => {
                for (index, record) in entries.iter().enumerate() {
                    let offset = index * DIR_ENTRY_SIZE;
                    buf[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(record.as_bytes());
                }
                self.volume.write_data_cluster(&buf, entry.start)?;

                let parent = self.volume.load_directory(parents)?;
                parent.change_entry_size(self.name(), byte_size)
            }
        }
    }

    /// Look up a child entry by name.
    ///
    /// # Errors
    ///
    /// `FileNotFound` when no entry carries the name.
    pub fn find(&self, name: &str) -> Result<DirEntryRaw> {
        let _dir = self.lock.lock();
        self.load()?;
        sync::lock(&self.entries)
            .iter()
            .find(|entry| entry.name() == name)
            .copied()
            .ok_or(KernelError::FileNotFound)
    }

    /// Number of entries currently in the directory.
    ///
    /// # Errors
    ///
    /// `IoError` when the backing cluster cannot be read.
    pub fn entry_count(&self) -> Result<usize> {
        let _dir = self.lock.lock();
        self.load()?;
        Ok(sync::lock(&self.entries).len())
    }

    /// Whether the directory holds no entries.
    ///
    /// # Errors
    ///
    /// `IoError` when the backing cluster cannot be read.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.entry_count()? == 0)
    }

    /// Create a child entry with one allocated cluster and size 0.
    ///
    /// The allocation is reverted to `FREE` if any follow-up write fails.
    ///
    /// # Errors
    ///
    /// `NotEnoughDiskSpace` when the directory or the volume is full,
    /// `InvalidArgument` for unusable names, `IoError` on write failure.
    pub fn create(&self, name: &str, attributes: FileAttributes) -> Result<DirEntryRaw> {
        let _dir = self.lock.lock();
        self.load()?;

        if sync::lock(&self.entries).len() >= MAX_DIR_ENTRIES {
            return Err(KernelError::NotEnoughDiskSpace);
        }

        // Validate the name before touching the allocation table.
        DirEntryRaw::new(name, attributes, 0)?;

        let allocated = self.volume.allocate(1)?;
        let entry = match DirEntryRaw::new(name, attributes, allocated[0]) {
            Ok(entry) => entry,
            Err(err) => {
                let _ = self.volume.free(&allocated);
                return Err(err);
            }
        };

        if self.volume.write_entries(&FatVolume::chain(&allocated)).is_err() {
            let _ = self.volume.free(&allocated);
            return Err(KernelError::IoError);
        }

        sync::lock(&self.entries).push(entry);
        if self.save().is_err() {
            sync::lock(&self.entries).pop();
            let _ = self.volume.free(&allocated);
            return Err(KernelError::IoError);
        }

        Ok(entry)
    }

    /// Find a child entry, creating it when absent.
    ///
    /// Lookup and creation happen under one hold of the directory lock, so
    /// two concurrent callers cannot both create the same name.
    ///
    /// # Errors
    ///
    /// As [`FatDirectory::create`].
    pub fn find_or_create(&self, name: &str, attributes: FileAttributes) -> Result<DirEntryRaw> {
        let _dir = self.lock.lock();
        match self.find(name) {
            Ok(entry) => Ok(entry),
            Err(KernelError::FileNotFound) => {
                self.create(name, attributes)?;
                self.find(name)
            }
            Err(err) => Err(err),
        }
    }

    /// Remove a child entry and free its allocation chain.
    ///
    /// The removed slot is filled with the last entry (swap-remove).
    ///
    /// # Errors
    ///
    /// `FileNotFound` for missing names, `IoError` on transfer failure.
    pub fn remove(&self, name: &str) -> Result<()> {
        let _dir = self.lock.lock();
        self.load()?;

        let position = sync::lock(&self.entries)
            .iter()
            .position(|entry| entry.name() == name)
            .ok_or(KernelError::FileNotFound)?;
        let entry = sync::lock(&self.entries)[position];

        let chain = self.volume.follow(entry.start)?;
        self.volume.free(&chain)?;

        sync::lock(&self.entries).swap_remove(position);
        self.save()
    }

    /// Pack directory records into `buf`, starting at byte `position`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when `buf` cannot hold a single record.
    pub fn read_records(&self, buf: &mut [u8], position: usize) -> Result<usize> {
        let _dir = self.lock.lock();
        self.load()?;

        let record_size = core::mem::size_of::<DirRecord>();
        if buf.len() < record_size {
            return Err(KernelError::InvalidArgument);
        }

        let entries = sync::lock(&self.entries);
        let mut written = 0;
        while written + record_size <= buf.len() {
            let index = (position + written) / record_size;
            let Some(entry) = entries.get(index) else {
                break;
            };
            let record = DirRecord::new(entry.name(), entry.file_attributes());
            buf[written..written + record_size].copy_from_slice(record.as_bytes());
            written += record_size;
        }
        Ok(written)
    }

    /// Report the byte size recorded for a child entry.
    ///
    /// # Errors
    ///
    /// `FileNotFound` for missing names.
    pub fn entry_size(&self, name: &str) -> Result<u32> {
        let _dir = self.lock.lock();
        self.load()?;
        sync::lock(&self.entries)
            .iter()
            .find(|entry| entry.name() == name)
            .map(|entry| entry.size)
            .ok_or(KernelError::FileNotFound)
    }

    /// Update the byte size recorded for a child entry and persist.
    ///
    /// # Errors
    ///
    /// `FileNotFound` for missing names, `IoError` on write failure.
    pub fn change_entry_size(&self, name: &str, size: u32) -> Result<()> {
        let _dir = self.lock.lock();
        self.load()?;

        let mut entries = sync::lock(&self.entries);
        let entry = entries
            .iter_mut()
            .find(|entry| entry.name() == name)
            .ok_or(KernelError::FileNotFound)?;
        entry.size = size;
        drop(entries);

        self.save()
    }

    /// Wrap a child entry in its backend object.
    ///
    /// # Errors
    ///
    /// `IoError` when a data file's chain cannot be walked.
    pub fn make_file(&self, entry: DirEntryRaw) -> Result<Arc<dyn File>> {
        let parents = self.chain_to_self();
        if entry.is_directory() {
            Ok(Self::subdirectory(Arc::clone(&self.volume), entry, parents))
        } else {
            Ok(FatFile::open(Arc::clone(&self.volume), entry, parents)?)
        }
    }

    fn byte_size(&self) -> Result<usize> {
        Ok(self.entry_count()? * DIR_ENTRY_SIZE)
    }
}

impl File for FatDirectory {
    fn attributes(&self) -> FileAttributes {
        match &self.location {
            DirLocation::Root => FileAttributes::DIRECTORY,
            DirLocation::Sub { entry, .. } => entry.file_attributes(),
        }
    }

    fn size(&self) -> usize {
        self.byte_size().unwrap_or(0)
    }

    fn read(&self, buf: &mut [u8], position: usize) -> Result<usize> {
        self.read_records(buf, position)
    }

    fn write(&self, _buf: &[u8], _position: usize) -> Result<usize> {
        Err(KernelError::PermissionDenied)
    }

    fn close(&self, _caps: Capabilities) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_layout() {
        assert_eq!(DIR_ENTRY_SIZE, 24);
    }

    #[test]
    fn test_entry_name_roundtrip() {
        let entry = DirEntryRaw::new("b.txt", FileAttributes::empty(), 7).unwrap();
        assert_eq!(entry.name(), "b.txt");
        assert_eq!(entry.start, 7);
        assert_eq!(entry.size, 0);
        assert!(!entry.is_directory());
    }

    #[test]
    fn test_entry_name_limits() {
        assert!(DirEntryRaw::new("", FileAttributes::empty(), 0).is_err());
        assert!(DirEntryRaw::new("exactly11ch", FileAttributes::empty(), 0).is_ok());
        assert!(DirEntryRaw::new("twelve-chars", FileAttributes::empty(), 0).is_err());
    }

    #[test]
    fn test_directory_attribute_bit() {
        let entry = DirEntryRaw::new("d", FileAttributes::DIRECTORY, 0).unwrap();
        assert!(entry.is_directory());
    }
}
