// kernel/src/fs/fat/mod.rs
//! FAT-style filesystem driver
//!
//! The only disk-backed filesystem. Mounting reads sector 0 and formats the
//! volume when the tag is missing. All pathwork descends from the root
//! directory through intermediate directory loads; object identity for
//! user-visible opens is provided one layer up by the VFS open-file table.

pub mod directory;
pub mod file;
pub mod superblock;
pub mod table;

pub use directory::{DirEntryRaw, FatDirectory, DIR_ENTRY_SIZE};
pub use file::FatFile;
pub use superblock::{Superblock, SUPERBLOCK_SIZE};
pub use table::{FatIndex, FatVolume, FAT_EOF, FAT_FREE, FAT_RESERVED};

use std::sync::Arc;

use vesta_os_abi::{FileAttributes, KernelError, Result};

use crate::hal::DiskAdapter;
use crate::vfs::file::File;
use crate::vfs::mount::{FileSystem, MountedFilesystem};
use crate::vfs::path::Path;

use table::FAT_ENTRY_SIZE;

/// Driver name used when registering and mounting.
pub const FAT_NAME: &str = "fat";

/// The registered FAT driver.
#[derive(Default)]
pub struct FatFilesystem;

impl FatFilesystem {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for FatFilesystem {
    fn name(&self) -> &str {
        FAT_NAME
    }

    fn create_mount(
        &self,
        label: &str,
        device: Option<Arc<DiskAdapter>>,
    ) -> Result<Arc<dyn MountedFilesystem>> {
        let device = device.ok_or(KernelError::InvalidArgument)?;
        Ok(Arc::new(FatMount::new(label, device)?))
    }
}

/// One mounted FAT volume.
pub struct FatMount {
    label: String,
    volume: Arc<FatVolume>,
    /// Keeps the root object (and through it the load path) alive for the
    /// mount's lifetime.
    root: Arc<FatDirectory>,
}

impl FatMount {
    /// Bring up the volume, formatting it when sector 0 carries no tag.
    ///
    /// # Errors
    ///
    /// `IoError` when the device cannot be read or the format written.
    pub fn new(label: &str, adapter: Arc<DiskAdapter>) -> Result<Self> {
        let params = adapter.parameters();
        if params.bytes_per_sector < SUPERBLOCK_SIZE {
            return Err(KernelError::IoError);
        }

        let mut sector = vec![0u8; params.bytes_per_sector];
        adapter.read_sectors(0, &mut sector)?;
        let mut superblock = Superblock::parse(&sector)?;

        let needs_format = !superblock.is_formatted();
        if needs_format {
            superblock = Superblock::format(params);
        }

        let volume = Arc::new(FatVolume::new(adapter, superblock));
        if needs_format {
            Self::write_format(&volume, &mut sector)?;
            log::info!(
                "fat: formatted volume '{}' ({} entries, root cluster {})",
                label,
                superblock.fat_entries,
                superblock.root_cluster
            );
        }

        let root = FatDirectory::root(Arc::clone(&volume));
        volume.set_root(Arc::clone(&root));
        log::debug!("fat: mounted '{label}'");

        Ok(Self {
            label: label.to_string(),
            volume,
            root,
        })
    }

    /// Persist a fresh layout: superblock, all-free table, empty root.
    fn write_format(volume: &Arc<FatVolume>, sector: &mut [u8]) -> Result<()> {
        let sb = *volume.superblock();

        sector.fill(0);
        sector[..SUPERBLOCK_SIZE].copy_from_slice(zerocopy::IntoBytes::as_bytes(&sb));
        volume.write_clusters(sector, 0, 1)?;

        let mut cluster = vec![0u8; sb.cluster_size()];
        for chunk in cluster.chunks_exact_mut(FAT_ENTRY_SIZE) {
            chunk.copy_from_slice(&FAT_FREE.to_le_bytes());
        }
        let fat_clusters = sb.fat_clusters();
        for index in 0..fat_clusters {
            volume.write_clusters(&cluster, sb.fat_first_cluster + index, 1)?;
        }

        cluster.fill(0);
        volume.write_clusters(&cluster, sb.root_cluster, 1)
    }

    /// The shared volume state.
    #[must_use]
    pub fn volume(&self) -> &Arc<FatVolume> {
        &self.volume
    }

    /// Descend `components` from the root, returning the final directory.
    fn open_directory(&self, components: &[String]) -> Result<Arc<FatDirectory>> {
        let mut chain: Vec<DirEntryRaw> = Vec::new();
        for name in components {
            let dir = self.volume.load_directory(&chain)?;
            let entry = dir.find(name)?;
            if !entry.is_directory() {
                return Err(KernelError::FileNotFound);
            }
            chain.push(entry);
        }
        self.volume.load_directory(&chain)
    }
}

impl MountedFilesystem for FatMount {
    fn label(&self) -> &str {
        &self.label
    }

    fn open_file(&self, path: &Path, _attributes: FileAttributes) -> Result<Arc<dyn File>> {
        if path.is_root() {
            return Ok(Arc::clone(&self.root) as Arc<dyn File>);
        }

        let dir = self.open_directory(path.components())?;
        let entry = dir.find(path.file_name())?;
        dir.make_file(entry)
    }

    fn create_file(&self, path: &Path, attributes: FileAttributes) -> Result<Arc<dyn File>> {
        if path.file_name().is_empty() {
            return Err(KernelError::FileNotFound);
        }

        // Materialize missing intermediate directories.
        let mut chain: Vec<DirEntryRaw> = Vec::new();
        for name in path.components() {
            let dir = self.volume.load_directory(&chain)?;
            let entry = dir.find_or_create(name, FileAttributes::DIRECTORY)?;
            if !entry.is_directory() {
                return Err(KernelError::FileNotFound);
            }
            chain.push(entry);
        }

        let dir = self.volume.load_directory(&chain)?;
        if dir.find(path.file_name()).is_ok() {
            self.delete_file(path)?;
        }

        let entry = dir.create(path.file_name(), attributes)?;
        dir.make_file(entry)
    }

    fn delete_file(&self, path: &Path) -> Result<()> {
        if path.is_root() {
            return Err(KernelError::PermissionDenied);
        }

        let parent = self.open_directory(path.components())?;
        let entry = parent.find(path.file_name())?;

        if entry.is_directory() {
            let mut chain = parent.chain_to_self();
            chain.push(entry);
            let sub = self.volume.load_directory(&chain)?;
            if !sub.is_empty()? {
                return Err(KernelError::DirectoryNotEmpty);
            }
        }

        parent.remove(path.file_name())
    }
}

/// Format a RAM-backed volume for driver-level tests.
#[cfg(test)]
pub(crate) fn mount_volume_for_tests(
    bytes_per_sector: usize,
    total_sectors: usize,
) -> Arc<FatVolume> {
    use crate::hal::RamDisk;

    let adapter = Arc::new(DiskAdapter::new(Arc::new(RamDisk::new(
        bytes_per_sector,
        total_sectors,
    ))));
    let mount = FatMount::new("T", adapter).expect("format failed");
    let volume = Arc::clone(mount.volume());
    // Keep the root object alive for the duration of the test process.
    std::mem::forget(mount);
    volume
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::RamDisk;

    fn mount_4mib() -> FatMount {
        let adapter = Arc::new(DiskAdapter::new(Arc::new(RamDisk::new(512, 8192))));
        FatMount::new("C", adapter).unwrap()
    }

    fn path(raw: &str) -> Path {
        Path::normalize(raw, None).unwrap()
    }

    #[test]
    fn test_mount_formats_blank_disk() {
        let mount = mount_4mib();
        let sb = *mount.volume().superblock();
        assert!(sb.is_formatted());

        // Root starts empty.
        let root = mount.volume().root().unwrap();
        assert!(root.is_empty().unwrap());
    }

    #[test]
    fn test_remount_preserves_content() {
        let adapter = Arc::new(DiskAdapter::new(Arc::new(RamDisk::new(512, 8192))));
        {
            let mount = FatMount::new("C", Arc::clone(&adapter)).unwrap();
            let file = mount
                .create_file(&path("C:\\keep.txt"), FileAttributes::empty())
                .unwrap();
            file.write(b"persist me", 0).unwrap();
        }

        let mount = FatMount::new("C", adapter).unwrap();
        let file = mount
            .open_file(&path("C:\\keep.txt"), FileAttributes::READ_ONLY)
            .unwrap();
        let mut buf = vec![0u8; 32];
        let n = file.read(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"persist me");
    }

    #[test]
    fn test_create_materializes_intermediates() {
        let mount = mount_4mib();
        mount
            .create_file(&path("C:\\a\\b\\c.txt"), FileAttributes::empty())
            .unwrap();

        let dir = mount
            .open_file(&path("C:\\a\\b"), FileAttributes::DIRECTORY)
            .unwrap();
        assert!(dir.attributes().contains(FileAttributes::DIRECTORY));

        let file = mount
            .open_file(&path("C:\\a\\b\\c.txt"), FileAttributes::empty())
            .unwrap();
        assert_eq!(file.size(), 0);
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let mount = mount_4mib();
        assert!(matches!(
            mount
                .open_file(&path("C:\\nothing"), FileAttributes::empty())
                .err(),
            Some(KernelError::FileNotFound)
        ));
    }

    #[test]
    fn test_create_overwrites_existing() {
        let mount = mount_4mib();
        let file = mount
            .create_file(&path("C:\\x"), FileAttributes::empty())
            .unwrap();
        file.write(b"old content", 0).unwrap();

        let fresh = mount
            .create_file(&path("C:\\x"), FileAttributes::empty())
            .unwrap();
        assert_eq!(fresh.size(), 0);
    }

    #[test]
    fn test_delete_requires_empty_directory() {
        let mount = mount_4mib();
        mount
            .create_file(&path("C:\\d\\inner.txt"), FileAttributes::empty())
            .unwrap();

        assert_eq!(
            mount.delete_file(&path("C:\\d")),
            Err(KernelError::DirectoryNotEmpty)
        );

        mount.delete_file(&path("C:\\d\\inner.txt")).unwrap();
        mount.delete_file(&path("C:\\d")).unwrap();
        assert!(mount
            .open_file(&path("C:\\d"), FileAttributes::empty())
            .is_err());
    }

    #[test]
    fn test_directory_capacity_enforced() {
        let mount = mount_4mib();
        for index in 0..vesta_os_abi::MAX_DIR_ENTRIES {
            mount
                .create_file(&path(&format!("C:\\d\\f{index}")), FileAttributes::empty())
                .unwrap();
        }

        assert_eq!(
            mount
                .create_file(&path("C:\\d\\f21"), FileAttributes::empty())
                .err(),
            Some(KernelError::NotEnoughDiskSpace)
        );

        // Freeing one slot makes room again.
        mount.delete_file(&path("C:\\d\\f10")).unwrap();
        mount
            .create_file(&path("C:\\d\\f21"), FileAttributes::empty())
            .unwrap();
    }
}
