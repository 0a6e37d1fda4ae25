// kernel/src/fs/fat/table.rs
//! Allocation table and cluster I/O
//!
//! [`FatVolume`] owns the mounted volume's superblock and disk adapter and
//! is shared by every file and directory object of the mount. It provides
//! cluster-granular I/O, the allocation-table operations (allocate, chain,
//! follow, free) and parent-directory reopening.
//!
//! All batched table writes group entries by their containing cluster so
//! each touched cluster is read, patched and written exactly once. Writers
//! reserve entries (`FREE -> RESERVED`) before linking them, and revert them
//! to `FREE` when a follow-up write fails.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use vesta_os_abi::{KernelError, Result};

use crate::hal::DiskAdapter;
use crate::sync;

use super::directory::{DirEntryRaw, FatDirectory};
use super::superblock::Superblock;

/// Index of one allocation-table entry.
pub type FatIndex = u32;

/// Size of one allocation-table entry on disk.
pub const FAT_ENTRY_SIZE: usize = core::mem::size_of::<FatIndex>();

/// Entry is unallocated.
pub const FAT_FREE: FatIndex = -2i32 as FatIndex;
/// Entry is claimed by an in-flight allocation.
pub const FAT_RESERVED: FatIndex = -3i32 as FatIndex;
/// Entry terminates a chain.
pub const FAT_EOF: FatIndex = -4i32 as FatIndex;

/// Shared per-mount volume state.
pub struct FatVolume {
    adapter: Arc<DiskAdapter>,
    superblock: Superblock,
    /// Scanning for free entries and reserving them must be atomic against
    /// other allocators; batched writes alone only serialize per cluster.
    alloc_lock: Mutex<()>,
    root: Mutex<Option<Arc<FatDirectory>>>,
}

impl FatVolume {
    /// Create the volume state for a mounted superblock.
    #[must_use]
    pub fn new(adapter: Arc<DiskAdapter>, superblock: Superblock) -> Self {
        Self {
            adapter,
            superblock,
            alloc_lock: Mutex::new(()),
            root: Mutex::new(None),
        }
    }

    /// The mounted superblock.
    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    /// Bytes per cluster.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        self.superblock.cluster_size()
    }

    /// Install the root directory object after mount.
    pub fn set_root(&self, root: Arc<FatDirectory>) {
        *sync::lock(&self.root) = Some(root);
    }

    /// The root directory object.
    ///
    /// # Errors
    ///
    /// `Unknown` before [`FatVolume::set_root`] ran; that would be a mount
    /// sequencing bug.
    pub fn root(&self) -> Result<Arc<FatDirectory>> {
        sync::lock(&self.root).clone().ok_or(KernelError::Unknown)
    }

    /// Read `count` clusters starting at the absolute cluster index.
    ///
    /// # Errors
    ///
    /// `IoError` when the device rejects the transfer.
    pub fn read_clusters(&self, buf: &mut [u8], first_cluster: u64, count: u64) -> Result<()> {
        let spc = self.superblock.sectors_per_cluster;
        debug_assert_eq!(buf.len() as u64, count * spc * self.superblock.bytes_per_sector);
        self.adapter.read_sectors(first_cluster * spc, buf)
    }

    /// Write `count` clusters starting at the absolute cluster index.
    ///
    /// # Errors
    ///
    /// `IoError` when the device rejects the transfer.
    pub fn write_clusters(&self, buf: &[u8], first_cluster: u64, count: u64) -> Result<()> {
        let spc = self.superblock.sectors_per_cluster;
        debug_assert_eq!(buf.len() as u64, count * spc * self.superblock.bytes_per_sector);
        self.adapter.write_sectors(first_cluster * spc, buf)
    }

    /// Read the data cluster backing one allocation-table entry.
    ///
    /// # Errors
    ///
    /// `IoError` when the device rejects the transfer.
    pub fn read_data_cluster(&self, buf: &mut [u8], entry: FatIndex) -> Result<()> {
        self.read_clusters(buf, self.superblock.data_first_cluster + u64::from(entry), 1)
    }

    /// Write the data cluster backing one allocation-table entry.
    ///
    /// # Errors
    ///
    /// `IoError` when the device rejects the transfer.
    pub fn write_data_cluster(&self, buf: &[u8], entry: FatIndex) -> Result<()> {
        self.write_clusters(buf, self.superblock.data_first_cluster + u64::from(entry), 1)
    }

    /// Claim `count` free entries, marking them `RESERVED` as one batch.
    ///
    /// No partial allocation is ever visible on disk.
    ///
    /// # Errors
    ///
    /// `NotEnoughDiskSpace` when fewer than `count` free entries exist;
    /// `IoError` on transfer failure.
    pub fn allocate(&self, count: usize) -> Result<Vec<FatIndex>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let _alloc = sync::lock(&self.alloc_lock);

        let cluster_size = self.cluster_size();
        let per_cluster = self.superblock.entries_per_cluster();
        let mut buf = vec![0u8; cluster_size];
        let mut next_cluster = self.superblock.fat_first_cluster;

        let mut found = Vec::with_capacity(count);
        for index in 0..self.superblock.fat_entries {
            if index as usize % per_cluster == 0 {
                self.read_clusters(&mut buf, next_cluster, 1)?;
                next_cluster += 1;
            }
            let offset = (index as usize % per_cluster) * FAT_ENTRY_SIZE;
            let value = FatIndex::from_le_bytes(
                buf[offset..offset + FAT_ENTRY_SIZE].try_into().unwrap(),
            );
            if value == FAT_FREE {
                found.push(index as FatIndex);
                if found.len() == count {
                    self.set_entries(&found, FAT_RESERVED)?;
                    return Ok(found);
                }
            }
        }

        Err(KernelError::NotEnoughDiskSpace)
    }

    /// Write a batch of `entry -> value` pairs, touching each allocation
    /// table cluster once.
    ///
    /// # Errors
    ///
    /// `IoError` on transfer failure; already-written clusters stay written.
    pub fn write_entries(&self, entries: &BTreeMap<FatIndex, FatIndex>) -> Result<()> {
        let cluster_size = self.cluster_size();
        let per_cluster = self.superblock.entries_per_cluster();
        let mut buf = vec![0u8; cluster_size];
        let mut loaded: Option<u64> = None;

        for (&index, &value) in entries {
            let needed = u64::from(index) / per_cluster as u64 + self.superblock.fat_first_cluster;
            if loaded != Some(needed) {
                if let Some(current) = loaded {
                    self.write_clusters(&buf, current, 1)?;
                }
                self.read_clusters(&mut buf, needed, 1)?;
                loaded = Some(needed);
            }
            let offset = (index as usize % per_cluster) * FAT_ENTRY_SIZE;
            buf[offset..offset + FAT_ENTRY_SIZE].copy_from_slice(&value.to_le_bytes());
        }

        if let Some(current) = loaded {
            self.write_clusters(&buf, current, 1)?;
        }
        Ok(())
    }

    /// Set every listed entry to `value` in one batch.
    ///
    /// # Errors
    ///
    /// `IoError` on transfer failure.
    pub fn set_entries(&self, entries: &[FatIndex], value: FatIndex) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let map: BTreeMap<FatIndex, FatIndex> =
            entries.iter().map(|&entry| (entry, value)).collect();
        self.write_entries(&map)
    }

    /// Revert entries to `FREE` (allocation rollback, file deletion).
    ///
    /// # Errors
    ///
    /// `IoError` on transfer failure.
    pub fn free(&self, entries: &[FatIndex]) -> Result<()> {
        self.set_entries(entries, FAT_FREE)
    }

    /// Link a sequence of entries into a chain terminated by `EOF`.
    #[must_use]
    pub fn chain(entries: &[FatIndex]) -> BTreeMap<FatIndex, FatIndex> {
        let mut map = BTreeMap::new();
        if let Some((&last, rest)) = entries.split_last() {
            for pair in rest.iter().zip(entries.iter().skip(1)) {
                map.insert(*pair.0, *pair.1);
            }
            map.insert(last, FAT_EOF);
        }
        map
    }

    /// Walk a chain from `head` to `EOF`, returning every entry in order.
    ///
    /// # Errors
    ///
    /// `IoError` on transfer failure, on a dangling link (`FREE`/`RESERVED`
    /// inside a chain) or when the walk exceeds the table size (a cycle).
    pub fn follow(&self, head: FatIndex) -> Result<Vec<FatIndex>> {
        let cluster_size = self.cluster_size();
        let per_cluster = self.superblock.entries_per_cluster();
        let mut buf = vec![0u8; cluster_size];
        let mut loaded: Option<u64> = None;

        let mut entries = Vec::new();
        let mut value = head;
        while value != FAT_EOF {
            if value == FAT_FREE || value == FAT_RESERVED
                || u64::from(value) >= self.superblock.fat_entries
                || entries.len() as u64 >= self.superblock.fat_entries
            {
                return Err(KernelError::IoError);
            }
            entries.push(value);

            let needed = u64::from(value) / per_cluster as u64 + self.superblock.fat_first_cluster;
            if loaded != Some(needed) {
                self.read_clusters(&mut buf, needed, 1)?;
                loaded = Some(needed);
            }
            let offset = (value as usize % per_cluster) * FAT_ENTRY_SIZE;
            value = FatIndex::from_le_bytes(
                buf[offset..offset + FAT_ENTRY_SIZE].try_into().unwrap(),
            );
        }

        Ok(entries)
    }

    /// Reopen the directory named by a chain of directory entries from the
    /// root; an empty chain is the root itself.
    ///
    /// Directories refer to their parents by this chain rather than by
    /// object pointers, so a subdirectory opened in isolation re-opens its
    /// ancestors on demand.
    ///
    /// # Errors
    ///
    /// `Unknown` when the root is not installed yet.
    pub fn load_directory(
        self: &Arc<Self>,
        chain: &[DirEntryRaw],
    ) -> Result<Arc<FatDirectory>> {
        match chain.split_last() {
            None => self.root(),
            Some((entry, parents)) => Ok(FatDirectory::subdirectory(
                Arc::clone(self),
                *entry,
                parents.to_vec(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::{DriveParameters, RamDisk};

    fn test_volume() -> Arc<FatVolume> {
        let params = DriveParameters {
            bytes_per_sector: 512,
            total_sectors: 2048,
        };
        let adapter = Arc::new(DiskAdapter::new(Arc::new(RamDisk::new(
            params.bytes_per_sector,
            params.total_sectors,
        ))));
        let sb = Superblock::format(params);
        let volume = Arc::new(FatVolume::new(adapter, sb));

        // Blank table: every entry free.
        let all: Vec<FatIndex> = (0..volume.superblock().fat_entries as FatIndex).collect();
        volume.free(&all).unwrap();
        volume
    }

    #[test]
    fn test_allocate_reserves_entries() {
        let volume = test_volume();
        let first = volume.allocate(3).unwrap();
        assert_eq!(first, vec![0, 1, 2]);

        // Reserved entries are not handed out twice.
        let second = volume.allocate(2).unwrap();
        assert_eq!(second, vec![3, 4]);
    }

    #[test]
    fn test_allocate_all_then_fail() {
        let volume = test_volume();
        let total = volume.superblock().fat_entries as usize;
        volume.allocate(total).unwrap();
        assert_eq!(volume.allocate(1), Err(KernelError::NotEnoughDiskSpace));
    }

    #[test]
    fn test_chain_follow_roundtrip() {
        let volume = test_volume();
        let entries = volume.allocate(5).unwrap();
        volume.write_entries(&FatVolume::chain(&entries)).unwrap();

        let walked = volume.follow(entries[0]).unwrap();
        assert_eq!(walked, entries);
    }

    #[test]
    fn test_free_returns_entries_to_pool() {
        let volume = test_volume();
        let entries = volume.allocate(4).unwrap();
        volume.free(&entries).unwrap();

        let again = volume.allocate(4).unwrap();
        assert_eq!(again, entries);
    }

    #[test]
    fn test_follow_detects_dangling_chain() {
        let volume = test_volume();
        let entries = volume.allocate(2).unwrap();
        // Chain ends in a FREE entry instead of EOF.
        let mut map = BTreeMap::new();
        map.insert(entries[0], entries[1]);
        map.insert(entries[1], FAT_FREE);
        volume.write_entries(&map).unwrap();

        assert_eq!(volume.follow(entries[0]), Err(KernelError::IoError));
    }

    #[test]
    fn test_sentinels_are_distinct() {
        assert_eq!(FAT_FREE, 0xFFFF_FFFE);
        assert_eq!(FAT_RESERVED, 0xFFFF_FFFD);
        assert_eq!(FAT_EOF, 0xFFFF_FFFC);
    }
}
