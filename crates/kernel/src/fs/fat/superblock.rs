// kernel/src/fs/fat/superblock.rs
//! On-disk superblock and volume layout computation
//!
//! Sector 0 carries the superblock. Cluster addressing after it:
//!
//! ```text
//! cluster 0                      superblock
//! clusters 1..=fat_clusters      allocation table (u32 entries)
//! cluster root_cluster           root directory (u32 size || entries)
//! clusters data_first_cluster..  file data, one cluster per chain link
//! ```

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use vesta_os_abi::{KernelError, Result};

use crate::hal::DriveParameters;

use super::directory::DIR_ENTRY_SIZE;
use super::table::FAT_ENTRY_SIZE;

/// Tag identifying a formatted volume, NUL-padded.
pub const VOLUME_TAG: [u8; 8] = *b"fat\0\0\0\0\0";

/// Superblock record stored at the start of sector 0, little-endian.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[derive(FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct Superblock {
    /// Filesystem tag; [`VOLUME_TAG`] on a formatted volume.
    pub tag: [u8; 8],
    /// Cached drive geometry: bytes per sector.
    pub bytes_per_sector: u64,
    /// Cached drive geometry: total sector count.
    pub total_sectors: u64,
    /// Sectors per cluster.
    pub sectors_per_cluster: u64,
    /// First cluster of the allocation table.
    pub fat_first_cluster: u64,
    /// Number of allocation-table entries.
    pub fat_entries: u64,
    /// Cluster holding the root directory.
    pub root_cluster: u64,
    /// First cluster of the data region.
    pub data_first_cluster: u64,
}

/// Size of the serialized superblock.
pub const SUPERBLOCK_SIZE: usize = core::mem::size_of::<Superblock>();

impl Superblock {
    /// Parse the superblock from the first sector.
    ///
    /// # Errors
    ///
    /// `IoError` when the sector is shorter than the record.
    pub fn parse(sector: &[u8]) -> Result<Self> {
        let bytes = sector
            .get(..SUPERBLOCK_SIZE)
            .ok_or(KernelError::IoError)?;
        Self::read_from_bytes(bytes).map_err(|_| KernelError::IoError)
    }

    /// Whether the tag marks a formatted volume.
    #[must_use]
    pub fn is_formatted(&self) -> bool {
        self.tag == VOLUME_TAG
    }

    /// Bytes per cluster.
    #[must_use]
    pub fn cluster_size(&self) -> usize {
        (self.sectors_per_cluster * self.bytes_per_sector) as usize
    }

    /// Allocation-table entries per cluster.
    #[must_use]
    pub fn entries_per_cluster(&self) -> usize {
        self.cluster_size() / FAT_ENTRY_SIZE
    }

    /// Number of clusters occupied by the allocation table.
    #[must_use]
    pub fn fat_clusters(&self) -> u64 {
        self.root_cluster - self.fat_first_cluster
    }

    /// Compute the layout for a fresh volume.
    ///
    /// One sector per cluster; two clusters are reserved for the superblock
    /// and the root directory, the rest is split between the allocation
    /// table and the data region. The entry count is aligned down so the
    /// table fills whole clusters.
    #[must_use]
    pub fn format(params: DriveParameters) -> Self {
        let sectors_per_cluster: u64 = 1;
        let cluster_size = sectors_per_cluster as usize * params.bytes_per_sector;
        let disk_bytes = params.capacity();

        let available = disk_bytes - 2 * cluster_size;
        let mut fat_entries = available / (DIR_ENTRY_SIZE + cluster_size);
        fat_entries -= ((fat_entries * FAT_ENTRY_SIZE) % cluster_size) / FAT_ENTRY_SIZE;
        let fat_clusters = (fat_entries * FAT_ENTRY_SIZE) / cluster_size;

        let root_cluster = 1 + fat_clusters as u64;
        Self {
            tag: VOLUME_TAG,
            bytes_per_sector: params.bytes_per_sector as u64,
            total_sectors: params.total_sectors as u64,
            sectors_per_cluster,
            fat_first_cluster: 1,
            fat_entries: fat_entries as u64,
            root_cluster,
            data_first_cluster: root_cluster + 1,
        }
    }
}
