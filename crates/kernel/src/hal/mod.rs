// kernel/src/hal/mod.rs
//! Hardware abstraction layer
//!
//! Storage is a sector-addressed [`BlockDevice`]; the console is a byte
//! stream. The [`DiskAdapter`] is the only component that speaks sectors:
//! it serializes every transfer under a disk-wide lock so that concurrent
//! filesystem calls cannot interleave at the device boundary. Everything
//! above it addresses storage in clusters.

pub mod console;
pub mod ram_disk;

pub use console::{Console, HostConsole};
pub use ram_disk::RamDisk;

use std::sync::{Arc, Mutex};

use vesta_os_abi::{KernelError, Result};

use crate::sync;

/// Geometry of a drive as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveParameters {
    /// Bytes per sector.
    pub bytes_per_sector: usize,
    /// Total number of addressable sectors.
    pub total_sectors: usize,
}

impl DriveParameters {
    /// Total capacity of the drive in bytes.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.bytes_per_sector * self.total_sectors
    }
}

/// A sector-addressed storage device.
///
/// Implementations report success or failure per transfer; the adapter above
/// maps failures onto [`KernelError::IoError`].
pub trait BlockDevice: Send + Sync {
    /// Drive geometry.
    fn parameters(&self) -> DriveParameters;

    /// Read `buf.len() / bytes_per_sector` sectors starting at `lba`.
    ///
    /// # Errors
    ///
    /// `IoError` when the range is out of bounds or the buffer length is not
    /// a whole number of sectors.
    fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `buf.len() / bytes_per_sector` sectors starting at `lba`.
    ///
    /// # Errors
    ///
    /// `IoError` under the same conditions as [`BlockDevice::read_sectors`].
    fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<()>;
}

/// Serializes all access to one [`BlockDevice`].
pub struct DiskAdapter {
    device: Arc<dyn BlockDevice>,
    parameters: DriveParameters,
    io_lock: Mutex<()>,
}

impl DiskAdapter {
    /// Wrap a device behind the disk-wide lock.
    #[must_use]
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let parameters = device.parameters();
        Self {
            device,
            parameters,
            io_lock: Mutex::new(()),
        }
    }

    /// Cached drive geometry.
    #[must_use]
    pub fn parameters(&self) -> DriveParameters {
        self.parameters
    }

    /// Read whole sectors under the device lock.
    ///
    /// # Errors
    ///
    /// `IoError` when the device rejects the transfer.
    pub fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let _io = sync::lock(&self.io_lock);
        self.device.read_sectors(lba, buf)
    }

    /// Write whole sectors under the device lock.
    ///
    /// # Errors
    ///
    /// `IoError` when the device rejects the transfer.
    pub fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<()> {
        let _io = sync::lock(&self.io_lock);
        self.device.write_sectors(lba, buf)
    }
}

pub(crate) fn check_transfer(
    params: &DriveParameters,
    lba: u64,
    len: usize,
) -> Result<(usize, usize)> {
    if len == 0 || len % params.bytes_per_sector != 0 {
        return Err(KernelError::IoError);
    }
    let count = len / params.bytes_per_sector;
    let first = usize::try_from(lba).map_err(|_| KernelError::IoError)?;
    if first + count > params.total_sectors {
        return Err(KernelError::IoError);
    }
    Ok((first * params.bytes_per_sector, len))
}
