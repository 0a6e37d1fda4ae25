// kernel/src/hal/ram_disk.rs
//! Memory-backed block device

use std::sync::Mutex;

use vesta_os_abi::Result;

use super::{check_transfer, BlockDevice, DriveParameters};
use crate::sync;

/// A [`BlockDevice`] stored entirely in memory.
///
/// Used as the default backing store and as the test disk. Contents are
/// zero-initialized, which reads back as an unformatted volume.
pub struct RamDisk {
    parameters: DriveParameters,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    /// Create a zero-filled disk with the given geometry.
    #[must_use]
    pub fn new(bytes_per_sector: usize, total_sectors: usize) -> Self {
        let parameters = DriveParameters {
            bytes_per_sector,
            total_sectors,
        };
        Self {
            parameters,
            data: Mutex::new(vec![0; parameters.capacity()]),
        }
    }
}

impl BlockDevice for RamDisk {
    fn parameters(&self) -> DriveParameters {
        self.parameters
    }

    fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<()> {
        let (offset, len) = check_transfer(&self.parameters, lba, buf.len())?;
        let data = sync::lock(&self.data);
        buf.copy_from_slice(&data[offset..offset + len]);
        Ok(())
    }

    fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<()> {
        let (offset, len) = check_transfer(&self.parameters, lba, buf.len())?;
        let mut data = sync::lock(&self.data);
        data[offset..offset + len].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesta_os_abi::KernelError;

    #[test]
    fn test_roundtrip_single_sector() {
        let disk = RamDisk::new(512, 16);
        let pattern: Vec<u8> = (0..512).map(|i| (i % 251) as u8).collect();

        disk.write_sectors(3, &pattern).unwrap();
        let mut back = vec![0u8; 512];
        disk.read_sectors(3, &mut back).unwrap();
        assert_eq!(back, pattern);
    }

    #[test]
    fn test_rejects_partial_sector() {
        let disk = RamDisk::new(512, 16);
        let mut buf = vec![0u8; 100];
        assert_eq!(disk.read_sectors(0, &mut buf), Err(KernelError::IoError));
    }

    #[test]
    fn test_rejects_out_of_range() {
        let disk = RamDisk::new(512, 4);
        let buf = vec![0u8; 1024];
        assert_eq!(disk.write_sectors(3, &buf), Err(KernelError::IoError));
    }
}
