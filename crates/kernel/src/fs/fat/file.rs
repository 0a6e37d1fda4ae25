// kernel/src/fs/fat/file.rs
//! Data files on a mounted volume
//!
//! A [`FatFile`] materializes its allocation chain when opened and keeps it
//! together with the cached byte size. Writes extend the chain on demand
//! (reserve, link, roll back on failure) and propagate size growth to the
//! parent directory's entry.

use std::sync::{Arc, Mutex};

use vesta_os_abi::{FileAttributes, KernelError, Result};

use crate::sync::{self, ReentrantMutex};
use crate::vfs::descriptor::Capabilities;
use crate::vfs::file::File;

use super::directory::DirEntryRaw;
use super::table::{FatIndex, FatVolume};

struct FileState {
    size: usize,
    chain: Vec<FatIndex>,
}

/// A regular file object of a mounted volume.
pub struct FatFile {
    volume: Arc<FatVolume>,
    name: String,
    attributes: FileAttributes,
    /// Ancestors below the root, outermost first.
    parents: Vec<DirEntryRaw>,
    lock: ReentrantMutex,
    state: Mutex<FileState>,
}

impl FatFile {
    /// Open a file from its directory entry, walking its chain.
    ///
    /// # Errors
    ///
    /// `IoError` when the chain is unreadable or inconsistent.
    pub fn open(
        volume: Arc<FatVolume>,
        entry: DirEntryRaw,
        parents: Vec<DirEntryRaw>,
    ) -> Result<Arc<Self>> {
        let chain = volume.follow(entry.start)?;
        Ok(Arc::new(Self {
            name: entry.name().to_string(),
            attributes: entry.file_attributes(),
            parents,
            lock: ReentrantMutex::new(),
            state: Mutex::new(FileState {
                size: entry.size as usize,
                chain,
            }),
            volume,
        }))
    }

    fn snapshot(&self) -> (usize, Vec<FatIndex>) {
        let state = sync::lock(&self.state);
        (state.size, state.chain.clone())
    }

    fn store_size(&self, size: usize) -> Result<()> {
        sync::lock(&self.state).size = size;
        let parent = self.volume.load_directory(&self.parents)?;
        parent.change_entry_size(&self.name, size as u32)
    }

    /// Extend the chain to `needed` clusters, rolling back on failure.
    fn grow_chain(&self, needed: usize) -> Result<()> {
        let (_, chain) = self.snapshot();
        if chain.len() >= needed {
            return Ok(());
        }

        let fresh = self.volume.allocate(needed - chain.len())?;
        let mut extended = chain;
        extended.extend_from_slice(&fresh);

        if self
            .volume
            .write_entries(&FatVolume::chain(&extended))
            .is_err()
        {
            let _ = self.volume.free(&fresh);
            return Err(KernelError::IoError);
        }

        sync::lock(&self.state).chain = extended;
        Ok(())
    }
}

impl File for FatFile {
    fn attributes(&self) -> FileAttributes {
        self.attributes
    }

    fn size(&self) -> usize {
        sync::lock(&self.state).size
    }

    fn read(&self, buf: &mut [u8], position: usize) -> Result<usize> {
        let _file = self.lock.lock();

        if buf.is_empty() {
            return Err(KernelError::InvalidArgument);
        }

        let (size, chain) = self.snapshot();
        if position >= size {
            return Ok(0);
        }
        let wanted = buf.len().min(size - position);

        let cluster_size = self.volume.cluster_size();
        let mut cluster = vec![0u8; cluster_size];
        let mut read = 0;
        while read < wanted {
            let offset = position + read;
            let index = offset / cluster_size;
            let within = offset % cluster_size;
            let take = (cluster_size - within).min(wanted - read);

            self.volume.read_data_cluster(&mut cluster, chain[index])?;
            buf[read..read + take].copy_from_slice(&cluster[within..within + take]);
            read += take;
        }

        Ok(read)
    }

    fn write(&self, buf: &[u8], position: usize) -> Result<usize> {
        let _file = self.lock.lock();

        if buf.is_empty() {
            return Err(KernelError::InvalidArgument);
        }

        let last_byte = position + buf.len();
        let cluster_size = self.volume.cluster_size();
        self.grow_chain(last_byte.div_ceil(cluster_size))?;

        let (size, chain) = self.snapshot();
        let mut cluster = vec![0u8; cluster_size];
        let mut written = 0;
        while written < buf.len() {
            let offset = position + written;
            let index = offset / cluster_size;
            let within = offset % cluster_size;
            let take = (cluster_size - within).min(buf.len() - written);

            self.volume.read_data_cluster(&mut cluster, chain[index])?;
            cluster[within..within + take].copy_from_slice(&buf[written..written + take]);
            self.volume.write_data_cluster(&cluster, chain[index])?;
            written += take;
        }

        if last_byte > size {
            self.store_size(last_byte)?;
        }

        Ok(written)
    }

    fn resize(&self, new_size: usize) -> Result<()> {
        let _file = self.lock.lock();

        let (size, chain) = self.snapshot();
        if new_size == size {
            return Ok(());
        }

        let cluster_size = self.volume.cluster_size();
        // The directory entry's start link must stay valid, so an empty
        // file keeps one cluster.
        let needed = new_size.div_ceil(cluster_size).max(1);

        if new_size < size {
            if needed < chain.len() {
                let mut kept = chain;
                let dropped: Vec<FatIndex> = kept.drain(needed..).collect();
                self.volume.free(&dropped)?;
                self.volume
                    .set_entries(&[*kept.last().unwrap()], super::table::FAT_EOF)?;
                sync::lock(&self.state).chain = kept;
            }
        } else {
            self.grow_chain(needed)?;
        }

        self.store_size(new_size)
    }

    fn close(&self, _caps: Capabilities) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::mount_volume_for_tests;

    fn test_file(volume: &Arc<FatVolume>) -> Arc<FatFile> {
        let root = volume.root().unwrap();
        let entry = root.create("data", FileAttributes::empty()).unwrap();
        match FatFile::open(Arc::clone(volume), entry, Vec::new()) {
            Ok(file) => file,
            Err(err) => panic!("open failed: {err}"),
        }
    }

    #[test]
    fn test_write_read_roundtrip() {
        let volume = mount_volume_for_tests(512, 2048);
        let file = test_file(&volume);

        let payload = b"hello, cluster world";
        assert_eq!(file.write(payload, 0).unwrap(), payload.len());
        assert_eq!(file.size(), payload.len());

        let mut back = vec![0u8; payload.len()];
        assert_eq!(file.read(&mut back, 0).unwrap(), payload.len());
        assert_eq!(&back, payload);
    }

    #[test]
    fn test_write_spanning_clusters() {
        let volume = mount_volume_for_tests(512, 2048);
        let file = test_file(&volume);

        let payload: Vec<u8> = (0..3000).map(|i| (i % 241) as u8).collect();
        file.write(&payload, 100).unwrap();
        assert_eq!(file.size(), 3100);

        let mut back = vec![0u8; payload.len()];
        assert_eq!(file.read(&mut back, 100).unwrap(), payload.len());
        assert_eq!(back, payload);
    }

    #[test]
    fn test_read_clamps_to_size() {
        let volume = mount_volume_for_tests(512, 2048);
        let file = test_file(&volume);
        file.write(b"12345", 0).unwrap();

        let mut buf = [0u8; 64];
        assert_eq!(file.read(&mut buf, 0).unwrap(), 5);
        assert_eq!(file.read(&mut buf, 5).unwrap(), 0);
    }

    #[test]
    fn test_resize_shrink_frees_tail() {
        let volume = mount_volume_for_tests(512, 2048);
        let file = test_file(&volume);

        let payload = vec![7u8; 10_000];
        file.write(&payload, 0).unwrap();
        let before = sync::lock(&file.state).chain.clone();
        assert_eq!(before.len(), 20);

        file.resize(0).unwrap();
        assert_eq!(file.size(), 0);
        let after = sync::lock(&file.state).chain.clone();
        assert_eq!(after.len(), 1);

        // Freed clusters become allocatable again.
        let reclaimed = volume.allocate(before.len() - 1).unwrap();
        assert_eq!(reclaimed.len(), before.len() - 1);
    }

    #[test]
    fn test_resize_grow_allocates() {
        let volume = mount_volume_for_tests(512, 2048);
        let file = test_file(&volume);

        file.resize(2048).unwrap();
        assert_eq!(file.size(), 2048);
        assert_eq!(sync::lock(&file.state).chain.len(), 4);
    }

    #[test]
    fn test_write_without_space_fails() {
        let volume = mount_volume_for_tests(512, 512);
        let file = test_file(&volume);

        let entries = volume.superblock().fat_entries as usize;
        let huge = vec![0u8; (entries + 1) * 512];
        assert_eq!(
            file.write(&huge, 0),
            Err(KernelError::NotEnoughDiskSpace)
        );
    }
}
