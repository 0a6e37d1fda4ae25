// kernel/src/vfs/descriptor.rs
//! Kernel-wide descriptor table
//!
//! Fixed `MAX_FD` slots. A slot is FREE (no file, no flags), RESERVED
//! (claimed while an open may still fail, so the table lock need not be held
//! across a blocking backend call), or published with READ/WRITE capability
//! bits. The table lock is re-entrant because closing a pipe endpoint calls
//! back into the backend, which may close its peer descriptor.

use std::sync::{Arc, Mutex};

use vesta_os_abi::{Handle, KernelError, Result, MAX_FD};

use super::file::OpenFile;
use crate::sync::{self, ReentrantMutex};

bitflags::bitflags! {
    /// Capability bits of a descriptor slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u8 {
        /// Descriptor may read.
        const READ = 0x01;
        /// Descriptor may write.
        const WRITE = 0x02;
        /// Slot is pre-allocated but not yet published.
        const RESERVED = 0x04;
    }
}

#[derive(Default, Clone)]
struct Slot {
    file: Option<Arc<OpenFile>>,
    position: usize,
    caps: Capabilities,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities::empty()
    }
}

impl Slot {
    fn is_free(&self) -> bool {
        self.file.is_none() && self.caps.is_empty()
    }
}

/// Snapshot of a published descriptor, used to perform I/O without holding
/// the table lock across a blocking backend call.
pub struct DescriptorRef {
    /// The referenced open file.
    pub file: Arc<OpenFile>,
    /// Byte position at snapshot time.
    pub position: usize,
    /// Capability bits of the slot.
    pub caps: Capabilities,
}

/// The fixed-size descriptor table.
pub struct DescriptorTable {
    lock: ReentrantMutex,
    slots: Mutex<Vec<Slot>>,
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorTable {
    /// Create a table of `MAX_FD` free slots.
    #[must_use]
    pub fn new() -> Self {
        Self {
            lock: ReentrantMutex::new(),
            slots: Mutex::new(vec![Slot::default(); MAX_FD]),
        }
    }

    /// Claim a free slot, marking it RESERVED.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` when every slot is taken.
    pub fn reserve(&self) -> Result<Handle> {
        let _table = self.lock.lock();
        let mut slots = sync::lock(&self.slots);
        for (index, slot) in slots.iter_mut().enumerate() {
            if slot.is_free() {
                slot.caps = Capabilities::RESERVED;
                return Ok(index as Handle);
            }
        }
        Err(KernelError::OutOfMemory)
    }

    /// Return a RESERVED slot to the free state after a failed open.
    pub fn release_reserved(&self, fd: Handle) {
        let _table = self.lock.lock();
        let mut slots = sync::lock(&self.slots);
        if let Some(slot) = slots.get_mut(fd as usize) {
            if slot.caps == Capabilities::RESERVED {
                *slot = Slot::default();
            }
        }
    }

    /// Publish a RESERVED slot with its file and capabilities.
    pub fn publish(&self, fd: Handle, file: Arc<OpenFile>, caps: Capabilities) {
        let _table = self.lock.lock();
        let mut slots = sync::lock(&self.slots);
        if let Some(slot) = slots.get_mut(fd as usize) {
            slot.file = Some(file);
            slot.position = 0;
            slot.caps = caps;
        }
    }

    /// Snapshot a published descriptor.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for free, reserved or out-of-range handles.
    pub fn get(&self, fd: Handle) -> Result<DescriptorRef> {
        let _table = self.lock.lock();
        let slots = sync::lock(&self.slots);
        let slot = slots.get(fd as usize).ok_or(KernelError::InvalidArgument)?;
        if slot.caps.contains(Capabilities::RESERVED) {
            return Err(KernelError::InvalidArgument);
        }
        let file = slot.file.clone().ok_or(KernelError::InvalidArgument)?;
        Ok(DescriptorRef {
            file,
            position: slot.position,
            caps: slot.caps,
        })
    }

    /// Store a new byte position.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for unpublished handles.
    pub fn set_position(&self, fd: Handle, position: usize) -> Result<()> {
        let _table = self.lock.lock();
        let mut slots = sync::lock(&self.slots);
        let slot = slots
            .get_mut(fd as usize)
            .ok_or(KernelError::InvalidArgument)?;
        if slot.file.is_none() {
            return Err(KernelError::InvalidArgument);
        }
        slot.position = position;
        Ok(())
    }

    /// Advance the position after a transfer; stale positions are simply
    /// overwritten (two threads racing one descriptor race anyway).
    pub fn advance_position(&self, fd: Handle, base: usize, transferred: usize) {
        let _ = self.set_position(fd, base + transferred);
    }

    /// Free a published slot, returning its file and capabilities.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` when the slot holds no file.
    pub fn take(&self, fd: Handle) -> Result<(Arc<OpenFile>, Capabilities)> {
        let _table = self.lock.lock();
        let mut slots = sync::lock(&self.slots);
        let slot = slots
            .get_mut(fd as usize)
            .ok_or(KernelError::InvalidArgument)?;
        let file = slot.file.take().ok_or(KernelError::InvalidArgument)?;
        let caps = slot.caps;
        *slot = Slot::default();
        Ok((file, caps))
    }

    /// Run `body` with the table lock held (descriptor-level atomicity for
    /// multi-slot operations such as pipe creation).
    pub fn with_table_locked<T>(&self, body: impl FnOnce() -> T) -> T {
        let _table = self.lock.lock();
        body()
    }
}
