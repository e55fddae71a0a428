//! Relocated memory regions
//!
//! A region is a heap buffer that replaces (and usually enlarges) a block of the
//! host process's memory. Patched instructions in the host point into it, so
//! the host may write to it at any time; the bytes are therefore kept behind
//! atomics and the buffer never moves once allocated.

use crate::error::{TaskError, TaskResult};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU8, Ordering};

/// Heap buffer with metadata about the memory it relocates
pub struct MemoryRegion {
    data: Box<[AtomicU8]>,
    /// Total size of the buffer in bytes
    pub size: usize,
    /// Number of meaningful bytes copied or loaded into the front of the buffer
    pub original_size: usize,
    /// Address the data came from
    pub original_address: usize,
    /// Free-form description
    pub description: String,
}

impl MemoryRegion {
    /// Allocate a zero-filled region of `size` bytes
    pub fn zeroed(
        size: usize,
        original_size: usize,
        original_address: usize,
        description: impl Into<String>,
    ) -> TaskResult<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| TaskError::MemoryAllocationFailed { size })?;
        data.extend((0..size).map(|_| AtomicU8::new(0)));

        Ok(Self {
            data: data.into_boxed_slice(),
            size,
            original_size,
            original_address,
            description: description.into(),
        })
    }

    /// Address of the first byte; stable for the lifetime of the region
    pub fn base_address(&self) -> usize {
        self.as_mut_ptr() as usize
    }

    /// Raw pointer to the buffer for code that hands it to the host process
    pub fn as_mut_ptr(&self) -> *mut u8 {
        // AtomicU8 has the same in-memory representation as u8
        self.data.as_ptr().cast::<u8>().cast_mut()
    }

    /// Copy `bytes` into the region starting at `offset`
    ///
    /// Writes that would run past the end are rejected.
    pub fn write(&self, offset: usize, bytes: &[u8]) -> TaskResult {
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= self.size)
            .ok_or_else(|| {
                TaskError::CopyFailed(format!(
                    "write of {} bytes at offset {offset} exceeds region of {} bytes",
                    bytes.len(),
                    self.size
                ))
            })?;

        for (slot, byte) in self.data[offset..end].iter().zip(bytes) {
            slot.store(*byte, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Snapshot of the current contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    /// `MemoryRegion: <description> [0x<start> - 0x<end>]`
    pub fn summary(&self) -> String {
        format!(
            "MemoryRegion: {} [0x{:X} - 0x{:X}]",
            self.description,
            self.original_address,
            self.original_address.wrapping_add(self.size)
        )
    }

    /// Uppercase hex dump of `count` bytes starting at `offset`, clipped to the region
    pub fn hex_dump(&self, offset: usize, count: usize) -> String {
        let start = offset.min(self.size);
        let end = start.saturating_add(count).min(self.size);

        let mut out = String::with_capacity((end - start) * 3);
        for (i, byte) in self.data[start..end].iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{:02X}", byte.load(Ordering::Relaxed));
        }
        out
    }
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("base", &format_args!("{:#x}", self.base_address()))
            .field("size", &self.size)
            .field("original_size", &self.original_size)
            .field("original_address", &format_args!("{:#x}", self.original_address))
            .field("description", &self.description)
            .finish()
    }
}
