//! GPU buffer objects and their tracking side tables.
//!
//! Buffers are opaque addressable ranges here: the allocator behind
//! [`crate::context::Winsys`] owns the storage, this crate only needs the
//! GPU virtual address plus two side tables consumed by external logic
//! (the valid range for map synchronization, the L2 dirty flag for cache
//! flushes before bypassing reads).

use core::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;
use spin::Mutex;

bitflags! {
    /// Resource creation flags relevant to transfer routing.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        /// Sparse/virtual allocation; SDMA cannot clear these.
        const SPARSE = 1 << 0;
    }
}

bitflags! {
    /// How in-flight command-stream work uses a buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufferUsage: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READWRITE = Self::READ.bits() | Self::WRITE.bits();
    }
}

/// Byte range known to contain GPU-written data. Grows monotonically by
/// union; the map/read-back path uses it to decide whether host access
/// must wait for the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidRange {
    pub start: u64,
    pub end: u64,
}

impl ValidRange {
    pub const fn empty() -> Self {
        Self {
            start: u64::MAX,
            end: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Extend the range to cover `[start, end)`.
    pub fn add(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        self.start = self.start.min(start);
        self.end = self.end.max(end);
    }
}

impl Default for ValidRange {
    fn default() -> Self {
        Self::empty()
    }
}

/// A GPU buffer as seen by the transfer engine.
#[derive(Debug)]
pub struct Buffer {
    gpu_address: u64,
    size: u64,
    flags: BufferFlags,
    valid_range: Mutex<ValidRange>,
    /// Set when any transfer into this buffer kept its writes resident
    /// in L2; external flush logic clears it before bypassing reads.
    tc_l2_dirty: AtomicBool,
}

impl Buffer {
    pub fn new(gpu_address: u64, size: u64, flags: BufferFlags) -> Self {
        Self {
            gpu_address,
            size,
            flags,
            valid_range: Mutex::new(ValidRange::empty()),
            tc_l2_dirty: AtomicBool::new(false),
        }
    }

    pub fn gpu_address(&self) -> u64 {
        self.gpu_address
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_sparse(&self) -> bool {
        self.flags.contains(BufferFlags::SPARSE)
    }

    /// Mark `[start, end)` as initialized by the GPU.
    pub fn add_valid_range(&self, start: u64, end: u64) {
        self.valid_range.lock().add(start, end);
    }

    pub fn valid_range(&self) -> ValidRange {
        *self.valid_range.lock()
    }

    pub fn tc_l2_dirty(&self) -> bool {
        self.tc_l2_dirty.load(Ordering::Acquire)
    }

    pub fn set_tc_l2_dirty(&self, dirty: bool) {
        self.tc_l2_dirty.store(dirty, Ordering::Release);
    }
}
