//! CP DMA engine for the AMD graphics command processor.
//!
//! The command processor (CP) on AMD GPUs contains a small DMA engine that
//! can copy between linear buffers or fill a buffer with an immediate value
//! while the rest of the graphics pipeline keeps running. This crate emits
//! the command packets for that engine and interleaves the cache flushes
//! and synchronization barriers the pipeline needs around the asynchronous
//! transfers.
//!
//! # Architecture
//!
//! - [`packet`] encodes single CP DMA packets for each hardware generation
//! - [`coherency`] maps coherency domains to flush bits and cache policy
//! - [`dma`] sequences a logical transfer into hardware-sized chunks and
//!   applies the alignment workarounds older families require
//! - [`prefetch`] issues fire-and-forget self-copies that warm the L2
//!   cache for shader binaries and vertex descriptors
//! - [`query`] describes the data contract of the query-result reduction
//!   compute program
//!
//! All packet emission for one logical request must come from one thread;
//! the chunk ordering and first/last synchronization decisions are
//! stream-order dependent. Nothing here blocks the host: waiting is
//! expressed as synchronization packets consumed by the device.

#![no_std]

extern crate alloc;

pub mod buffer;
pub mod chip;
pub mod coherency;
pub mod context;
pub mod dma;
pub mod packet;
pub mod prefetch;
pub mod query;

#[cfg(test)]
pub(crate) mod testing;

// Re-exports
pub use buffer::{Buffer, BufferFlags, BufferUsage, ValidRange};
pub use chip::{ChipClass, ChipFamily, ChipInfo};
pub use coherency::{get_cache_policy, get_flush_flags, CachePolicy, Coherency, ContextFlags};
pub use context::{CmdStream, GfxContext, SdmaEngine, ShaderBindings, Winsys};
pub use dma::install;
pub use dma::UserFlags;
pub use packet::{emit_cp_dma, CpDmaFlags};
pub use prefetch::{PrefetchMask, ShaderStage};
pub use query::{accumulate_query_results, ComputeRunner, QueryResultConsts, QueryResultFlags};

/// Transfer granularity of the CP DMA engine, in bytes.
///
/// The engine's internal progress counter only advances cleanly for
/// transfer sizes that are a multiple of this; see
/// [`dma`] for the realignment workaround on affected families.
pub const CP_DMA_ALIGNMENT: u64 = 256;

/// Recommended maximum copy size for optimal performance.
/// Callers should fall back to compute or SDMA above this.
pub const CP_DMA_COPY_PERF_THRESHOLD: u64 = 64 * 1024;

/// Recommended maximum clear size (clears are much slower than copies).
/// [`GfxContext::clear_buffer`] routes bigger clears to SDMA itself.
pub const CP_DMA_CLEAR_PERF_THRESHOLD: u64 = 32 * 1024;

/// Result type for CP DMA operations
pub type Result<T> = core::result::Result<T, Error>;

/// CP DMA error types
///
/// Caller contract violations (oversized chunks, prefetch on unsupported
/// hardware, mismatched cache policies) are debug assertions, not errors;
/// only collaborator failures surface here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Out of device memory
    OutOfDeviceMemory,
    /// Feature not supported
    NotSupported,
    /// Operation failed
    OperationFailed,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::OutOfDeviceMemory => write!(f, "Out of device memory"),
            Error::NotSupported => write!(f, "Not supported"),
            Error::OperationFailed => write!(f, "Operation failed"),
        }
    }
}
