//! Data contract for the query-result reduction kernel.
//!
//! Raw query results live in GPU memory as (start, end) counter pairs
//! snapshotted around the measured work, with a fence dword marking each
//! pair's completion. A small compute kernel walks the pairs, reduces
//! them and writes the final value; this module packs the constant block
//! that parameterizes one kernel run and hands it to a [`ComputeRunner`].

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::buffer::Buffer;
use crate::Result;

bitflags! {
    /// Behavior selectors in the kernel constant block.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QueryResultFlags: u32 {
        /// Start from the previous partial summary instead of zero.
        const READ_PREVIOUS = 1 << 0;
        /// Write a partial summary for a later chained run instead of a
        /// final result.
        const CHAIN = 1 << 1;
        /// Also write the availability word.
        const WRITE_AVAILABILITY = 1 << 2;
        /// Collapse the result to 0/1.
        const AS_BOOLEAN = 1 << 3;
        /// Store a single dword instead of the full layout.
        const SINGLE_DWORD = 1 << 4;
        /// Results are timestamps, not counter pairs.
        const TIMESTAMP = 1 << 5;
        /// Store 64-bit values.
        const RESULT_64BIT = 1 << 6;
        /// Clamp the stored value as signed 32-bit.
        const SIGNED_32BIT = 1 << 7;
        /// Reduce streamout-overflow predicates.
        const SO_OVERFLOW = 1 << 8;
    }
}

/// Constant block for one reduction run, laid out as the eight dwords
/// the kernel reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryResultConsts {
    /// Byte offset of the end counter within a (start, end) pair.
    pub end_offset: u32,
    /// Stride between per-pair result slots in the output buffer.
    pub result_stride: u32,
    /// Number of results to write.
    pub result_count: u32,
    pub flags: QueryResultFlags,
    /// Byte offset of the completion fence within a pair.
    pub fence_offset: u32,
    /// Stride between counter pairs in the source buffer.
    pub pair_stride: u32,
    /// Pairs per result.
    pub pair_count: u32,
}

impl QueryResultConsts {
    /// The dword image the kernel's constant buffer expects.
    pub fn as_words(&self) -> [u32; 8] {
        [
            self.end_offset,
            self.result_stride,
            self.result_count,
            self.flags.bits(),
            self.fence_offset,
            self.pair_stride,
            self.pair_count,
            0,
        ]
    }
}

/// Dispatch seam for the reduction kernel. Implementations bind the
/// buffers in the fixed slot order (results, previous summary, output)
/// and launch one workgroup per result.
pub trait ComputeRunner {
    fn run_query_result(
        &mut self,
        consts: &[u32; 8],
        results: &Arc<Buffer>,
        prev_summary: Option<&Arc<Buffer>>,
        output: &Arc<Buffer>,
    ) -> Result<()>;
}

/// Reduce raw query results into `output` through `runner`.
///
/// A chained reduction reads the previous run's partial summary, so
/// [`QueryResultFlags::READ_PREVIOUS`] requires `prev_summary`.
pub fn accumulate_query_results(
    runner: &mut dyn ComputeRunner,
    consts: &QueryResultConsts,
    results: &Arc<Buffer>,
    prev_summary: Option<&Arc<Buffer>>,
    output: &Arc<Buffer>,
) -> Result<()> {
    debug_assert!(
        !consts.flags.contains(QueryResultFlags::READ_PREVIOUS) || prev_summary.is_some()
    );

    runner.run_query_result(&consts.as_words(), results, prev_summary, output)
}
