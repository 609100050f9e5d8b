//! Execution context, command stream and collaborator seams.
//!
//! One [`GfxContext`] owns one command stream. The context is not
//! internally locked: the sequencer assumes exclusive access for the
//! duration of a request, and higher layers serialize context use.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::buffer::{Buffer, BufferUsage};
use crate::chip::ChipInfo;
use crate::coherency::ContextFlags;
use crate::prefetch::PrefetchMask;
use crate::Result;

/// Buffer allocation and the generic byte-level write path, provided by
/// the window-system/winsys layer.
pub trait Winsys {
    /// Allocate an unmappable GPU buffer.
    fn create_buffer(&self, size: u64, alignment: u64) -> Result<Arc<Buffer>>;

    /// Write bytes through the CPU staging path. Used for trailing
    /// sub-dword clear remainders the DMA engine cannot express.
    fn write_buffer(&self, buf: &Arc<Buffer>, offset: u64, data: &[u8]);
}

/// The asynchronous SDMA copy engine, if the device exposes one.
pub trait SdmaEngine {
    /// Clear `size` bytes (dword-aligned) on the SDMA queue.
    fn clear_buffer(&mut self, dst: &Arc<Buffer>, offset: u64, size: u64, value: u32);
}

/// The graphics command stream: raw word emission plus the in-flight
/// buffer list the kernel fence/residency logic consumes.
pub struct CmdStream {
    words: Vec<u32>,
    buffers: Vec<(Arc<Buffer>, BufferUsage)>,
}

impl CmdStream {
    pub fn new() -> Self {
        Self {
            words: Vec::new(),
            buffers: Vec::new(),
        }
    }

    /// Append one command word.
    pub fn emit(&mut self, word: u32) {
        self.words.push(word);
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Make sure at least `words` more words fit without reallocation
    /// mid-packet.
    pub fn check_space(&mut self, words: usize) {
        self.words.reserve(words);
    }

    /// Register a buffer as used by this stream. Usage accumulates for
    /// buffers already on the list.
    pub fn add_buffer(&mut self, buf: &Arc<Buffer>, usage: BufferUsage) {
        for (existing, existing_usage) in self.buffers.iter_mut() {
            if Arc::ptr_eq(existing, buf) {
                *existing_usage |= usage;
                return;
            }
        }
        self.buffers.push((buf.clone(), usage));
    }

    /// Whether in-flight work in this stream uses `buf` in any of the
    /// ways in `usage`.
    pub fn is_buffer_referenced(&self, buf: &Arc<Buffer>, usage: BufferUsage) -> bool {
        self.buffers
            .iter()
            .any(|(b, u)| Arc::ptr_eq(b, buf) && u.intersects(usage))
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}

impl Default for CmdStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Shader binaries and descriptor ranges currently bound to the
/// pipeline, as the prefetch helper needs to see them.
#[derive(Default)]
pub struct ShaderBindings {
    pub ls: Option<Arc<Buffer>>,
    pub hs: Option<Arc<Buffer>>,
    pub es: Option<Arc<Buffer>>,
    pub gs: Option<Arc<Buffer>>,
    pub vs: Option<Arc<Buffer>>,
    pub ps: Option<Arc<Buffer>>,
    /// Vertex-buffer descriptor table: buffer, offset, byte size.
    pub vb_descriptors: Option<(Arc<Buffer>, u64, u64)>,
    /// A tessellation evaluation shader is bound.
    pub tess_enabled: bool,
    /// A geometry shader is bound.
    pub gs_enabled: bool,
}

/// Signature of the installed buffer-clear capability (clear value as
/// raw bytes, 1 to 16 wide).
pub type ClearBufferFn = fn(&mut GfxContext, &Arc<Buffer>, u64, u64, &[u8]);

/// Per-device execution context for the CP DMA engine.
pub struct GfxContext {
    chip: ChipInfo,
    pub cs: CmdStream,
    pub shaders: ShaderBindings,
    winsys: Arc<dyn Winsys>,
    sdma: Option<Box<dyn SdmaEngine>>,

    pub(crate) flags: ContextFlags,
    pub(crate) scratch_buffer: Option<Arc<Buffer>>,
    pub(crate) scratch_state_dirty: bool,
    pub(crate) prefetch_l2_mask: PrefetchMask,
    pub(crate) clear_buffer_fn: Option<ClearBufferFn>,

    pub(crate) mem_usage: u64,
    pub(crate) num_cp_dma_calls: u32,
    num_cache_flushes: u32,
}

impl GfxContext {
    pub fn new(chip: ChipInfo, winsys: Arc<dyn Winsys>) -> Self {
        Self {
            chip,
            cs: CmdStream::new(),
            shaders: ShaderBindings::default(),
            winsys,
            sdma: None,
            flags: ContextFlags::empty(),
            scratch_buffer: None,
            scratch_state_dirty: false,
            prefetch_l2_mask: PrefetchMask::empty(),
            clear_buffer_fn: None,
            mem_usage: 0,
            num_cp_dma_calls: 0,
            num_cache_flushes: 0,
        }
    }

    /// Attach the asynchronous SDMA engine for clear routing.
    pub fn set_sdma(&mut self, sdma: Box<dyn SdmaEngine>) {
        self.sdma = Some(sdma);
    }

    pub fn chip(&self) -> ChipInfo {
        self.chip
    }

    pub fn winsys(&self) -> &Arc<dyn Winsys> {
        &self.winsys
    }

    pub(crate) fn sdma_mut(&mut self) -> Option<&mut (dyn SdmaEngine + '_)> {
        match self.sdma.as_mut() {
            Some(sdma) => Some(&mut **sdma),
            None => None,
        }
    }

    pub(crate) fn has_sdma(&self) -> bool {
        self.sdma.is_some()
    }

    /// Pending cache-flush work accumulated for this context.
    pub fn flags(&self) -> ContextFlags {
        self.flags
    }

    /// Accumulate flush work to be drained before the next transfer.
    pub fn add_flags(&mut self, flags: ContextFlags) {
        self.flags |= flags;
    }

    /// Drain the accumulated flush state. The owning graphics context
    /// emits the actual flush packets; this engine only guarantees the
    /// drain happens once, before the first chunk of a request.
    pub fn emit_cache_flush(&mut self) {
        if self.flags.is_empty() {
            return;
        }
        log::trace!("cp dma: draining cache flush state {:?}", self.flags);
        self.flags = ContextFlags::empty();
        self.num_cache_flushes += 1;
    }

    /// Count a buffer's footprint so the space check sees the final
    /// working set.
    pub(crate) fn add_resource_size(&mut self, buf: &Arc<Buffer>) {
        self.mem_usage += buf.size();
    }

    /// Scratch buffer used for engine-realignment dummy transfers.
    pub fn scratch_buffer(&self) -> Option<&Arc<Buffer>> {
        self.scratch_buffer.as_ref()
    }

    /// Whether scratch-dependent cached state must be re-emitted because
    /// the scratch buffer was replaced.
    pub fn scratch_state_dirty(&self) -> bool {
        self.scratch_state_dirty
    }

    /// Pipeline stages whose prefetch is still pending.
    pub fn prefetch_mask(&self) -> PrefetchMask {
        self.prefetch_l2_mask
    }

    /// Mark stages as needing a prefetch (pipeline configuration
    /// changed).
    pub fn mark_prefetch(&mut self, mask: PrefetchMask) {
        self.prefetch_l2_mask |= mask;
    }

    /// Number of genuine (non-prefetch) CP DMA requests issued, used for
    /// engine-usage accounting.
    pub fn num_cp_dma_calls(&self) -> u32 {
        self.num_cp_dma_calls
    }

    pub fn num_cache_flushes(&self) -> u32 {
        self.num_cache_flushes
    }
}
