//! Transfer sequencing for the CP DMA engine.
//!
//! A logical clear or copy becomes one or more hardware-sized chunks.
//! The first chunk waits out read-after-write hazards against earlier
//! CP DMA work, the last chunk carries the completion sync, and the
//! per-request cache-flush state is drained exactly once before the
//! first chunk. Older families additionally need their transfers kept
//! 256-byte aligned, which is handled here with a leading skip copy and
//! a trailing realignment dummy transfer.

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::buffer::{Buffer, BufferUsage};
use crate::coherency::{get_cache_policy, get_flush_flags, CachePolicy, Coherency, ContextFlags};
use crate::context::GfxContext;
use crate::packet::{emit_cp_dma, CpDmaFlags, CP_DMA_PACKET_MAX_WORDS};
use crate::{CP_DMA_ALIGNMENT, CP_DMA_CLEAR_PERF_THRESHOLD};

bitflags! {
    /// Per-request overrides for the sequencing side effects. Prefetches
    /// pass [`UserFlags::SKIP_ALL`] so a transfer degrades to a bare
    /// "touch this memory through the engine" packet.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UserFlags: u32 {
        /// Don't register the buffers on the in-flight list.
        const SKIP_BO_LIST_UPDATE = 1 << 0;
        /// Don't reserve command-stream space.
        const SKIP_CHECK_CS_SPACE = 1 << 1;
        /// No RAW-hazard wait on the first chunk.
        const SKIP_SYNC_BEFORE = 1 << 2;
        /// No completion sync on the last chunk.
        const SKIP_SYNC_AFTER = 1 << 3;
        /// Don't accumulate or drain cache-flush state.
        const SKIP_GFX_SYNC = 1 << 4;
        const SKIP_ALL = Self::SKIP_BO_LIST_UPDATE.bits()
            | Self::SKIP_CHECK_CS_SPACE.bits()
            | Self::SKIP_SYNC_BEFORE.bits()
            | Self::SKIP_SYNC_AFTER.bits()
            | Self::SKIP_GFX_SYNC.bits();
    }
}

impl GfxContext {
    /// Force the command processor to wait until all prior CP DMA work
    /// on this engine retires.
    ///
    /// Issues a dummy transfer that copies zero bytes: the DMA engine
    /// sees there is no work and skips it, but the CP still honors the
    /// sync flag and waits for all DMAs to complete.
    pub fn wait_for_dma_idle(&mut self) {
        let chip_class = self.chip().class;
        emit_cp_dma(
            &mut self.cs,
            chip_class,
            0,
            0,
            0,
            CpDmaFlags::SYNC,
            CachePolicy::L2Bypass,
        );
    }

    /// Per-chunk bookkeeping: resource accounting, buffer-list
    /// registration, the one-time cache flush, and the first/last chunk
    /// synchronization flags.
    fn cp_dma_prepare(
        &mut self,
        dst: &Arc<Buffer>,
        src: Option<&Arc<Buffer>>,
        byte_count: u64,
        remaining_size: u64,
        user_flags: UserFlags,
        coher: Coherency,
        is_first: &mut bool,
        packet_flags: &mut CpDmaFlags,
    ) {
        // Fast exit for a CP DMA prefetch.
        if user_flags.contains(UserFlags::SKIP_ALL) {
            *is_first = false;
            return;
        }

        if !user_flags.contains(UserFlags::SKIP_BO_LIST_UPDATE) {
            // Count memory usage so the space check can take it into
            // account.
            self.add_resource_size(dst);
            if let Some(src) = src {
                self.add_resource_size(src);
            }
        }

        if !user_flags.contains(UserFlags::SKIP_CHECK_CS_SPACE) {
            self.cs.check_space(CP_DMA_PACKET_MAX_WORDS);
        }

        // This must be done after the space check.
        if !user_flags.contains(UserFlags::SKIP_BO_LIST_UPDATE) {
            self.cs.add_buffer(dst, BufferUsage::WRITE);
            if let Some(src) = src {
                self.cs.add_buffer(src, BufferUsage::READ);
            }
        }

        // Flush the caches for the first chunk only. This also waits out
        // previously accumulated flush work.
        if !user_flags.contains(UserFlags::SKIP_GFX_SYNC) && !self.flags.is_empty() {
            self.emit_cache_flush();
        }

        if !user_flags.contains(UserFlags::SKIP_SYNC_BEFORE) && *is_first {
            *packet_flags |= CpDmaFlags::RAW_WAIT;
        }

        *is_first = false;

        // Synchronize after the last chunk, so that all data is written
        // to memory.
        if !user_flags.contains(UserFlags::SKIP_SYNC_AFTER) && byte_count == remaining_size {
            *packet_flags |= CpDmaFlags::SYNC;

            if coher == Coherency::Shader {
                *packet_flags |= CpDmaFlags::PFP_SYNC_ME;
            }
        }
    }

    /// Clear `size` bytes (dword-aligned, nonzero) through the CP DMA
    /// engine.
    pub fn cp_dma_clear_buffer(
        &mut self,
        dst: &Arc<Buffer>,
        offset: u64,
        size: u64,
        value: u32,
        coher: Coherency,
        cache_policy: CachePolicy,
    ) {
        debug_assert!(size > 0 && size % 4 == 0);

        let chip_class = self.chip().class;
        let mut va = dst.gpu_address() + offset;
        let mut size = size;
        let mut is_first = true;

        // Mark the destination range as initialized, so that the mapping
        // path knows it should wait for the GPU when mapping it.
        dst.add_valid_range(offset, offset + size);

        // Flush the caches.
        self.flags |= ContextFlags::PS_PARTIAL_FLUSH
            | ContextFlags::CS_PARTIAL_FLUSH
            | get_flush_flags(chip_class, coher, cache_policy);

        while size > 0 {
            let byte_count = size.min(chip_class.cp_dma_max_byte_count());
            let mut dma_flags = CpDmaFlags::CLEAR;

            self.cp_dma_prepare(
                dst,
                None,
                byte_count,
                size,
                UserFlags::empty(),
                coher,
                &mut is_first,
                &mut dma_flags,
            );

            emit_cp_dma(
                &mut self.cs,
                chip_class,
                va,
                u64::from(value),
                byte_count as u32,
                dma_flags,
                cache_policy,
            );

            size -= byte_count;
            va += byte_count;
        }

        if cache_policy != CachePolicy::L2Bypass {
            dst.set_tc_l2_dirty(true);
        }

        // If it's not a framebuffer fast clear...
        if coher == Coherency::Shader {
            self.num_cp_dma_calls += 1;
        }
    }

    /// Clear a buffer range, choosing between SDMA, the CP DMA engine
    /// and the byte-level write path.
    pub fn clear_buffer(
        &mut self,
        dst: &Arc<Buffer>,
        offset: u64,
        size: u64,
        value: u32,
        coher: Coherency,
    ) {
        if size == 0 {
            return;
        }

        let cache_policy = get_cache_policy(self.chip().class, coher);
        let dma_clear_size = size & !3u64;

        let mut offset = offset;
        let mut size = size;

        let referenced = self.cs.is_buffer_referenced(dst, BufferUsage::READWRITE);

        // CP DMA is very slow for big clears, and buffers not yet used
        // by this stream can be cleared asynchronously without stalling
        // the graphics pipeline. Route both cases to SDMA.
        if self.has_sdma()
            && !dst.is_sparse()
            && offset % 4 == 0
            && (dma_clear_size > CP_DMA_CLEAR_PERF_THRESHOLD || !referenced)
        {
            log::trace!("routing {} byte clear to SDMA", dma_clear_size);
            if let Some(sdma) = self.sdma_mut() {
                sdma.clear_buffer(dst, offset, dma_clear_size, value);
            }

            offset += dma_clear_size;
            size -= dma_clear_size;
        } else if dma_clear_size >= 4 {
            self.cp_dma_clear_buffer(dst, offset, dma_clear_size, value, coher, cache_policy);

            offset += dma_clear_size;
            size -= dma_clear_size;
        }

        if size > 0 {
            // Handle the non-dword tail through the staging write path.
            debug_assert!(size < 4);
            let bytes = value.to_le_bytes();
            self.winsys().write_buffer(dst, offset, &bytes[..size as usize]);
        }
    }

    /// Realign the DMA engine after a copy with an unaligned size, by
    /// issuing a dummy self-copy inside the scratch buffer sized to the
    /// remainder. `size` is the distance back to the alignment boundary.
    fn cp_dma_realign_engine(
        &mut self,
        size: u64,
        user_flags: UserFlags,
        coher: Coherency,
        cache_policy: CachePolicy,
        is_first: &mut bool,
    ) {
        let scratch_size = CP_DMA_ALIGNMENT * 2;

        debug_assert!(size < CP_DMA_ALIGNMENT);

        // Use the scratch buffer as the dummy buffer. The 3D engine is
        // idle at this point.
        let needs_alloc = match &self.scratch_buffer {
            None => true,
            Some(buf) => buf.size() < scratch_size,
        };
        if needs_alloc {
            let buf = match self.winsys().create_buffer(scratch_size, CP_DMA_ALIGNMENT) {
                Ok(buf) => buf,
                Err(err) => {
                    // Skipping the realignment only costs throughput.
                    log::warn!("cp dma: scratch buffer allocation failed ({}), skipping engine realignment", err);
                    return;
                }
            };
            self.scratch_buffer = Some(buf);
            self.scratch_state_dirty = true;
        }

        let scratch = match self.scratch_buffer.clone() {
            Some(buf) => buf,
            None => return,
        };

        let mut dma_flags = CpDmaFlags::empty();
        self.cp_dma_prepare(
            &scratch,
            Some(&scratch),
            size,
            size,
            user_flags,
            coher,
            is_first,
            &mut dma_flags,
        );

        let chip_class = self.chip().class;
        let va = scratch.gpu_address();
        emit_cp_dma(
            &mut self.cs,
            chip_class,
            va,
            va + CP_DMA_ALIGNMENT,
            size as u32,
            dma_flags,
            cache_policy,
        );
    }

    /// Copy `size` bytes between buffers using CP DMA.
    pub fn copy_buffer(
        &mut self,
        dst: &Arc<Buffer>,
        src: &Arc<Buffer>,
        dst_offset: u64,
        src_offset: u64,
        size: u64,
        user_flags: UserFlags,
    ) {
        if size == 0 {
            return;
        }

        let chip = self.chip();
        let coher = Coherency::Shader;
        let cache_policy = get_cache_policy(chip.class, coher);
        let mut is_first = true;
        let mut skipped_size = 0;
        let mut realign_size = 0;
        let mut size = size;

        if !Arc::ptr_eq(dst, src) || dst_offset != src_offset {
            // Mark the destination range as initialized, so that the
            // mapping path knows it should wait for the GPU when mapping
            // it.
            dst.add_valid_range(dst_offset, dst_offset + size);
        }

        let dst_va = dst.gpu_address() + dst_offset;
        let src_va = src.gpu_address() + src_offset;

        if chip.needs_cp_dma_alignment_workaround() {
            // If the size is not aligned, add a dummy copy at the end
            // just to align the internal counter. Otherwise the DMA
            // engine slows down by an order of magnitude for following
            // copies.
            if size % CP_DMA_ALIGNMENT != 0 {
                realign_size = CP_DMA_ALIGNMENT - (size % CP_DMA_ALIGNMENT);
            }

            // If the copy begins unaligned, start copying from the next
            // aligned block; the skipped part is copied after everything
            // else. Only the src alignment matters, not dst.
            if src_va % CP_DMA_ALIGNMENT != 0 {
                skipped_size = CP_DMA_ALIGNMENT - (src_va % CP_DMA_ALIGNMENT);
                // The main part is skipped entirely if the size is too
                // small.
                skipped_size = skipped_size.min(size);
                size -= skipped_size;
            }
        }

        // Flush the caches.
        if !user_flags.contains(UserFlags::SKIP_GFX_SYNC) {
            self.flags |= ContextFlags::PS_PARTIAL_FLUSH
                | ContextFlags::CS_PARTIAL_FLUSH
                | get_flush_flags(chip.class, coher, cache_policy);
        }

        // The main part doing the copying. Src is always aligned here.
        let mut main_dst_va = dst_va + skipped_size;
        let mut main_src_va = src_va + skipped_size;

        while size > 0 {
            let byte_count = size.min(chip.class.cp_dma_max_byte_count());
            let mut dma_flags = CpDmaFlags::empty();

            self.cp_dma_prepare(
                dst,
                Some(src),
                byte_count,
                size + skipped_size + realign_size,
                user_flags,
                coher,
                &mut is_first,
                &mut dma_flags,
            );

            emit_cp_dma(
                &mut self.cs,
                chip.class,
                main_dst_va,
                main_src_va,
                byte_count as u32,
                dma_flags,
                cache_policy,
            );

            size -= byte_count;
            main_src_va += byte_count;
            main_dst_va += byte_count;
        }

        // Copy the part that was skipped because src wasn't aligned.
        if skipped_size > 0 {
            let mut dma_flags = CpDmaFlags::empty();

            self.cp_dma_prepare(
                dst,
                Some(src),
                skipped_size,
                skipped_size + realign_size,
                user_flags,
                coher,
                &mut is_first,
                &mut dma_flags,
            );

            emit_cp_dma(
                &mut self.cs,
                chip.class,
                dst_va,
                src_va,
                skipped_size as u32,
                dma_flags,
                cache_policy,
            );
        }

        // Finally, realign the engine if the size wasn't aligned.
        if realign_size > 0 {
            self.cp_dma_realign_engine(realign_size, user_flags, coher, cache_policy, &mut is_first);
        }

        if cache_policy != CachePolicy::L2Bypass {
            dst.set_tc_l2_dirty(true);
        }

        // If it's not a prefetch...
        if dst_va != src_va {
            self.num_cp_dma_calls += 1;
        }
    }

    /// Clear through the installed buffer-clear capability.
    pub fn clear_buffer_typed(
        &mut self,
        dst: &Arc<Buffer>,
        offset: u64,
        size: u64,
        clear_value: &[u8],
    ) {
        match self.clear_buffer_fn {
            Some(clear) => clear(self, dst, offset, size, clear_value),
            None => debug_assert!(false, "buffer-clear capability not installed"),
        }
    }
}

/// Wire the clear entry point into the context's buffer-clear capability
/// slot.
pub fn install(ctx: &mut GfxContext) {
    ctx.clear_buffer_fn = Some(pipe_clear_buffer);
}

/// Generic clear entry: expands 1/2/4-byte clear values to a dword fill
/// and lowers dword-duplicated wide values. Patterns CP DMA cannot
/// express go through the byte-level write path.
fn pipe_clear_buffer(
    ctx: &mut GfxContext,
    dst: &Arc<Buffer>,
    offset: u64,
    size: u64,
    clear_value: &[u8],
) {
    let value_size = clear_value.len() as u64;

    debug_assert!(value_size > 0);
    debug_assert!(offset % value_size == 0);
    debug_assert!(size % value_size == 0);

    if clear_value.len() > 4 {
        // See if the wide fill lowers to a dword fill.
        let first = &clear_value[0..4];
        let duplicated = clear_value.chunks_exact(4).all(|chunk| chunk == first);

        if !duplicated {
            // 64/96/128-bit patterns with distinct dwords; fill through
            // the staging path.
            log::debug!(
                "non-duplicated {} byte clear value, using staging writes",
                clear_value.len()
            );
            let mut written = 0;
            while written < size {
                ctx.winsys().write_buffer(dst, offset + written, clear_value);
                written += value_size;
            }
            return;
        }
    }

    // Expand the clear value to a dword.
    let dword_value = match clear_value.len() {
        1 => u32::from(clear_value[0]) * 0x0101_0101,
        2 => {
            let v = u32::from(u16::from_le_bytes([clear_value[0], clear_value[1]]));
            v | (v << 16)
        }
        _ => u32::from_le_bytes([
            clear_value[0],
            clear_value[1],
            clear_value[2],
            clear_value[3],
        ]),
    };

    ctx.clear_buffer(dst, offset, size, dword_value, Coherency::Shader);
}
