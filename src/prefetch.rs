//! L2 prefetching of shader binaries and vertex-buffer descriptors.
//!
//! A prefetch is a CP DMA self-copy with every sequencing side effect
//! skipped; on GFX9 the packet writes nowhere and only warms the cache.
//! The walk order per generation places the vertex-buffer descriptor
//! fetch right behind the first vertex-stage shader, so draws that only
//! need the vertex stage can stop early.

use alloc::sync::Arc;

use bitflags::bitflags;

use crate::buffer::Buffer;
use crate::chip::ChipClass;
use crate::context::GfxContext;
use crate::dma::UserFlags;

bitflags! {
    /// Pipeline stages with a pending L2 prefetch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrefetchMask: u32 {
        const VS = 1 << 0;
        const PS = 1 << 1;
        const GS = 1 << 2;
        const HS = 1 << 3;
        const ES = 1 << 4;
        const LS = 1 << 5;
        const VBO_DESCRIPTORS = 1 << 6;
    }
}

/// Hardware shader stages with a prefetchable binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Ls,
    Hs,
    Es,
    Gs,
    Vs,
    Ps,
}

impl ShaderStage {
    /// The pending-prefetch bit tracking this stage.
    pub fn mask(self) -> PrefetchMask {
        match self {
            ShaderStage::Ls => PrefetchMask::LS,
            ShaderStage::Hs => PrefetchMask::HS,
            ShaderStage::Es => PrefetchMask::ES,
            ShaderStage::Gs => PrefetchMask::GS,
            ShaderStage::Vs => PrefetchMask::VS,
            ShaderStage::Ps => PrefetchMask::PS,
        }
    }
}

/// One entry in the generation's prefetch walk order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Shader(ShaderStage),
    VboDescriptors,
}

use Slot::{Shader, VboDescriptors};
use ShaderStage::{Es, Gs, Hs, Ls, Vs};

// GFX9 merges LS into HS and ES into GS, so the first vertex-stage
// shader differs per pipeline configuration.
const GFX9_TESS: &[Slot] = &[Shader(Hs), VboDescriptors, Shader(Gs), Shader(Vs)];
const GFX9_GS: &[Slot] = &[Shader(Gs), VboDescriptors, Shader(Vs)];
const GFX9_VS: &[Slot] = &[Shader(Vs), VboDescriptors];

const PRE_GFX9_TESS: &[Slot] = &[
    Shader(Ls),
    VboDescriptors,
    Shader(Hs),
    Shader(Es),
    Shader(Gs),
    Shader(Vs),
];
const PRE_GFX9_GS: &[Slot] = &[Shader(Es), VboDescriptors, Shader(Gs), Shader(Vs)];
const PRE_GFX9_VS: &[Slot] = &[Shader(Vs), VboDescriptors];

impl GfxContext {
    /// Warm the L2 cache with `size` bytes of `buf` without stalling
    /// anything. Only meaningful where transfers can target L2.
    pub fn prefetch_l2(&mut self, buf: &Arc<Buffer>, offset: u64, size: u64) {
        debug_assert!(self.chip().class >= ChipClass::Cik);

        self.copy_buffer(buf, buf, offset, offset, size, UserFlags::SKIP_ALL);
    }

    fn prefetch_shader(&mut self, stage: ShaderStage) {
        let shader = match stage {
            ShaderStage::Ls => &self.shaders.ls,
            ShaderStage::Hs => &self.shaders.hs,
            ShaderStage::Es => &self.shaders.es,
            ShaderStage::Gs => &self.shaders.gs,
            ShaderStage::Vs => &self.shaders.vs,
            ShaderStage::Ps => &self.shaders.ps,
        };
        if let Some(buf) = shader.clone() {
            let size = buf.size();
            self.prefetch_l2(&buf, 0, size);
        }
    }

    fn prefetch_vbo_descriptors(&mut self) {
        if let Some((buf, offset, size)) = self.shaders.vb_descriptors.clone() {
            self.prefetch_l2(&buf, offset, size);
        }
    }

    /// Prefetch the bound shaders and vertex-buffer descriptors.
    ///
    /// With `vertex_stage_only`, only the slots up to and including the
    /// descriptor table are issued and their bits cleared; the rest of
    /// the mask stays pending for a later full pass. Calling with an
    /// empty mask does nothing.
    pub fn emit_prefetches(&mut self, vertex_stage_only: bool) {
        let mask = self.prefetch_l2_mask;
        if mask.is_empty() {
            return;
        }

        let slots: &[Slot] = if self.chip().class >= ChipClass::Gfx9 {
            if self.shaders.tess_enabled {
                GFX9_TESS
            } else if self.shaders.gs_enabled {
                GFX9_GS
            } else {
                GFX9_VS
            }
        } else if self.shaders.tess_enabled {
            PRE_GFX9_TESS
        } else if self.shaders.gs_enabled {
            PRE_GFX9_GS
        } else {
            PRE_GFX9_VS
        };

        let mut issued = PrefetchMask::empty();

        for slot in slots {
            match slot {
                Shader(stage) => {
                    if mask.contains(stage.mask()) {
                        self.prefetch_shader(*stage);
                        issued |= stage.mask();
                    }
                }
                VboDescriptors => {
                    if mask.contains(PrefetchMask::VBO_DESCRIPTORS) {
                        self.prefetch_vbo_descriptors();
                        issued |= PrefetchMask::VBO_DESCRIPTORS;
                    }
                    if vertex_stage_only {
                        // Everything past the descriptor slot waits for
                        // the full pass.
                        self.prefetch_l2_mask &= !issued;
                        return;
                    }
                }
            }
        }

        if mask.contains(PrefetchMask::PS) {
            self.prefetch_shader(ShaderStage::Ps);
        }

        self.prefetch_l2_mask = PrefetchMask::empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chip::ChipFamily;
    use crate::testing::{parse_packets, test_context, DstSel, Packet};
    use alloc::vec::Vec;

    fn prefetch_packets(ctx: &GfxContext) -> Vec<Packet> {
        parse_packets(ctx.cs.words(), ctx.chip().class)
    }

    #[test]
    fn test_prefetch_has_no_side_effects() {
        let (mut ctx, winsys) = test_context(ChipClass::Gfx9, ChipFamily::Vega10);
        let buf = winsys.alloc(8192);

        ctx.prefetch_l2(&buf, 0, 8192);

        let pkts = prefetch_packets(&ctx);
        assert_eq!(pkts.len(), 1);
        assert_eq!(pkts[0].byte_count, 8192);
        assert!(!pkts[0].raw_wait);
        assert!(!pkts[0].cp_sync);
        // On GFX9 a self-copy writes nowhere and only warms L2.
        assert_eq!(pkts[0].dst_sel, DstSel::Nowhere);
        // No buffer-list registration, no flush drain, not counted.
        assert_eq!(ctx.cs.buffer_count(), 0);
        assert_eq!(ctx.num_cache_flushes(), 0);
        assert_eq!(ctx.num_cp_dma_calls(), 0);
        assert!(buf.valid_range().is_empty());
    }

    #[test]
    fn test_prefetch_on_vi_targets_l2() {
        let (mut ctx, winsys) = test_context(ChipClass::Vi, ChipFamily::Fiji);
        let buf = winsys.alloc(4096);

        ctx.prefetch_l2(&buf, 0, 4096);

        let pkts = prefetch_packets(&ctx);
        assert_eq!(pkts[0].dst_sel, DstSel::AddrTcL2);
        assert_eq!(pkts[0].dst_va, pkts[0].src_va);
    }

    fn bind_all(ctx: &mut GfxContext, winsys: &alloc::sync::Arc<crate::testing::TestWinsys>) {
        ctx.shaders.ls = Some(winsys.alloc(0x100));
        ctx.shaders.hs = Some(winsys.alloc(0x200));
        ctx.shaders.es = Some(winsys.alloc(0x300));
        ctx.shaders.gs = Some(winsys.alloc(0x400));
        ctx.shaders.vs = Some(winsys.alloc(0x500));
        ctx.shaders.ps = Some(winsys.alloc(0x600));
        ctx.shaders.vb_descriptors = Some((winsys.alloc(0x1000), 0x80, 0x40));
    }

    fn sizes(pkts: &[Packet]) -> Vec<u32> {
        pkts.iter().map(|p| p.byte_count).collect()
    }

    #[test]
    fn test_gfx9_tess_walk_order() {
        let (mut ctx, winsys) = test_context(ChipClass::Gfx9, ChipFamily::Vega10);
        bind_all(&mut ctx, &winsys);
        ctx.shaders.tess_enabled = true;
        ctx.mark_prefetch(PrefetchMask::all());

        ctx.emit_prefetches(false);

        // HS, VBO descriptors, GS, VS, then PS last.
        assert_eq!(
            sizes(&prefetch_packets(&ctx)),
            alloc::vec![0x200, 0x40, 0x400, 0x500, 0x600]
        );
        assert!(ctx.prefetch_mask().is_empty());
    }

    #[test]
    fn test_pre_gfx9_gs_walk_order() {
        let (mut ctx, winsys) = test_context(ChipClass::Vi, ChipFamily::Fiji);
        bind_all(&mut ctx, &winsys);
        ctx.shaders.gs_enabled = true;
        ctx.mark_prefetch(PrefetchMask::all());

        ctx.emit_prefetches(false);

        // ES, VBO descriptors, GS, VS, PS.
        assert_eq!(
            sizes(&prefetch_packets(&ctx)),
            alloc::vec![0x300, 0x40, 0x400, 0x500, 0x600]
        );
    }

    #[test]
    fn test_vertex_stage_only_keeps_rest_pending() {
        let (mut ctx, winsys) = test_context(ChipClass::Gfx9, ChipFamily::Vega10);
        bind_all(&mut ctx, &winsys);
        ctx.shaders.gs_enabled = true;
        ctx.mark_prefetch(PrefetchMask::all());

        ctx.emit_prefetches(true);

        // GS and the descriptor table only.
        assert_eq!(sizes(&prefetch_packets(&ctx)), alloc::vec![0x400, 0x40]);
        let pending = ctx.prefetch_mask();
        assert!(!pending.contains(PrefetchMask::GS));
        assert!(!pending.contains(PrefetchMask::VBO_DESCRIPTORS));
        assert!(pending.contains(PrefetchMask::VS));
        assert!(pending.contains(PrefetchMask::PS));
    }

    #[test]
    fn test_second_pass_issues_the_remainder() {
        let (mut ctx, winsys) = test_context(ChipClass::Gfx9, ChipFamily::Vega10);
        bind_all(&mut ctx, &winsys);
        ctx.mark_prefetch(PrefetchMask::all());

        ctx.emit_prefetches(true);
        let first = prefetch_packets(&ctx).len();
        ctx.emit_prefetches(false);

        // VS + VBO in the first pass, PS in the second.
        assert_eq!(first, 2);
        assert_eq!(prefetch_packets(&ctx).len(), 3);
        assert!(ctx.prefetch_mask().is_empty());

        // A further call with nothing pending is a no-op.
        ctx.emit_prefetches(false);
        assert_eq!(prefetch_packets(&ctx).len(), 3);
    }

    #[test]
    fn test_unbound_stages_are_skipped() {
        let (mut ctx, winsys) = test_context(ChipClass::Gfx9, ChipFamily::Vega10);
        ctx.shaders.vs = Some(winsys.alloc(0x500));
        // No descriptor table bound.
        ctx.mark_prefetch(PrefetchMask::VS | PrefetchMask::VBO_DESCRIPTORS);

        ctx.emit_prefetches(false);

        assert_eq!(sizes(&prefetch_packets(&ctx)), alloc::vec![0x500]);
        assert!(ctx.prefetch_mask().is_empty());
    }
}
