//! CP DMA packet encoding.
//!
//! Two wire formats exist: the original `CP_DMA` packet (pre-CIK), which
//! packs the upper source address bits into the header word, and the
//! extended `DMA_DATA` packet (CIK+) with full 64-bit addressing. A call
//! encodes exactly one of them, chosen by the generation tier, plus an
//! optional trailing `PFP_SYNC_ME` companion packet.

use bitflags::bitflags;

use crate::chip::ChipClass;
use crate::coherency::CachePolicy;
use crate::context::CmdStream;

bitflags! {
    /// Per-packet control flags, assembled per chunk by the sequencer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CpDmaFlags: u32 {
        /// Make the ME wait until the transfer retires. Set on the last
        /// packet of a logical request.
        const SYNC = 1 << 0;
        /// Wait for a previous CP DMA write to the source to land before
        /// reading it (read-after-write hazard between two packets).
        const RAW_WAIT = 1 << 1;
        /// The source operand is an immediate 32-bit fill value.
        const CLEAR = 1 << 3;
        /// Emit a PFP_SYNC_ME packet after the transfer. CP DMA executes
        /// in the ME, but index buffers are read by the PFP; this keeps
        /// the PFP from fetching ahead of the engine.
        const PFP_SYNC_ME = 1 << 4;
    }
}

// PKT3 opcodes.
pub(crate) const PKT3_CP_DMA: u32 = 0x41;
pub(crate) const PKT3_PFP_SYNC_ME: u32 = 0x42;
pub(crate) const PKT3_DMA_DATA: u32 = 0x50;

/// Upper bound on the words one call may emit (DMA_DATA + PFP_SYNC_ME).
pub(crate) const CP_DMA_PACKET_MAX_WORDS: usize = 9;

pub(crate) const fn pkt3(op: u32, count: u32) -> u32 {
    (3 << 30) | (count << 16) | (op << 8)
}

pub(crate) const fn pkt3_opcode(header: u32) -> u32 {
    (header >> 8) & 0xff
}

// Header word fields.
const fn s_411_src_addr_hi(x: u32) -> u32 {
    x & 0xffff
}
const fn s_411_dst_sel(x: u32) -> u32 {
    (x & 0x3) << 20
}
const fn s_411_src_sel(x: u32) -> u32 {
    (x & 0x3) << 29
}
pub(crate) const S_411_CP_SYNC: u32 = 1 << 31;

const V_411_DATA: u32 = 2;
const V_411_NOWHERE: u32 = 2;
const V_411_DST_ADDR_TC_L2: u32 = 3;
const V_411_SRC_ADDR_TC_L2: u32 = 3;

// Command word fields. GFX9 widened the byte count, which moved the
// write-confirmation bit.
pub(crate) const BYTE_COUNT_MASK_GFX6: u32 = 0x1f_ffff;
pub(crate) const BYTE_COUNT_MASK_GFX9: u32 = 0x3ff_ffff;
pub(crate) const S_414_DISABLE_WR_CONFIRM_GFX6: u32 = 1 << 21;
pub(crate) const S_414_DISABLE_WR_CONFIRM_GFX9: u32 = 1 << 27;
pub(crate) const S_414_RAW_WAIT: u32 = 1 << 30;

pub(crate) const fn g_414_byte_count_gfx6(command: u32) -> u32 {
    command & BYTE_COUNT_MASK_GFX6
}
pub(crate) const fn g_414_byte_count_gfx9(command: u32) -> u32 {
    command & BYTE_COUNT_MASK_GFX9
}

/// Emit one CP DMA packet that copies `size` bytes from `src_va` to
/// `dst_va`, or clears `dst_va` when [`CpDmaFlags::CLEAR`] is set (then
/// `src_va` carries the 32-bit fill value). The size must fit in the
/// generation's byte-count field.
pub fn emit_cp_dma(
    cs: &mut CmdStream,
    chip_class: ChipClass,
    dst_va: u64,
    src_va: u64,
    size: u32,
    flags: CpDmaFlags,
    cache_policy: CachePolicy,
) {
    let mut header: u32 = 0;
    let mut command: u32 = 0;

    debug_assert!(u64::from(size) <= chip_class.cp_dma_max_byte_count());
    debug_assert!(chip_class != ChipClass::Si || cache_policy == CachePolicy::L2Bypass);

    command |= if chip_class >= ChipClass::Gfx9 {
        size & BYTE_COUNT_MASK_GFX9
    } else {
        size & BYTE_COUNT_MASK_GFX6
    };

    // Sync flags.
    if flags.contains(CpDmaFlags::SYNC) {
        header |= S_411_CP_SYNC;
    } else {
        command |= if chip_class >= ChipClass::Gfx9 {
            S_414_DISABLE_WR_CONFIRM_GFX9
        } else {
            S_414_DISABLE_WR_CONFIRM_GFX6
        };
    }

    if flags.contains(CpDmaFlags::RAW_WAIT) {
        command |= S_414_RAW_WAIT;
    }

    // Src and dst selects.
    if chip_class >= ChipClass::Gfx9 && !flags.contains(CpDmaFlags::CLEAR) && src_va == dst_va {
        // Prefetch only: data is pulled into L2 but written nowhere.
        header |= s_411_dst_sel(V_411_NOWHERE);
    } else if chip_class >= ChipClass::Cik && cache_policy != CachePolicy::L2Bypass {
        header |= s_411_dst_sel(V_411_DST_ADDR_TC_L2);
    }

    if flags.contains(CpDmaFlags::CLEAR) {
        header |= s_411_src_sel(V_411_DATA);
    } else if chip_class >= ChipClass::Cik && cache_policy != CachePolicy::L2Bypass {
        header |= s_411_src_sel(V_411_SRC_ADDR_TC_L2);
    }

    if chip_class >= ChipClass::Cik {
        cs.emit(pkt3(PKT3_DMA_DATA, 5));
        cs.emit(header);
        cs.emit(src_va as u32); // SRC_ADDR_LO [31:0]
        cs.emit((src_va >> 32) as u32); // SRC_ADDR_HI [31:0]
        cs.emit(dst_va as u32); // DST_ADDR_LO [31:0]
        cs.emit((dst_va >> 32) as u32); // DST_ADDR_HI [31:0]
        cs.emit(command);
    } else {
        header |= s_411_src_addr_hi((src_va >> 32) as u32);

        cs.emit(pkt3(PKT3_CP_DMA, 4));
        cs.emit(src_va as u32); // SRC_ADDR_LO [31:0]
        cs.emit(header); // SRC_ADDR_HI [15:0] + flags
        cs.emit(dst_va as u32); // DST_ADDR_LO [31:0]
        cs.emit(((dst_va >> 32) & 0xffff) as u32); // DST_ADDR_HI [15:0]
        cs.emit(command);
    }

    if flags.contains(CpDmaFlags::PFP_SYNC_ME) {
        cs.emit(pkt3(PKT3_PFP_SYNC_ME, 0));
        cs.emit(0);
    }
}
