//! Hardware generation and device family classification.
//!
//! The generation tier decides packet layout, the maximum chunk size and
//! which cache-residency modes exist. The device family (finer grained
//! than the tier) decides which alignment workarounds apply.

use crate::packet;
use crate::CP_DMA_ALIGNMENT;

/// GPU generation tier, ordered oldest to newest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChipClass {
    /// Southern Islands (pre-CIK). No L2-resident transfers.
    Si,
    /// Sea Islands. Adds L2-resident CP DMA and the L2 prefetch path.
    Cik,
    /// Volcanic Islands.
    Vi,
    /// Vega and newer. Extended byte-count field and prefetch-only
    /// destination select.
    Gfx9,
}

impl ChipClass {
    /// The max number of bytes that can be copied per packet, rounded
    /// down to the DMA alignment granularity for optimal performance.
    pub fn cp_dma_max_byte_count(self) -> u64 {
        let max = if self >= ChipClass::Gfx9 {
            packet::BYTE_COUNT_MASK_GFX9
        } else {
            packet::BYTE_COUNT_MASK_GFX6
        };

        u64::from(max) & !(CP_DMA_ALIGNMENT - 1)
    }

    /// Whether transfers may request L2-resident caching at all.
    pub fn has_tc_l2(self) -> bool {
        self >= ChipClass::Cik
    }
}

/// Device family, ordered by release. The ordering is relied on for the
/// workaround gate below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChipFamily {
    Tahiti,
    Pitcairn,
    Verde,
    Oland,
    Hainan,
    Bonaire,
    Kaveri,
    Kabini,
    Hawaii,
    Mullins,
    Tonga,
    Iceland,
    Carrizo,
    Fiji,
    Stoney,
    Polaris10,
    Polaris11,
    Polaris12,
    Vega10,
    Vega12,
    Raven,
}

/// Immutable identification of the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipInfo {
    pub class: ChipClass,
    pub family: ChipFamily,
}

impl ChipInfo {
    pub const fn new(class: ChipClass, family: ChipFamily) -> Self {
        Self { class, family }
    }

    /// Whether the DMA progress counter requires 256-byte-aligned transfer
    /// sizes. Unaligned transfers on these families slow every following
    /// transfer down by an order of magnitude, so the sequencer realigns
    /// the engine with a dummy copy. Not needed on Fiji and beyond.
    pub fn needs_cp_dma_alignment_workaround(&self) -> bool {
        self.family <= ChipFamily::Carrizo || self.family == ChipFamily::Stoney
    }
}
