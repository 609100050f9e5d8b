//! Coherency domains and cache policy selection.
//!
//! Called once per logical request, not per chunk: the domain says which
//! caches must observe the transfer's results, and the policy says
//! whether the transfer leaves its data resident in L2 or writes through.

use bitflags::bitflags;

use crate::chip::ChipClass;

/// Which cache levels a transfer's results must be visible through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coherency {
    /// No visibility requirement.
    None,
    /// Results are read by shaders.
    Shader,
    /// Results are color-buffer metadata (DCC/CMASK).
    CbMeta,
}

/// L2 residency requested by a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Write through and evict.
    L2Bypass,
    /// Leave the data resident in L2 (LRU).
    L2Lru,
}

bitflags! {
    /// Outstanding cache-flush state accumulated on the execution
    /// context and drained before the first chunk of a request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextFlags: u32 {
        /// Invalidate the scalar (constant) L1 cache.
        const INV_SMEM_L1 = 1 << 0;
        /// Invalidate the vector L1 cache.
        const INV_VMEM_L1 = 1 << 1;
        /// Invalidate the shared L2 cache.
        const INV_GLOBAL_L2 = 1 << 2;
        /// Flush and invalidate the color-buffer cache.
        const FLUSH_AND_INV_CB = 1 << 3;
        /// Wait for pixel shaders before the transfer.
        const PS_PARTIAL_FLUSH = 1 << 4;
        /// Wait for compute shaders before the transfer.
        const CS_PARTIAL_FLUSH = 1 << 5;
    }
}

/// Cache-flush bits that must be raised before a transfer in `coher`.
pub fn get_flush_flags(
    chip_class: ChipClass,
    coher: Coherency,
    cache_policy: CachePolicy,
) -> ContextFlags {
    match coher {
        Coherency::None => ContextFlags::empty(),
        Coherency::Shader => {
            // SI has no L2-resident transfers, so shader reads must go
            // through an invalidated L2.
            debug_assert!(chip_class != ChipClass::Si || cache_policy == CachePolicy::L2Bypass);
            ContextFlags::INV_SMEM_L1
                | ContextFlags::INV_VMEM_L1
                | if cache_policy == CachePolicy::L2Bypass {
                    ContextFlags::INV_GLOBAL_L2
                } else {
                    ContextFlags::empty()
                }
        }
        Coherency::CbMeta => {
            debug_assert!(if chip_class >= ChipClass::Gfx9 {
                cache_policy != CachePolicy::L2Bypass
            } else {
                cache_policy == CachePolicy::L2Bypass
            });
            ContextFlags::FLUSH_AND_INV_CB
        }
    }
}

/// The cache residency a transfer in `coher` should request on this
/// generation.
pub fn get_cache_policy(chip_class: ChipClass, coher: Coherency) -> CachePolicy {
    if (chip_class >= ChipClass::Gfx9 && coher == Coherency::CbMeta)
        || (chip_class >= ChipClass::Cik && coher == Coherency::Shader)
    {
        return CachePolicy::L2Lru;
    }

    CachePolicy::L2Bypass
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_domain_never_flushes() {
        for policy in [CachePolicy::L2Bypass, CachePolicy::L2Lru] {
            assert_eq!(
                get_flush_flags(ChipClass::Gfx9, Coherency::None, policy),
                ContextFlags::empty()
            );
        }
    }

    #[test]
    fn test_shader_domain_l2_invalidate_follows_policy() {
        let bypass = get_flush_flags(ChipClass::Cik, Coherency::Shader, CachePolicy::L2Bypass);
        assert!(bypass.contains(ContextFlags::INV_SMEM_L1 | ContextFlags::INV_VMEM_L1));
        assert!(bypass.contains(ContextFlags::INV_GLOBAL_L2));

        let lru = get_flush_flags(ChipClass::Cik, Coherency::Shader, CachePolicy::L2Lru);
        assert!(lru.contains(ContextFlags::INV_SMEM_L1 | ContextFlags::INV_VMEM_L1));
        assert!(!lru.contains(ContextFlags::INV_GLOBAL_L2));
    }

    #[test]
    fn test_cb_meta_flushes_cb_unconditionally() {
        assert_eq!(
            get_flush_flags(ChipClass::Gfx9, Coherency::CbMeta, CachePolicy::L2Lru),
            ContextFlags::FLUSH_AND_INV_CB
        );
        assert_eq!(
            get_flush_flags(ChipClass::Vi, Coherency::CbMeta, CachePolicy::L2Bypass),
            ContextFlags::FLUSH_AND_INV_CB
        );
    }

    #[test]
    fn test_cache_policy_by_generation() {
        // SI always bypasses.
        assert_eq!(
            get_cache_policy(ChipClass::Si, Coherency::Shader),
            CachePolicy::L2Bypass
        );
        // CIK+ keeps shader-visible transfers resident.
        assert_eq!(
            get_cache_policy(ChipClass::Cik, Coherency::Shader),
            CachePolicy::L2Lru
        );
        // CB metadata only becomes resident on GFX9.
        assert_eq!(
            get_cache_policy(ChipClass::Vi, Coherency::CbMeta),
            CachePolicy::L2Bypass
        );
        assert_eq!(
            get_cache_policy(ChipClass::Gfx9, Coherency::CbMeta),
            CachePolicy::L2Lru
        );
        // The no-coherency domain never asks for residency.
        assert_eq!(
            get_cache_policy(ChipClass::Gfx9, Coherency::None),
            CachePolicy::L2Bypass
        );
    }
}
