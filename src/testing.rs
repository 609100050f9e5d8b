//! Shared fixtures for the unit tests: fake collaborators and a command
//! stream decoder that parses emitted packets back into fields.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use spin::Mutex;

use crate::buffer::{Buffer, BufferFlags};
use crate::chip::{ChipClass, ChipFamily, ChipInfo};
use crate::context::{GfxContext, SdmaEngine, Winsys};
use crate::packet::{
    g_414_byte_count_gfx6, g_414_byte_count_gfx9, pkt3_opcode, PKT3_CP_DMA, PKT3_DMA_DATA,
    S_411_CP_SYNC, S_414_DISABLE_WR_CONFIRM_GFX6, S_414_DISABLE_WR_CONFIRM_GFX9, S_414_RAW_WAIT,
};
use crate::{Error, Result};

/// Fake allocator/staging layer. Hands out ascending page-aligned GPU
/// addresses and records staging writes by absolute address.
pub(crate) struct TestWinsys {
    next_va: Mutex<u64>,
    created: AtomicUsize,
    fail_next: AtomicBool,
    writes: Mutex<Vec<(u64, Vec<u8>)>>,
}

impl TestWinsys {
    pub fn new() -> Self {
        Self {
            next_va: Mutex::new(0x10_0000),
            created: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        }
    }

    fn next_va(&self, size: u64, alignment: u64) -> u64 {
        let mut next = self.next_va.lock();
        let va = (*next + alignment - 1) & !(alignment - 1);
        *next = va + size;
        va
    }

    /// Hand out a buffer directly, without going through the
    /// [`Winsys`] seam (so it doesn't show up in [`Self::alloc_count`]).
    pub fn alloc(&self, size: u64) -> Arc<Buffer> {
        Arc::new(Buffer::new(self.next_va(size, 4096), size, BufferFlags::empty()))
    }

    pub fn alloc_sparse(&self, size: u64) -> Arc<Buffer> {
        Arc::new(Buffer::new(self.next_va(size, 4096), size, BufferFlags::SPARSE))
    }

    /// Make the next [`Winsys::create_buffer`] call fail.
    pub fn fail_next_alloc(&self) {
        self.fail_next.store(true, Ordering::Release);
    }

    /// Number of buffers allocated through the [`Winsys`] seam.
    pub fn alloc_count(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    /// Staging writes as (absolute GPU address, bytes) pairs.
    pub fn writes(&self) -> Vec<(u64, Vec<u8>)> {
        self.writes.lock().clone()
    }
}

impl Winsys for TestWinsys {
    fn create_buffer(&self, size: u64, alignment: u64) -> Result<Arc<Buffer>> {
        if self.fail_next.swap(false, Ordering::AcqRel) {
            return Err(Error::OutOfDeviceMemory);
        }
        self.created.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(Buffer::new(
            self.next_va(size, alignment),
            size,
            BufferFlags::empty(),
        )))
    }

    fn write_buffer(&self, buf: &Arc<Buffer>, offset: u64, data: &[u8]) {
        self.writes
            .lock()
            .push((buf.gpu_address() + offset, data.to_vec()));
    }
}

/// Fake SDMA engine recording clears as (offset, size, value). Clones
/// share the record, so tests can keep a handle after boxing one into
/// the context.
#[derive(Clone)]
pub(crate) struct TestSdma {
    clears: Arc<Mutex<Vec<(u64, u64, u32)>>>,
}

impl TestSdma {
    pub fn handle() -> Self {
        Self {
            clears: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn clears(&self) -> Vec<(u64, u64, u32)> {
        self.clears.lock().clone()
    }
}

impl SdmaEngine for TestSdma {
    fn clear_buffer(&mut self, _dst: &Arc<Buffer>, offset: u64, size: u64, value: u32) {
        self.clears.lock().push((offset, size, value));
    }
}

pub(crate) fn test_context(class: ChipClass, family: ChipFamily) -> (GfxContext, Arc<TestWinsys>) {
    let winsys = Arc::new(TestWinsys::new());
    let ctx = GfxContext::new(ChipInfo::new(class, family), winsys.clone());
    (ctx, winsys)
}

/// Destination operand select decoded from a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DstSel {
    Addr,
    Nowhere,
    AddrTcL2,
}

/// Source operand select decoded from a packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SrcSel {
    Addr,
    Data,
    AddrTcL2,
}

/// One decoded PKT3 packet. For PFP_SYNC_ME only `raw_header` carries
/// meaning; the rest stays zeroed.
#[derive(Debug, Clone)]
pub(crate) struct Packet {
    pub raw_header: u32,
    pub command: u32,
    pub byte_count: u32,
    pub cp_sync: bool,
    pub raw_wait: bool,
    pub wr_confirm_disabled: bool,
    pub src_sel: SrcSel,
    pub dst_sel: DstSel,
    pub src_va: u64,
    pub dst_va: u64,
}

fn decode_dst_sel(header: u32) -> DstSel {
    match (header >> 20) & 0x3 {
        2 => DstSel::Nowhere,
        3 => DstSel::AddrTcL2,
        _ => DstSel::Addr,
    }
}

fn decode_src_sel(header: u32) -> SrcSel {
    match (header >> 29) & 0x3 {
        2 => SrcSel::Data,
        3 => SrcSel::AddrTcL2,
        _ => SrcSel::Addr,
    }
}

fn decode_body(raw_header: u32, header: u32, command: u32, class: ChipClass) -> Packet {
    let (byte_count, wr_confirm_disabled) = if class >= ChipClass::Gfx9 {
        (
            g_414_byte_count_gfx9(command),
            command & S_414_DISABLE_WR_CONFIRM_GFX9 != 0,
        )
    } else {
        (
            g_414_byte_count_gfx6(command),
            command & S_414_DISABLE_WR_CONFIRM_GFX6 != 0,
        )
    };

    Packet {
        raw_header,
        command,
        byte_count,
        cp_sync: header & S_411_CP_SYNC != 0,
        raw_wait: command & S_414_RAW_WAIT != 0,
        wr_confirm_disabled,
        src_sel: decode_src_sel(header),
        dst_sel: decode_dst_sel(header),
        src_va: 0,
        dst_va: 0,
    }
}

/// Walk a command stream and decode every PKT3 packet in it.
pub(crate) fn parse_packets(words: &[u32], class: ChipClass) -> Vec<Packet> {
    let mut packets = Vec::new();
    let mut i = 0;

    while i < words.len() {
        let raw_header = words[i];
        assert_eq!(raw_header >> 30, 3, "not a PKT3 header at word {}", i);
        let payload = (((raw_header >> 16) & 0x3fff) + 1) as usize;
        let body = &words[i + 1..i + 1 + payload];

        match pkt3_opcode(raw_header) {
            PKT3_DMA_DATA => {
                assert_eq!(payload, 6);
                let header = body[0];
                let mut pkt = decode_body(raw_header, header, body[5], class);
                pkt.src_va = u64::from(body[1]) | (u64::from(body[2]) << 32);
                pkt.dst_va = u64::from(body[3]) | (u64::from(body[4]) << 32);
                packets.push(pkt);
            }
            PKT3_CP_DMA => {
                assert_eq!(payload, 5);
                let header = body[1];
                let mut pkt = decode_body(raw_header, header, body[4], class);
                pkt.src_va = u64::from(body[0]) | (u64::from(header & 0xffff) << 32);
                pkt.dst_va = u64::from(body[2]) | (u64::from(body[3] & 0xffff) << 32);
                packets.push(pkt);
            }
            _ => {
                packets.push(Packet {
                    raw_header,
                    command: 0,
                    byte_count: 0,
                    cp_sync: false,
                    raw_wait: false,
                    wr_confirm_disabled: false,
                    src_sel: SrcSel::Addr,
                    dst_sel: DstSel::Addr,
                    src_va: 0,
                    dst_va: 0,
                });
            }
        }

        i += 1 + payload;
    }

    packets
}
