//! Virtual memory subsystem (spec.md C6-C9): frame allocation with
//! clock/second-chance eviction, a per-process supplemental page table,
//! Uninit/Anon/FileBacked page kinds with copy-on-write and swap, and the
//! page-fault handler that ties them together.

extern crate alloc;

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::config::{PGSIZE, USER_POOL_FRAMES, SWAP_DEVICE_SECTORS};

pub mod fault;
pub mod frame;
pub mod page;
pub mod spt;
pub mod swap;
pub mod vas;
pub mod vmm;

pub use fault::{handle_page_fault, FaultInfo};
pub use frame::{Frame, FrameAllocator, FrameNumber};
pub use page::{AnonPayload, FileBackedPayload, Page, PageKind, UninitPayload};
pub use spt::SupplementalPageTable;
pub use vas::AddressSpace;
pub use vmm::MmapRegion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysicalAddress(pub u64);

impl PhysicalAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_frame(&self) -> FrameNumber {
        FrameNumber::new(self.0 / PGSIZE as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtualAddress(pub u64);

impl VirtualAddress {
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn as_usize(&self) -> usize {
        self.0 as usize
    }

    pub fn round_down(&self) -> Self {
        Self((self.0 / PGSIZE as u64) * PGSIZE as u64)
    }

    pub fn add(&self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }
}

/// Whether a mapping is readable/writable/executable/user-accessible.
/// Trimmed from the placeholder's full x86 PTE bit set down to what
/// `arch::pagetable::AddressSpace` implementations actually need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags {
    pub writable: bool,
    pub user: bool,
    pub executable: bool,
}

impl PageFlags {
    pub const fn new(writable: bool, user: bool, executable: bool) -> Self {
        PageFlags { writable, user, executable }
    }
}

static USER_FRAMES: Mutex<Option<Arc<FrameAllocator>>> = Mutex::new(None);
static NEXT_MMAP_BASE: AtomicU64 = AtomicU64::new(0x4000_0000);

pub fn init() {
    *USER_FRAMES.lock() = Some(Arc::new(FrameAllocator::new(USER_POOL_FRAMES)));
    swap::init(SWAP_DEVICE_SECTORS);
    log::info!("mm: user pool = {USER_POOL_FRAMES} frames, swap = {SWAP_DEVICE_SECTORS} sectors");
}

/// Returns the global user-pool frame allocator, lazily creating a
/// default-sized one so tests that skip [`init`] still work.
pub fn user_frames() -> Arc<FrameAllocator> {
    let mut guard = USER_FRAMES.lock();
    if guard.is_none() {
        *guard = Some(Arc::new(FrameAllocator::new(USER_POOL_FRAMES)));
    }
    guard.as_ref().unwrap().clone()
}

/// Hands out the next unused base address for an `mmap` region. A real
/// allocator would consult the SPT for gaps; this bump strategy is
/// adequate since spec.md never requires reclaiming mmap address ranges
/// between calls within a process's lifetime.
pub fn next_mmap_base(length: usize) -> VirtualAddress {
    let aligned = length.div_ceil(PGSIZE) * PGSIZE;
    let base = NEXT_MMAP_BASE.fetch_add(aligned as u64, Ordering::Relaxed);
    VirtualAddress::new(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_address_rounds_down_to_page_boundary() {
        assert_eq!(VirtualAddress::new(0x1234).round_down(), VirtualAddress::new(0x1000));
    }

    #[test]
    fn mmap_base_advances_by_page_aligned_length() {
        let a = next_mmap_base(10);
        let b = next_mmap_base(10);
        assert_eq!(b.as_u64() - a.as_u64(), PGSIZE as u64);
    }
}
