//! Per-process virtual address space (spec.md §4.6/§4.9)
//!
//! Ties together the supplemental page table (C7), the frame allocator
//! (C6) and the `arch::pagetable::AddressSpace` collaborator into the
//! single handle a [`crate::sched::task::Thread`] owns. Grounded on
//! `vas.rs`'s `VirtualAddressSpace` (mapping bookkeeping, fork, mmap,
//! brk, stack-top fields) but replaced wholesale with spec.md's simpler,
//! CoW-based SPT model instead of the teacher's direct page-table-walk
//! mapping list.

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use spin::Mutex;

use crate::arch;
use crate::config::USER_STACK_LIMIT_BYTES;
use crate::error::{FsError, KernelResult};
use crate::fs::file::File;
use crate::mm::frame::FrameAllocator;
use crate::mm::page::PageOwner;
use crate::mm::spt::SupplementalPageTable;
use crate::mm::vmm::MmapRegion;
use crate::mm::VirtualAddress;

pub struct AddressSpace {
    spt: SupplementalPageTable,
    arch: Box<dyn arch::pagetable::AddressSpace>,
    frames: Arc<FrameAllocator>,
    mmaps: Vec<MmapRegion>,
    stack_top: VirtualAddress,
    executing_file: Option<Arc<File>>,
}

impl AddressSpace {
    pub fn new(arch_space: Box<dyn arch::pagetable::AddressSpace>, frames: Arc<FrameAllocator>, stack_top: VirtualAddress) -> Self {
        AddressSpace {
            spt: SupplementalPageTable::new(),
            arch: arch_space,
            frames,
            mmaps: Vec::new(),
            stack_top,
            executing_file: None,
        }
    }

    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    pub fn spt_mut(&mut self) -> &mut SupplementalPageTable {
        &mut self.spt
    }

    pub fn frames(&self) -> &Arc<FrameAllocator> {
        &self.frames
    }

    pub fn stack_top(&self) -> VirtualAddress {
        self.stack_top
    }

    pub fn set_stack_top(&mut self, top: VirtualAddress) {
        self.stack_top = top;
    }

    pub fn set_executing_file(&mut self, file: Arc<File>) {
        self.executing_file = Some(file);
    }

    /// `mmap(addr, length, writable, file, offset)`: reopens the file to
    /// get an independent cursor (the caller passes the already-reopened
    /// handle) and records the resulting region (spec.md §4.5).
    pub fn mmap(
        self_handle: &Arc<Mutex<AddressSpace>>,
        addr: VirtualAddress,
        length: usize,
        writable: bool,
        file: Arc<File>,
    ) -> KernelResult<VirtualAddress> {
        let mut guard = self_handle.lock();
        let owner: Weak<dyn PageOwner> = Arc::downgrade(self_handle) as Weak<dyn PageOwner>;
        let region = MmapRegion::create(&mut guard.spt, owner, addr, length, writable, file)?;
        let base = region.base();
        guard.mmaps.push(region);
        Ok(base)
    }

    /// `munmap(addr)`: locates the region by base and tears it down.
    pub fn munmap(&mut self, addr: VirtualAddress) -> KernelResult<()> {
        let idx = self.mmaps.iter().position(|m| m.base() == addr).ok_or(FsError::NotFound)?;
        let region = self.mmaps.remove(idx);
        region.unmap(&mut self.spt, &self.frames);
        Ok(())
    }

    /// Kill: writes back and releases every mmap region, then destroys
    /// every remaining page (each frees its frame iff sole sharer).
    pub fn destroy(&mut self) {
        for region in self.mmaps.drain(..) {
            region.unmap(&mut self.spt, &self.frames);
        }
        let vaddrs: Vec<VirtualAddress> = self.spt.iter().map(|p| p.vaddr()).collect();
        for va in vaddrs {
            if let Some(page) = self.spt.remove(va) {
                page.release(&self.frames);
            }
        }
        self.executing_file = None;
    }
}

impl PageOwner for Mutex<AddressSpace> {
    fn is_accessed(&self, va: VirtualAddress) -> bool {
        self.lock().arch.is_accessed(va)
    }
    fn clear_accessed(&self, va: VirtualAddress) {
        self.lock().arch.clear_accessed(va);
    }
    fn is_dirty(&self, va: VirtualAddress) -> bool {
        self.lock().arch.is_dirty(va)
    }
    fn clear_dirty(&self, va: VirtualAddress) {
        self.lock().arch.clear_dirty(va);
    }
    fn map(&self, va: VirtualAddress, frame: crate::mm::frame::FrameNumber, writable: bool) {
        self.lock().arch.map(va, frame, writable);
    }
    fn unmap(&self, va: VirtualAddress) {
        self.lock().arch.unmap(va);
    }
}

/// `fork()`'s address-space half (spec.md §4.9): allocates a fresh
/// page-map root and copies the source SPT via the copy-on-write path.
pub fn fork(
    src: &Arc<Mutex<AddressSpace>>,
    arch_space: Box<dyn arch::pagetable::AddressSpace>,
) -> Arc<Mutex<AddressSpace>> {
    let (frames, stack_top) = {
        let guard = src.lock();
        (guard.frames.clone(), guard.stack_top)
    };
    let dest = Arc::new(Mutex::new(AddressSpace::new(arch_space, frames, stack_top)));
    let dest_owner: Weak<dyn PageOwner> = Arc::downgrade(&dest) as Weak<dyn PageOwner>;
    {
        let src_guard = src.lock();
        let mut dest_guard = dest.lock();
        src_guard.spt.copy_into(&mut dest_guard.spt, dest_owner);
    }
    dest
}

/// Checks spec.md §4.4's stack-growth heuristic: the fault address must
/// be within the x86-64 push red zone of `rsp`, below the stack top, and
/// no more than [`USER_STACK_LIMIT_BYTES`] below it.
pub fn is_stack_growth(fault: VirtualAddress, rsp: usize, stack_top: VirtualAddress) -> bool {
    let f = fault.as_usize();
    let top = stack_top.as_usize();
    let red_zone_ok = rsp.checked_sub(8).map(|floor| f >= floor).unwrap_or(true);
    red_zone_ok && f < top && top - f <= USER_STACK_LIMIT_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pagetable::fake::FakeAddressSpace;
    use crate::mm::page::UninitPayload;

    fn fresh() -> Arc<Mutex<AddressSpace>> {
        let frames = Arc::new(FrameAllocator::new(16));
        Arc::new(Mutex::new(AddressSpace::new(Box::new(FakeAddressSpace::new()), frames, VirtualAddress::new(0x8000_0000))))
    }

    #[test]
    fn fork_shares_frames_via_cow() {
        let src = fresh();
        {
            let mut guard = src.lock();
            let owner: Weak<dyn PageOwner> = Arc::downgrade(&src) as Weak<dyn PageOwner>;
            guard.spt_mut().alloc_with_initializer(VirtualAddress::new(0x1000), true, UninitPayload::Anon, owner);
            let page = guard.spt().lookup(VirtualAddress::new(0x1000)).unwrap();
            let frames = guard.frames().clone();
            page.fault_in(&frames).unwrap();
        }
        let dest = fork(&src, Box::new(FakeAddressSpace::new()));
        assert_eq!(dest.lock().spt().len(), 1);
        assert!(dest.lock().spt().lookup(VirtualAddress::new(0x1000)).unwrap().is_resident());
    }

    #[test]
    fn stack_growth_within_one_mib_is_accepted() {
        let top = VirtualAddress::new(0x8000_0000);
        assert!(is_stack_growth(VirtualAddress::new(0x7FF0_0000), 0x7FF0_0010, top));
    }

    #[test]
    fn stack_growth_beyond_one_mib_is_rejected() {
        let top = VirtualAddress::new(0x8000_0000);
        assert!(!is_stack_growth(VirtualAddress::new(0x7E00_0000), 0x7E00_0010, top));
    }
}
