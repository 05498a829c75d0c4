//! Page fault handler (spec.md §4.4/§4.5/§4.8/§4.9)
//!
//! Grounded on `page_fault.rs`'s classify-then-dispatch shape: figure out
//! what kind of fault this is, then route to the SPT/frame-allocator
//! machinery in C6-C8.

extern crate alloc;

use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::error::{KernelError, KernelResult};
use crate::mm::page::{PageOwner, UninitPayload};
use crate::mm::vas::{is_stack_growth, AddressSpace};
use crate::mm::VirtualAddress;

/// What the fault handler needs to know about a single page fault,
/// independent of how the architecture-specific trap frame encodes it
/// (x86-64's error code is decoded into this shape at the trap seam).
pub struct FaultInfo {
    pub vaddr: VirtualAddress,
    pub write: bool,
    pub present: bool,
    pub user_rsp: usize,
}

/// Resolves one page fault against `space`. Returns `Err` if the access
/// is genuinely invalid (caller should respond with `exit(-1)`).
pub fn handle_page_fault(space: &Arc<Mutex<AddressSpace>>, info: FaultInfo) -> KernelResult<()> {
    let mut guard = space.lock();

    if let Some(page) = guard.spt().lookup(info.vaddr) {
        if info.present && info.write {
            let frames = guard.frames().clone();
            return page.resolve_cow_write(&frames);
        }
        if !page.is_resident() {
            let frames = guard.frames().clone();
            return if page.is_uninit() { page.fault_in(&frames) } else { page.swap_in(&frames) };
        }
        return Ok(());
    }

    if info.write && !info.present && is_stack_growth(info.vaddr, info.user_rsp, guard.stack_top()) {
        let page_va = crate::mm::VirtualAddress::new(round_down(info.vaddr));
        let owner: Weak<dyn PageOwner> = Arc::downgrade(space) as Weak<dyn PageOwner>;
        guard.spt_mut().alloc_with_initializer(page_va, true, UninitPayload::Anon, owner);
        let page = guard.spt().lookup(page_va).expect("just inserted");
        let frames = guard.frames().clone();
        return page.fault_in(&frames);
    }

    Err(KernelError::InvalidAddress { addr: info.vaddr.as_usize() })
}

fn round_down(va: VirtualAddress) -> u64 {
    let pgsize = crate::config::PGSIZE as u64;
    (va.as_u64() / pgsize) * pgsize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pagetable::fake::FakeAddressSpace;
    use crate::mm::frame::FrameAllocator;
    use alloc::boxed::Box;

    fn fresh_space() -> Arc<Mutex<AddressSpace>> {
        let frames = Arc::new(FrameAllocator::new(16));
        Arc::new(Mutex::new(AddressSpace::new(
            Box::new(FakeAddressSpace::new()),
            frames,
            VirtualAddress::new(0x8000_0000),
        )))
    }

    #[test]
    fn not_present_fault_on_uninit_page_populates_it() {
        let space = fresh_space();
        {
            let mut guard = space.lock();
            let owner: Weak<dyn PageOwner> = Arc::downgrade(&space) as Weak<dyn PageOwner>;
            guard.spt_mut().alloc_with_initializer(VirtualAddress::new(0x1000), true, UninitPayload::Anon, owner);
        }
        handle_page_fault(&space, FaultInfo { vaddr: VirtualAddress::new(0x1000), write: false, present: false, user_rsp: 0x7FFF_0000 })
            .unwrap();
        assert!(space.lock().spt().lookup(VirtualAddress::new(0x1000)).unwrap().is_resident());
    }

    #[test]
    fn stack_growth_creates_a_new_anon_page() {
        let space = fresh_space();
        let rsp = 0x7FFF_F000usize;
        let fault_va = VirtualAddress::new((rsp - 0x1000) as u64);
        handle_page_fault(&space, FaultInfo { vaddr: fault_va, write: true, present: false, user_rsp: rsp }).unwrap();
        assert!(space.lock().spt().lookup(fault_va).is_some());
    }

    #[test]
    fn truly_unmapped_address_is_rejected() {
        let space = fresh_space();
        let result = handle_page_fault(
            &space,
            FaultInfo { vaddr: VirtualAddress::new(0x1234_0000_0000), write: false, present: false, user_rsp: 0x7FFF_0000 },
        );
        assert!(result.is_err());
    }
}
