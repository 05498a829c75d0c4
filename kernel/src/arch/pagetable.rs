//! Four-level page table collaborator (spec.md §1 OUT OF SCOPE — modeled
//! as a trait so the core triad stays host-testable)
//!
//! Real x86-64 paging setup lives in `arch::x86_64::mmu`; this trait is
//! the narrow seam `mm::vas::AddressSpace` needs from it: map/unmap one
//! page at a time and query/clear the hardware accessed and dirty bits.

extern crate alloc;

use crate::mm::frame::FrameNumber;
use crate::mm::VirtualAddress;

pub trait AddressSpace: Send + Sync {
    fn map(&self, va: VirtualAddress, frame: FrameNumber, writable: bool);
    fn unmap(&self, va: VirtualAddress);
    fn translate(&self, va: VirtualAddress) -> Option<FrameNumber>;
    fn is_accessed(&self, va: VirtualAddress) -> bool;
    fn clear_accessed(&self, va: VirtualAddress);
    fn is_dirty(&self, va: VirtualAddress) -> bool;
    fn clear_dirty(&self, va: VirtualAddress);
}

/// Picks the collaborator a freshly created address space should use:
/// the deterministic fake everywhere this crate is actually exercised
/// (host build, unit tests), and the real four-level-walk backend on
/// bare metal.
pub fn backend() -> alloc::boxed::Box<dyn AddressSpace> {
    #[cfg(any(test, not(target_os = "none")))]
    {
        alloc::boxed::Box::new(fake::FakeAddressSpace::new())
    }
    #[cfg(not(any(test, not(target_os = "none"))))]
    {
        alloc::boxed::Box::new(bare::Amd64PageTable::new())
    }
}

/// Real PML4-rooted page table walker. Not yet implemented: needs to
/// walk `arch::x86_64::mmu`'s page tables a level at a time instead of
/// just flipping CR3, which `mmu` only supports at the whole-address-
/// space granularity today.
#[cfg(not(any(test, not(target_os = "none"))))]
mod bare {
    use super::*;

    pub struct Amd64PageTable;

    impl Amd64PageTable {
        pub fn new() -> Self {
            Amd64PageTable
        }
    }

    impl AddressSpace for Amd64PageTable {
        fn map(&self, _va: VirtualAddress, _frame: FrameNumber, _writable: bool) {
            todo!("walk and populate the PML4/PDPT/PD/PT chain")
        }
        fn unmap(&self, _va: VirtualAddress) {
            todo!("clear the PTE and invalidate the TLB entry")
        }
        fn translate(&self, _va: VirtualAddress) -> Option<FrameNumber> {
            todo!("walk the PML4/PDPT/PD/PT chain read-only")
        }
        fn is_accessed(&self, _va: VirtualAddress) -> bool {
            todo!("read the PTE's accessed bit")
        }
        fn clear_accessed(&self, _va: VirtualAddress) {
            todo!("clear the PTE's accessed bit")
        }
        fn is_dirty(&self, _va: VirtualAddress) -> bool {
            todo!("read the PTE's dirty bit")
        }
        fn clear_dirty(&self, _va: VirtualAddress) {
            todo!("clear the PTE's dirty bit")
        }
    }
}

/// Deterministic in-memory fake used on the host and in unit tests: a
/// plain map from VA to (frame, writable, accessed, dirty) instead of
/// real PTEs.
#[cfg(any(test, not(target_os = "none")))]
pub mod fake {
    use super::*;
    use alloc::collections::BTreeMap;
    use spin::Mutex;

    #[derive(Clone, Copy)]
    struct Entry {
        frame: FrameNumber,
        writable: bool,
        accessed: bool,
        dirty: bool,
    }

    #[derive(Default)]
    pub struct FakeAddressSpace {
        entries: Mutex<BTreeMap<u64, Entry>>,
    }

    impl FakeAddressSpace {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl AddressSpace for FakeAddressSpace {
        fn map(&self, va: VirtualAddress, frame: FrameNumber, writable: bool) {
            self.entries.lock().insert(va.as_u64(), Entry { frame, writable, accessed: true, dirty: false });
        }

        fn unmap(&self, va: VirtualAddress) {
            self.entries.lock().remove(&va.as_u64());
        }

        fn translate(&self, va: VirtualAddress) -> Option<FrameNumber> {
            self.entries.lock().get(&va.as_u64()).map(|e| e.frame)
        }

        fn is_accessed(&self, va: VirtualAddress) -> bool {
            self.entries.lock().get(&va.as_u64()).map(|e| e.accessed).unwrap_or(false)
        }

        fn clear_accessed(&self, va: VirtualAddress) {
            if let Some(e) = self.entries.lock().get_mut(&va.as_u64()) {
                e.accessed = false;
            }
        }

        fn is_dirty(&self, va: VirtualAddress) -> bool {
            self.entries.lock().get(&va.as_u64()).map(|e| e.dirty).unwrap_or(false)
        }

        fn clear_dirty(&self, va: VirtualAddress) {
            if let Some(e) = self.entries.lock().get_mut(&va.as_u64()) {
                e.dirty = false;
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn map_then_translate_round_trips() {
            let space = FakeAddressSpace::new();
            space.map(VirtualAddress::new(0x1000), FrameNumber::new(3), true);
            assert_eq!(space.translate(VirtualAddress::new(0x1000)), Some(FrameNumber::new(3)));
        }

        #[test]
        fn unmap_clears_translation() {
            let space = FakeAddressSpace::new();
            space.map(VirtualAddress::new(0x1000), FrameNumber::new(3), true);
            space.unmap(VirtualAddress::new(0x1000));
            assert_eq!(space.translate(VirtualAddress::new(0x1000)), None);
        }
    }
}
