//! Per-process supplemental page table (spec.md §4.6)
//!
//! Grounded on `process/memory.rs`'s per-process VA-space bookkeeping
//! shape, backed by `util::hash::HashTable` keyed on page-aligned VA.

extern crate alloc;

use alloc::sync::{Arc, Weak};

use crate::config::PGSIZE;
use crate::mm::page::{Page, PageOwner, UninitPayload};
use crate::mm::VirtualAddress;
use crate::util::HashTable;

pub struct SupplementalPageTable {
    pages: HashTable<u64, Arc<Page>>,
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        SupplementalPageTable { pages: HashTable::new() }
    }

    fn round_down(va: VirtualAddress) -> u64 {
        (va.as_u64() / PGSIZE as u64) * PGSIZE as u64
    }

    /// Registers a fresh Uninit page. Returns `false` (and drops the
    /// page) on collision, mirroring `hash_insert`'s dedup contract.
    pub fn alloc_with_initializer(
        &mut self,
        vaddr: VirtualAddress,
        writable: bool,
        payload: UninitPayload,
        owner: Weak<dyn PageOwner>,
    ) -> bool {
        let key = Self::round_down(vaddr);
        if self.pages.contains_key(&key) {
            return false;
        }
        let page = Page::new_uninit(VirtualAddress::new(key), writable, payload, owner);
        self.pages.insert(key, page)
    }

    pub fn insert(&mut self, page: Arc<Page>) -> bool {
        let key = Self::round_down(page.vaddr());
        self.pages.insert(key, page)
    }

    /// Looks up the page covering `va`, rounding down to the page
    /// boundary first.
    pub fn lookup(&self, va: VirtualAddress) -> Option<Arc<Page>> {
        self.pages.get(&Self::round_down(va)).cloned()
    }

    pub fn remove(&mut self, va: VirtualAddress) -> Option<Arc<Page>> {
        self.pages.remove(&Self::round_down(va))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Page>> {
        self.pages.iter().map(|(_, v)| v)
    }

    /// Copies every page into `dest`, sharing frames under copy-on-write
    /// per spec.md §4.6's fork contract.
    pub fn copy_into(&self, dest: &mut SupplementalPageTable, dest_owner: Weak<dyn PageOwner>) {
        for (_, page) in self.pages.iter() {
            let cloned = page.cow_clone(dest_owner.clone());
            dest.insert(cloned);
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::frame::FrameAllocator;
    use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeOwner {
        accessed: AtomicBool,
        dirty: AtomicBool,
        mapped: AtomicU64,
    }

    impl PageOwner for FakeOwner {
        fn is_accessed(&self, _va: VirtualAddress) -> bool {
            self.accessed.load(Ordering::Relaxed)
        }
        fn clear_accessed(&self, _va: VirtualAddress) {
            self.accessed.store(false, Ordering::Relaxed);
        }
        fn is_dirty(&self, _va: VirtualAddress) -> bool {
            self.dirty.load(Ordering::Relaxed)
        }
        fn clear_dirty(&self, _va: VirtualAddress) {
            self.dirty.store(false, Ordering::Relaxed);
        }
        fn map(&self, _va: VirtualAddress, frame: crate::mm::frame::FrameNumber, _writable: bool) {
            self.mapped.store(frame.as_u64(), Ordering::Relaxed);
        }
        fn unmap(&self, _va: VirtualAddress) {
            self.mapped.store(u64::MAX, Ordering::Relaxed);
        }
    }

    fn fake_owner() -> Arc<FakeOwner> {
        Arc::new(FakeOwner { accessed: AtomicBool::new(false), dirty: AtomicBool::new(false), mapped: AtomicU64::new(u64::MAX) })
    }

    #[test]
    fn insert_then_lookup_rounds_down() {
        let owner = fake_owner();
        let mut spt = SupplementalPageTable::new();
        spt.alloc_with_initializer(
            VirtualAddress::new(0x1000),
            true,
            UninitPayload::Anon,
            Arc::downgrade(&owner) as Weak<dyn PageOwner>,
        );
        assert!(spt.lookup(VirtualAddress::new(0x1042)).is_some());
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let owner = fake_owner();
        let mut spt = SupplementalPageTable::new();
        assert!(spt.alloc_with_initializer(VirtualAddress::new(0x1000), true, UninitPayload::Anon, Arc::downgrade(&owner) as Weak<dyn PageOwner>));
        assert!(!spt.alloc_with_initializer(VirtualAddress::new(0x1000), true, UninitPayload::Anon, Arc::downgrade(&owner) as Weak<dyn PageOwner>));
    }

    #[test]
    fn copy_into_shares_frame_via_cow() {
        let frames = FrameAllocator::new(4);
        let owner_a = fake_owner();
        let owner_b = fake_owner();
        let mut src = SupplementalPageTable::new();
        src.alloc_with_initializer(VirtualAddress::new(0x3000), true, UninitPayload::Anon, Arc::downgrade(&owner_a) as Weak<dyn PageOwner>);
        src.lookup(VirtualAddress::new(0x3000)).unwrap().fault_in(&frames).unwrap();

        let mut dest = SupplementalPageTable::new();
        src.copy_into(&mut dest, Arc::downgrade(&owner_b) as Weak<dyn PageOwner>);
        assert_eq!(dest.len(), 1);
        assert!(dest.lookup(VirtualAddress::new(0x3000)).unwrap().is_resident());
    }
}
