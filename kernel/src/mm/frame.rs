//! Physical frame allocator and eviction (spec.md §4.4)
//!
//! Grounded on `frame_allocator.rs`'s `FrameNumber`/`PhysicalAddress`
//! newtypes and pool-allocation shape, but replacing the bitmap+buddy+NUMA
//! hybrid (out of scope here: SMP/NUMA) with the single user-pool clock
//! allocator spec.md describes: frames live in a `util::list::List` and
//! the clock hand is just "the front of the list" — second-chance sweeps
//! pop the front, check its accessed bit, and either push it to the back
//! (given a second chance) or evict it.
//!
//! Frames need real, readable/writable backing storage so copy-on-write
//! and swap-out can move actual bytes around under test; `storage` below
//! plays the role real physical memory plays on hardware.

extern crate alloc;

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::config::PGSIZE;
use crate::error::{KernelError, KernelResult};
use crate::mm::page::Page;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FrameNumber(pub u64);

impl FrameNumber {
    pub const fn new(n: u64) -> Self {
        FrameNumber(n)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// One physical page. `sharers` holds every [`Page`] currently mapped to
/// this frame under copy-on-write; eviction and the CoW fault path both
/// need to walk this list.
pub struct Frame {
    number: FrameNumber,
    accessed: AtomicBool,
    sharers: Mutex<Vec<Weak<Page>>>,
}

impl Frame {
    pub fn number(&self) -> FrameNumber {
        self.number
    }

    pub fn sharer_count(&self) -> usize {
        self.sharers.lock().iter().filter(|w| w.strong_count() > 0).count()
    }

    pub fn add_sharer(&self, page: &Arc<Page>) {
        self.sharers.lock().push(Arc::downgrade(page));
    }

    /// Drops `page` from the sharer list. Used when a CoW fault splits a
    /// page off onto its own frame.
    pub fn remove_sharer(&self, page: &Arc<Page>) {
        self.sharers.lock().retain(|w| match w.upgrade() {
            Some(p) => !Arc::ptr_eq(&p, page),
            None => false,
        });
    }

    pub fn mark_accessed(&self) {
        self.accessed.store(true, Ordering::Relaxed);
    }

    fn clear_accessed(&self) -> bool {
        self.accessed.swap(false, Ordering::Relaxed)
    }

    pub fn read(&self, storage: &FrameStorage) -> [u8; PGSIZE] {
        storage.read(self.number)
    }

    pub fn write(&self, storage: &FrameStorage, bytes: &[u8; PGSIZE]) {
        storage.write(self.number, bytes);
    }
}

/// Backing byte storage for every allocated frame, indexed by frame
/// number. Stands in for the physical memory a real MMU would address
/// directly through the frame's physical address.
pub struct FrameStorage {
    pages: Mutex<alloc::collections::BTreeMap<u64, [u8; PGSIZE]>>,
}

impl FrameStorage {
    fn new() -> Self {
        FrameStorage { pages: Mutex::new(alloc::collections::BTreeMap::new()) }
    }

    fn read(&self, frame: FrameNumber) -> [u8; PGSIZE] {
        self.pages.lock().get(&frame.0).copied().unwrap_or([0u8; PGSIZE])
    }

    fn write(&self, frame: FrameNumber, bytes: &[u8; PGSIZE]) {
        self.pages.lock().insert(frame.0, *bytes);
    }

    fn free(&self, frame: FrameNumber) {
        self.pages.lock().remove(&frame.0);
    }
}

struct Pool {
    in_use: crate::util::List<Arc<Frame>>,
    free_numbers: Vec<FrameNumber>,
    next_number: u64,
    capacity: usize,
}

/// Single user-pool frame allocator with second-chance (clock) eviction.
pub struct FrameAllocator {
    pool: Mutex<Pool>,
    storage: FrameStorage,
}

impl FrameAllocator {
    pub fn new(capacity: usize) -> Self {
        FrameAllocator {
            pool: Mutex::new(Pool {
                in_use: crate::util::List::new(),
                free_numbers: Vec::new(),
                next_number: 0,
                capacity,
            }),
            storage: FrameStorage::new(),
        }
    }

    pub fn storage(&self) -> &FrameStorage {
        &self.storage
    }

    /// Obtains one free physical page, running eviction if the pool is
    /// exhausted (spec.md §4.4).
    pub fn allocate(&self) -> KernelResult<Arc<Frame>> {
        let number = {
            let mut pool = self.pool.lock();
            if let Some(n) = pool.free_numbers.pop() {
                n
            } else if pool.in_use.len() + 1 <= pool.capacity {
                let n = FrameNumber::new(pool.next_number);
                pool.next_number += 1;
                n
            } else {
                drop(pool);
                self.evict_one()?
            }
        };
        let frame = Arc::new(Frame {
            number,
            accessed: AtomicBool::new(true),
            sharers: Mutex::new(Vec::new()),
        });
        self.pool.lock().in_use.push_back(frame.clone());
        Ok(frame)
    }

    /// Runs the clock sweep once, evicting the first frame whose sharers'
    /// mappings are all clear of the accessed bit. Frames that are still
    /// "hot" get a second chance: their accessed bit is cleared and they
    /// are moved to the back of the queue.
    fn evict_one(&self) -> KernelResult<FrameNumber> {
        loop {
            let candidate = {
                let mut pool = self.pool.lock();
                pool.in_use.pop_front()
            };
            let frame = match candidate {
                Some(f) => f,
                None => return Err(KernelError::OutOfFrames),
            };

            let sharers: Vec<Arc<Page>> =
                frame.sharers.lock().iter().filter_map(Weak::upgrade).collect();
            let any_accessed = sharers.iter().any(|p| p.is_accessed());
            if any_accessed {
                for p in &sharers {
                    p.clear_accessed();
                }
                frame.clear_accessed();
                self.pool.lock().in_use.push_back(frame);
                continue;
            }

            // Only the first sharer actually writes the frame back (to a
            // swap slot or the shared backing file); the rest just adopt
            // that write-back and drop their own frame pointer, instead
            // of each allocating and writing a duplicate copy.
            if let Some((primary, rest)) = sharers.split_first() {
                if primary.swap_out(self).is_err() {
                    // Eviction failed for this page; give the frame a
                    // second chance instead of losing it outright.
                    self.pool.lock().in_use.push_back(frame.clone());
                    return Err(KernelError::OutOfFrames);
                }
                for p in rest {
                    p.clear_after_sibling_swap_out(primary);
                }
            }
            let number = frame.number();
            self.storage.free(number);
            return Ok(number);
        }
    }

    /// Returns a frame to the free pool once its last sharer has let go.
    pub fn free(&self, frame: &Arc<Frame>) {
        let mut pool = self.pool.lock();
        let handle = pool
            .in_use
            .handles()
            .find(|h| pool.in_use.get(*h).map(|f| Arc::ptr_eq(f, frame)).unwrap_or(false));
        if let Some(h) = handle {
            pool.in_use.remove(h);
        }
        pool.free_numbers.push(frame.number());
        drop(pool);
        self.storage.free(frame.number());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_assigns_distinct_numbers() {
        let alloc = FrameAllocator::new(4);
        let a = alloc.allocate().unwrap();
        let b = alloc.allocate().unwrap();
        assert_ne!(a.number(), b.number());
    }

    #[test]
    fn free_reclaims_frame_number() {
        let alloc = FrameAllocator::new(1);
        let a = alloc.allocate().unwrap();
        let number = a.number();
        alloc.free(&a);
        let b = alloc.allocate().unwrap();
        assert_eq!(b.number(), number);
    }

    #[test]
    fn exhausted_pool_with_no_sharers_errors_out_of_frames() {
        let alloc = FrameAllocator::new(1);
        let _a = alloc.allocate().unwrap();
        assert!(alloc.allocate().is_err());
    }

    #[test]
    fn storage_round_trips_bytes() {
        let alloc = FrameAllocator::new(1);
        let frame = alloc.allocate().unwrap();
        let mut buf = [0u8; PGSIZE];
        buf[0] = 42;
        frame.write(alloc.storage(), &buf);
        assert_eq!(frame.read(alloc.storage())[0], 42);
    }

    struct FakeOwner {
        mapped: core::sync::atomic::AtomicU64,
    }

    impl crate::mm::page::PageOwner for FakeOwner {
        fn is_accessed(&self, _va: crate::mm::VirtualAddress) -> bool {
            false
        }
        fn clear_accessed(&self, _va: crate::mm::VirtualAddress) {}
        fn is_dirty(&self, _va: crate::mm::VirtualAddress) -> bool {
            false
        }
        fn clear_dirty(&self, _va: crate::mm::VirtualAddress) {}
        fn map(&self, _va: crate::mm::VirtualAddress, frame: crate::mm::page::FrameNumberProxy, _writable: bool) {
            self.mapped.store(frame.as_u64(), Ordering::Relaxed);
        }
        fn unmap(&self, _va: crate::mm::VirtualAddress) {
            self.mapped.store(u64::MAX, Ordering::Relaxed);
        }
    }

    #[test]
    fn evicting_a_cow_shared_frame_clears_every_sharer() {
        use crate::mm::page::{Page, UninitPayload};
        use crate::mm::VirtualAddress;

        let alloc = FrameAllocator::new(1);
        let owner_a: Arc<FakeOwner> = Arc::new(FakeOwner { mapped: core::sync::atomic::AtomicU64::new(u64::MAX) });
        let owner_b: Arc<FakeOwner> = Arc::new(FakeOwner { mapped: core::sync::atomic::AtomicU64::new(u64::MAX) });

        let page_a = Page::new_uninit(VirtualAddress::new(0x6000), true, UninitPayload::Anon, Arc::downgrade(&owner_a) as Weak<dyn crate::mm::page::PageOwner>);
        page_a.fault_in(&alloc).unwrap();
        let page_b = page_a.cow_clone(Arc::downgrade(&owner_b) as Weak<dyn crate::mm::page::PageOwner>);
        assert!(page_a.is_resident());

        // Pool capacity is 1 and already holds the cow-shared frame;
        // allocating again must evict it and clear both sharers.
        let _next = alloc.allocate().unwrap();

        assert!(!page_a.is_resident());
        assert!(!page_b.is_resident());
    }
}
