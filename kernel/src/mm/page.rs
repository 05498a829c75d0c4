//! Page kinds and their lifecycle transitions (spec.md §4.5/§4.8)
//!
//! Grounded on `demand_paging.rs`'s lazy-mapping/CoW-table shape, but
//! implementing the exact three-kind sum type and swap semantics of
//! `original_source/vm/{anon.c,file.c}`: every page starts life as
//! [`PageKind::Uninit`] and converts in place to `Anon` or `FileBacked`
//! on first fault.

extern crate alloc;

use alloc::sync::{Arc, Weak};

use spin::Mutex;

use crate::config::{PGSIZE, SECTORS_PER_PAGE};
use crate::error::{KernelError, KernelResult};
use crate::fs::file::File;
use crate::mm::frame::{Frame, FrameAllocator};
use crate::mm::swap::SwapDevice;
use crate::mm::VirtualAddress;

/// What a [`PageKind::Uninit`] page will become once faulted in, and how
/// to populate its frame the first time.
#[derive(Clone)]
pub enum UninitPayload {
    Anon,
    FileBacked { file: Arc<File>, offset: usize, read_bytes: usize },
}

pub struct AnonPayload {
    frame: Option<Arc<Frame>>,
    swap_slot: Option<usize>,
}

pub struct FileBackedPayload {
    frame: Option<Arc<Frame>>,
    file: Arc<File>,
    offset: usize,
    read_bytes: usize,
}

pub enum PageKind {
    Uninit(UninitPayload),
    Anon(AnonPayload),
    FileBacked(FileBackedPayload),
}

impl PageKind {
    fn frame(&self) -> Option<&Arc<Frame>> {
        match self {
            PageKind::Uninit(_) => None,
            PageKind::Anon(a) => a.frame.as_ref(),
            PageKind::FileBacked(f) => f.frame.as_ref(),
        }
    }
}

/// Collaborator through which a [`Page`] queries/mutates its own mapping.
/// Implemented by `mm::vas::AddressSpace`, which owns the real (or
/// test-fake) `arch::pagetable::AddressSpace`.
pub trait PageOwner: Send + Sync {
    fn is_accessed(&self, va: VirtualAddress) -> bool;
    fn clear_accessed(&self, va: VirtualAddress);
    fn is_dirty(&self, va: VirtualAddress) -> bool;
    fn clear_dirty(&self, va: VirtualAddress);
    fn map(&self, va: VirtualAddress, frame: FrameNumberProxy, writable: bool);
    fn unmap(&self, va: VirtualAddress);
}

/// Re-exported under a local name so `PageOwner::map` doesn't have to
/// import `mm::frame` just for the signature.
pub use crate::mm::frame::FrameNumber as FrameNumberProxy;

/// A single page of a process's address space.
pub struct Page {
    vaddr: VirtualAddress,
    writable: bool,
    owner: Weak<dyn PageOwner>,
    state: Mutex<PageKind>,
}

impl Page {
    pub fn new_uninit(vaddr: VirtualAddress, writable: bool, payload: UninitPayload, owner: Weak<dyn PageOwner>) -> Arc<Self> {
        Arc::new(Page {
            vaddr,
            writable,
            owner,
            state: Mutex::new(PageKind::Uninit(payload)),
        })
    }

    pub fn vaddr(&self) -> VirtualAddress {
        self.vaddr
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn is_resident(&self) -> bool {
        self.state.lock().frame().is_some()
    }

    pub fn is_uninit(&self) -> bool {
        matches!(&*self.state.lock(), PageKind::Uninit(_))
    }

    /// Tears the page down for good: unmaps it and, if its frame has no
    /// other sharers left, returns the frame to the pool (spec.md §4.6
    /// kill contract).
    pub fn release(self: &Arc<Self>, frames: &FrameAllocator) {
        let frame = match &*self.state.lock() {
            PageKind::Anon(a) => a.frame.clone(),
            PageKind::FileBacked(f) => f.frame.clone(),
            PageKind::Uninit(_) => None,
        };
        if let Some(frame) = frame {
            frame.remove_sharer(self);
            if let Some(owner) = self.owner.upgrade() {
                owner.unmap(self.vaddr);
            }
            if frame.sharer_count() == 0 {
                frames.free(&frame);
            }
        }
    }

    /// Writes `data` directly into this page's backing frame at
    /// `offset`, bypassing the fault path. Used by `exec` to lay down
    /// the initial stack contents (argv/argc) on a page it just
    /// allocated itself.
    pub fn write_bytes(self: &Arc<Self>, frames: &FrameAllocator, offset: usize, data: &[u8]) -> KernelResult<()> {
        let state = self.state.lock();
        let frame = state.frame().cloned().ok_or(KernelError::UnmappedMemory { addr: self.vaddr.as_usize() })?;
        drop(state);
        let mut bytes = frame.read(frames.storage());
        let end = offset + data.len();
        if end > bytes.len() {
            return Err(KernelError::InvalidAddress { addr: self.vaddr.as_usize() + offset });
        }
        bytes[offset..end].copy_from_slice(data);
        frame.write(frames.storage(), &bytes);
        Ok(())
    }

    /// Reads `len` bytes directly out of this page's backing frame at
    /// `offset`, bypassing the fault path. Mirrors [`Page::write_bytes`];
    /// used by the syscall boundary once `uaccess` has already faulted
    /// the page resident.
    pub fn read_bytes(self: &Arc<Self>, frames: &FrameAllocator, offset: usize, len: usize) -> KernelResult<alloc::vec::Vec<u8>> {
        let state = self.state.lock();
        let frame = state.frame().cloned().ok_or(KernelError::UnmappedMemory { addr: self.vaddr.as_usize() })?;
        drop(state);
        let bytes = frame.read(frames.storage());
        let end = offset + len;
        if end > bytes.len() {
            return Err(KernelError::InvalidAddress { addr: self.vaddr.as_usize() + offset });
        }
        Ok(bytes[offset..end].to_vec())
    }

    pub fn is_accessed(&self) -> bool {
        self.owner.upgrade().map(|o| o.is_accessed(self.vaddr)).unwrap_or(false)
    }

    pub fn clear_accessed(&self) {
        if let Some(o) = self.owner.upgrade() {
            o.clear_accessed(self.vaddr);
        }
    }

    /// Clones the page's metadata for a destination SPT, sharing the
    /// source's frame under copy-on-write (spec.md §4.6). Both page-table
    /// mappings are rewritten read-only and the frame gains a sharer.
    pub fn cow_clone(self: &Arc<Self>, dest_owner: Weak<dyn PageOwner>) -> Arc<Self> {
        let mut state = self.state.lock();
        match &mut *state {
            PageKind::Uninit(payload) => {
                Page::new_uninit(self.vaddr, self.writable, payload.clone(), dest_owner)
            }
            PageKind::Anon(a) => {
                let frame = a.frame.clone();
                let dest = Arc::new(Page {
                    vaddr: self.vaddr,
                    writable: self.writable,
                    owner: dest_owner.clone(),
                    state: Mutex::new(PageKind::Anon(AnonPayload {
                        frame: frame.clone(),
                        swap_slot: a.swap_slot,
                    })),
                });
                if let Some(f) = &frame {
                    f.add_sharer(&dest);
                    if let Some(owner) = self.owner.upgrade() {
                        owner.map(self.vaddr, f.number(), false);
                    }
                    if let Some(owner) = dest_owner.upgrade() {
                        owner.map(self.vaddr, f.number(), false);
                    }
                }
                dest
            }
            PageKind::FileBacked(f) => {
                let frame = f.frame.clone();
                let dest = Arc::new(Page {
                    vaddr: self.vaddr,
                    writable: self.writable,
                    owner: dest_owner.clone(),
                    state: Mutex::new(PageKind::FileBacked(FileBackedPayload {
                        frame: frame.clone(),
                        file: f.file.clone(),
                        offset: f.offset,
                        read_bytes: f.read_bytes,
                    })),
                });
                if let Some(fr) = &frame {
                    fr.add_sharer(&dest);
                    if let Some(owner) = self.owner.upgrade() {
                        owner.map(self.vaddr, fr.number(), false);
                    }
                    if let Some(owner) = dest_owner.upgrade() {
                        owner.map(self.vaddr, fr.number(), false);
                    }
                }
                dest
            }
        }
    }

    /// First-fault population: allocate a frame, run the kind-specific
    /// initializer/loader, install the mapping (spec.md §4.5).
    pub fn fault_in(self: &Arc<Self>, frames: &FrameAllocator) -> KernelResult<()> {
        let mut state = self.state.lock();
        match &*state {
            PageKind::Uninit(payload) => {
                let frame = frames.allocate()?;
                let mut bytes = [0u8; PGSIZE];
                let new_state = match payload.clone() {
                    UninitPayload::Anon => PageKind::Anon(AnonPayload { frame: Some(frame.clone()), swap_slot: None }),
                    UninitPayload::FileBacked { file, offset, read_bytes } => {
                        file.seek(crate::fs::file::SeekFrom::Start(offset)).ok();
                        let n = file.read(&mut bytes[..read_bytes]).unwrap_or(0);
                        for b in &mut bytes[n..read_bytes] {
                            *b = 0;
                        }
                        PageKind::FileBacked(FileBackedPayload { frame: Some(frame.clone()), file, offset, read_bytes })
                    }
                };
                frame.write(frames.storage(), &bytes);
                frame.add_sharer(self);
                if let Some(owner) = self.owner.upgrade() {
                    owner.map(self.vaddr, frame.number(), self.writable);
                }
                *state = new_state;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Swaps a resident page back out of physical memory. Returns
    /// whether the page retained a residency relationship worth tracking
    /// (it always does here, via the swap slot / backing file).
    pub fn swap_out(self: &Arc<Self>, frames: &FrameAllocator) -> KernelResult<bool> {
        let mut state = self.state.lock();
        match &mut *state {
            PageKind::Anon(a) => {
                let frame = a.frame.take().ok_or(KernelError::UnmappedMemory { addr: self.vaddr.as_usize() })?;
                let slot = crate::mm::swap::swap_device().alloc_slot().ok_or(KernelError::OutOfSwap)?;
                let bytes = frame.read(frames.storage());
                crate::mm::swap::swap_device().write_slot(slot, &bytes);
                a.swap_slot = Some(slot);
                if let Some(owner) = self.owner.upgrade() {
                    owner.unmap(self.vaddr);
                }
                Ok(true)
            }
            PageKind::FileBacked(f) => {
                let frame = f.frame.take().ok_or(KernelError::UnmappedMemory { addr: self.vaddr.as_usize() })?;
                let dirty = self.owner.upgrade().map(|o| o.is_dirty(self.vaddr)).unwrap_or(false);
                if dirty {
                    let bytes = frame.read(frames.storage());
                    f.file.seek(crate::fs::file::SeekFrom::Start(f.offset)).ok();
                    f.file.write(&bytes[..f.read_bytes]).ok();
                    if let Some(owner) = self.owner.upgrade() {
                        owner.clear_dirty(self.vaddr);
                    }
                }
                if let Some(owner) = self.owner.upgrade() {
                    owner.unmap(self.vaddr);
                }
                Ok(true)
            }
            PageKind::Uninit(_) => Ok(false),
        }
    }

    /// Clears this page's own frame pointer and mapping after `primary`,
    /// a sharer of the same frame, has already written the frame's
    /// contents back (to a swap slot, or to the shared backing file).
    /// Used when evicting a CoW-shared frame so only one sharer pays for
    /// the write-back; an `Anon` sharer adopts `primary`'s swap slot
    /// instead of allocating and writing a duplicate one of its own.
    pub fn clear_after_sibling_swap_out(self: &Arc<Self>, primary: &Arc<Page>) {
        let mut state = self.state.lock();
        match &mut *state {
            PageKind::Anon(a) => {
                a.frame = None;
                if let PageKind::Anon(primary_a) = &*primary.state.lock() {
                    a.swap_slot = primary_a.swap_slot;
                }
            }
            PageKind::FileBacked(f) => {
                f.frame = None;
            }
            PageKind::Uninit(_) => {}
        }
        drop(state);
        if let Some(owner) = self.owner.upgrade() {
            owner.unmap(self.vaddr);
        }
    }

    /// Brings a previously swapped-out page back in, per spec.md §4.5.
    pub fn swap_in(self: &Arc<Self>, frames: &FrameAllocator) -> KernelResult<()> {
        let mut state = self.state.lock();
        match &mut *state {
            PageKind::Anon(a) => {
                let slot = a.swap_slot.take().ok_or(KernelError::InvalidAddress { addr: self.vaddr.as_usize() })?;
                let frame = frames.allocate()?;
                let mut bytes = [0u8; PGSIZE];
                crate::mm::swap::swap_device().read_slot(slot, &mut bytes);
                crate::mm::swap::swap_device().free_slot(slot);
                frame.write(frames.storage(), &bytes);
                frame.add_sharer(self);
                a.frame = Some(frame.clone());
                if let Some(owner) = self.owner.upgrade() {
                    owner.map(self.vaddr, frame.number(), self.writable);
                }
                Ok(())
            }
            PageKind::FileBacked(f) => {
                let frame = frames.allocate()?;
                let mut bytes = [0u8; PGSIZE];
                f.file.seek(crate::fs::file::SeekFrom::Start(f.offset)).ok();
                let n = f.file.read(&mut bytes[..f.read_bytes]).unwrap_or(0);
                for b in &mut bytes[n..f.read_bytes] {
                    *b = 0;
                }
                frame.write(frames.storage(), &bytes);
                frame.add_sharer(self);
                f.frame = Some(frame.clone());
                if let Some(owner) = self.owner.upgrade() {
                    owner.map(self.vaddr, frame.number(), self.writable);
                }
                Ok(())
            }
            PageKind::Uninit(_) => Ok(()),
        }
    }

    /// Copy-on-write write-fault split (spec.md §4.8). Called when a
    /// write fault hits a present page whose hardware mapping is
    /// read-only because it is frame-shared.
    pub fn resolve_cow_write(self: &Arc<Self>, frames: &FrameAllocator) -> KernelResult<()> {
        let mut state = self.state.lock();
        let old_frame = match &*state {
            PageKind::Anon(a) => a.frame.clone(),
            PageKind::FileBacked(f) => f.frame.clone(),
            PageKind::Uninit(_) => return Ok(()),
        }
        .ok_or(KernelError::UnmappedMemory { addr: self.vaddr.as_usize() })?;

        if old_frame.sharer_count() <= 1 {
            if let Some(owner) = self.owner.upgrade() {
                owner.map(self.vaddr, old_frame.number(), self.writable);
            }
            return Ok(());
        }

        let bytes = old_frame.read(frames.storage());
        let new_frame = frames.allocate()?;
        new_frame.write(frames.storage(), &bytes);
        old_frame.remove_sharer(self);
        new_frame.add_sharer(self);
        match &mut *state {
            PageKind::Anon(a) => a.frame = Some(new_frame.clone()),
            PageKind::FileBacked(f) => f.frame = Some(new_frame.clone()),
            PageKind::Uninit(_) => unreachable!(),
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.map(self.vaddr, new_frame.number(), self.writable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
        fn map(&self, _va: VirtualAddress, frame: FrameNumberProxy, _writable: bool) {
            self.mapped.store(frame.as_u64(), Ordering::Relaxed);
        }
        fn unmap(&self, _va: VirtualAddress) {
            self.mapped.store(u64::MAX, Ordering::Relaxed);
        }
    }

    #[test]
    fn anon_page_faults_in_zeroed() {
        let frames = FrameAllocator::new(4);
        let owner: Arc<FakeOwner> =
            Arc::new(FakeOwner { accessed: AtomicBool::new(false), dirty: AtomicBool::new(false), mapped: AtomicU64::new(u64::MAX) });
        let page = Page::new_uninit(VirtualAddress::new(0x1000), true, UninitPayload::Anon, Arc::downgrade(&owner) as Weak<dyn PageOwner>);
        page.fault_in(&frames).unwrap();
        assert!(page.is_resident());
    }

    #[test]
    fn cow_clone_shares_frame_until_write_split() {
        let frames = FrameAllocator::new(4);
        let owner_a: Arc<FakeOwner> =
            Arc::new(FakeOwner { accessed: AtomicBool::new(false), dirty: AtomicBool::new(false), mapped: AtomicU64::new(u64::MAX) });
        let owner_b: Arc<FakeOwner> =
            Arc::new(FakeOwner { accessed: AtomicBool::new(false), dirty: AtomicBool::new(false), mapped: AtomicU64::new(u64::MAX) });
        let page = Page::new_uninit(VirtualAddress::new(0x2000), true, UninitPayload::Anon, Arc::downgrade(&owner_a) as Weak<dyn PageOwner>);
        page.fault_in(&frames).unwrap();
        let clone = page.cow_clone(Arc::downgrade(&owner_b) as Weak<dyn PageOwner>);

        page.resolve_cow_write(&frames).unwrap();
        clone.resolve_cow_write(&frames).unwrap();
        assert_ne!(owner_a.mapped.load(Ordering::Relaxed), owner_b.mapped.load(Ordering::Relaxed));
    }

    #[test]
    fn clear_after_sibling_swap_out_adopts_the_same_slot() {
        let frames = FrameAllocator::new(4);
        let owner_a: Arc<FakeOwner> =
            Arc::new(FakeOwner { accessed: AtomicBool::new(false), dirty: AtomicBool::new(false), mapped: AtomicU64::new(u64::MAX) });
        let owner_b: Arc<FakeOwner> =
            Arc::new(FakeOwner { accessed: AtomicBool::new(false), dirty: AtomicBool::new(false), mapped: AtomicU64::new(u64::MAX) });
        let page = Page::new_uninit(VirtualAddress::new(0x5000), true, UninitPayload::Anon, Arc::downgrade(&owner_a) as Weak<dyn PageOwner>);
        page.fault_in(&frames).unwrap();
        let clone = page.cow_clone(Arc::downgrade(&owner_b) as Weak<dyn PageOwner>);

        // `page` plays the role of the sharer eviction picks to actually
        // write the frame back; `clone` just adopts the result.
        page.swap_out(&frames).unwrap();
        clone.clear_after_sibling_swap_out(&page);

        assert!(!page.is_resident());
        assert!(!clone.is_resident());
        let page_slot = match &*page.state.lock() {
            PageKind::Anon(a) => a.swap_slot,
            _ => None,
        };
        let clone_slot = match &*clone.state.lock() {
            PageKind::Anon(a) => a.swap_slot,
            _ => None,
        };
        assert!(page_slot.is_some());
        assert_eq!(page_slot, clone_slot, "sibling should share the same swap slot rather than allocating its own");
        assert_eq!(owner_b.mapped.load(Ordering::Relaxed), u64::MAX, "sibling's mapping must be torn down too");
    }
}
