//! Memory-mapped file regions (spec.md §4.5 mmap/munmap)

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::config::PGSIZE;
use crate::error::{FsError, KernelResult};
use crate::fs::file::File;
use crate::mm::page::{Page, PageOwner, UninitPayload};
use crate::mm::spt::SupplementalPageTable;
use crate::mm::VirtualAddress;

/// One `mmap` call's worth of pages, tracked so `munmap` can write them
/// back and tear the mapping down.
pub struct MmapRegion {
    base: VirtualAddress,
    length: usize,
    file: Arc<File>,
    pages: Vec<Arc<Page>>,
}

impl MmapRegion {
    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Creates Uninit FileBacked pages covering `[addr, addr+length)`,
    /// registering each in `spt`, per spec.md §4.5.
    pub fn create(
        spt: &mut SupplementalPageTable,
        owner: alloc::sync::Weak<dyn PageOwner>,
        addr: VirtualAddress,
        length: usize,
        writable: bool,
        file: Arc<File>,
    ) -> KernelResult<Self> {
        if length == 0 {
            return Err(FsError::InvalidPath.into());
        }
        let page_count = length.div_ceil(PGSIZE);
        let mut pages = Vec::with_capacity(page_count);
        for i in 0..page_count {
            let page_vaddr = VirtualAddress::new(addr.as_u64() + (i * PGSIZE) as u64);
            let offset = i * PGSIZE;
            let read_bytes = core::cmp::min(PGSIZE, length - offset);
            let payload = UninitPayload::FileBacked { file: file.clone(), offset, read_bytes };
            spt.alloc_with_initializer(page_vaddr, writable, payload, owner.clone());
            pages.push(spt.lookup(page_vaddr).expect("just inserted"));
        }
        Ok(MmapRegion { base: addr, length, file, pages })
    }

    /// Writes every resident-and-dirty page back to the file (same
    /// criterion as eviction's FileBacked swap-out), then releases the
    /// reopened file handle. Pages never faulted in need no write-back.
    pub fn unmap(self, spt: &mut SupplementalPageTable, frames: &crate::mm::frame::FrameAllocator) {
        for page in &self.pages {
            if page.is_resident() {
                let _ = page.swap_out(frames);
            }
            spt.remove(page.vaddr());
        }
        let _ = self.length;
        drop(self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamBlockDevice;
    use crate::fs::fat::FatFs;
    use crate::fs::file::OpenFlags;
    use crate::mm::frame::FrameAllocator;
    use alloc::string::String;
    use spin::Mutex;
    use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct FakeOwner {
        mapped: AtomicU64,
        dirty: AtomicBool,
    }
    impl PageOwner for FakeOwner {
        fn is_accessed(&self, _va: VirtualAddress) -> bool {
            false
        }
        fn clear_accessed(&self, _va: VirtualAddress) {}
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

    #[test]
    fn mmap_region_spans_multiple_pages() {
        let dev = Arc::new(Mutex::new(RamBlockDevice::new(String::from("t"), 512)));
        let fs = Arc::new(FatFs::format(dev).unwrap());
        let root = fs.root_dir_cluster();
        crate::fs::create(&fs, root, "/mapped").unwrap();
        let file = crate::fs::open(&fs, root, "/mapped", OpenFlags::read_write(), false).unwrap();

        let owner: Arc<FakeOwner> = Arc::new(FakeOwner { mapped: AtomicU64::new(u64::MAX), dirty: AtomicBool::new(false) });
        let mut spt = SupplementalPageTable::new();
        let region = MmapRegion::create(
            &mut spt,
            Arc::downgrade(&owner) as alloc::sync::Weak<dyn PageOwner>,
            VirtualAddress::new(0x4000_0000),
            PGSIZE + 10,
            true,
            file,
        )
        .unwrap();
        assert_eq!(region.pages.len(), 2);

        let frames = FrameAllocator::new(4);
        region.unmap(&mut spt, &frames);
        assert!(spt.is_empty());
    }
}
