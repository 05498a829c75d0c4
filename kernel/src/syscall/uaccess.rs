//! User-memory access helpers for syscall handlers (spec C10/C11)
//!
//! A pointer from user space is validated by walking the page table and
//! killing the process on a bad address. This kernel has no literal
//! user/kernel address split to dereference across,
//! so the equivalent is to walk the caller's supplemental page table
//! directly, faulting each page resident through the same
//! [`crate::mm::fault::handle_page_fault`] path a real `#PF` trap would
//! use, then read/write the backing frame.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::PGSIZE;
use crate::error::{KernelError, KernelResult};
use crate::mm::fault::{handle_page_fault, FaultInfo};
use crate::mm::frame::FrameAllocator;
use crate::mm::page::Page;
use crate::mm::vas::AddressSpace;
use crate::mm::VirtualAddress;

/// Syscall handlers run on the in-kernel call stack, not on the user
/// stack a real `int 0x80`/`syscall` trap would leave `rsp` pointing at.
/// `usize::MAX` disables [`crate::mm::vas::is_stack_growth`]'s distance
/// check (`top - fault <= LIMIT` only ever succeeds for addresses near
/// the top), which is the correct behavior here: a syscall argument that
/// lands below the already-mapped stack should fault as invalid, not
/// silently grow the stack on the callee's behalf.
const SYSCALL_RSP: usize = usize::MAX;

fn ensure_resident(space: &Arc<Mutex<AddressSpace>>, page_va: VirtualAddress, write: bool) -> KernelResult<()> {
    let present = {
        let guard = space.lock();
        guard.spt().lookup(page_va).map(|p| p.is_resident()).unwrap_or(false)
    };
    handle_page_fault(space, FaultInfo { vaddr: page_va, write, present, user_rsp: SYSCALL_RSP })
}

fn page_and_frames(space: &Arc<Mutex<AddressSpace>>, page_va: VirtualAddress) -> KernelResult<(Arc<Page>, Arc<FrameAllocator>)> {
    let guard = space.lock();
    let page = guard
        .spt()
        .lookup(page_va)
        .ok_or(KernelError::InvalidAddress { addr: page_va.as_usize() })?;
    Ok((page, guard.frames().clone()))
}

/// Copies `len` bytes out of the caller's address space starting at
/// `vaddr`, faulting each page resident as needed.
pub fn copy_in(space: &Arc<Mutex<AddressSpace>>, vaddr: VirtualAddress, len: usize) -> KernelResult<Vec<u8>> {
    let mut out = Vec::with_capacity(len);
    let mut remaining = len;
    let mut cur = vaddr;
    while remaining > 0 {
        let page_va = cur.round_down();
        let offset = cur.as_usize() - page_va.as_usize();
        let take = core::cmp::min(remaining, PGSIZE - offset);

        ensure_resident(space, page_va, false)?;
        let (page, frames) = page_and_frames(space, page_va)?;
        out.extend_from_slice(&page.read_bytes(&frames, offset, take)?);

        cur = cur.add(take);
        remaining -= take;
    }
    Ok(out)
}

/// Writes `data` into the caller's address space starting at `vaddr`.
pub fn copy_out(space: &Arc<Mutex<AddressSpace>>, vaddr: VirtualAddress, data: &[u8]) -> KernelResult<()> {
    let mut written = 0;
    let mut cur = vaddr;
    while written < data.len() {
        let page_va = cur.round_down();
        let offset = cur.as_usize() - page_va.as_usize();
        let take = core::cmp::min(data.len() - written, PGSIZE - offset);

        ensure_resident(space, page_va, true)?;
        let (page, frames) = page_and_frames(space, page_va)?;
        page.write_bytes(&frames, offset, &data[written..written + take])?;

        cur = cur.add(take);
        written += take;
    }
    Ok(())
}

/// Reads a NUL-terminated string out of the caller's address space,
/// rejecting anything past `max_len` bytes (spec C11's path arguments
/// are bounded by [`crate::fs::PATH_MAX`]).
pub fn copy_in_cstr(space: &Arc<Mutex<AddressSpace>>, vaddr: VirtualAddress, max_len: usize) -> KernelResult<String> {
    let mut bytes = Vec::new();
    let mut cur = vaddr;
    loop {
        if bytes.len() >= max_len {
            return Err(KernelError::InvalidAddress { addr: vaddr.as_usize() });
        }
        let page_va = cur.round_down();
        let offset = cur.as_usize() - page_va.as_usize();
        let chunk = core::cmp::min(max_len - bytes.len(), PGSIZE - offset);

        ensure_resident(space, page_va, false)?;
        let (page, frames) = page_and_frames(space, page_va)?;
        let buf = page.read_bytes(&frames, offset, chunk)?;

        match buf.iter().position(|&b| b == 0) {
            Some(nul) => {
                bytes.extend_from_slice(&buf[..nul]);
                break;
            }
            None => {
                bytes.extend_from_slice(&buf);
                cur = cur.add(chunk);
            }
        }
    }
    String::from_utf8(bytes).map_err(|_| KernelError::InvalidAddress { addr: vaddr.as_usize() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pagetable::fake::FakeAddressSpace;
    use crate::mm::frame::FrameAllocator;
    use crate::mm::page::UninitPayload;
    use alloc::boxed::Box;
    use alloc::sync::Weak;

    fn fresh_space() -> Arc<Mutex<AddressSpace>> {
        let frames = Arc::new(FrameAllocator::new(16));
        Arc::new(Mutex::new(AddressSpace::new(
            Box::new(FakeAddressSpace::new()),
            frames,
            VirtualAddress::new(0x8000_0000),
        )))
    }

    fn alloc_anon(space: &Arc<Mutex<AddressSpace>>, va: VirtualAddress) {
        let mut guard = space.lock();
        let owner: Weak<dyn crate::mm::page::PageOwner> = Arc::downgrade(space) as Weak<dyn crate::mm::page::PageOwner>;
        guard.spt_mut().alloc_with_initializer(va, true, UninitPayload::Anon, owner);
    }

    #[test]
    fn copy_out_then_copy_in_round_trips() {
        let space = fresh_space();
        alloc_anon(&space, VirtualAddress::new(0x1000));

        copy_out(&space, VirtualAddress::new(0x1000), b"hello").unwrap();
        let back = copy_in(&space, VirtualAddress::new(0x1000), 5).unwrap();
        assert_eq!(&back, b"hello");
    }

    #[test]
    fn copy_in_cstr_stops_at_nul() {
        let space = fresh_space();
        alloc_anon(&space, VirtualAddress::new(0x2000));
        copy_out(&space, VirtualAddress::new(0x2000), b"hi\0garbage").unwrap();

        let s = copy_in_cstr(&space, VirtualAddress::new(0x2000), 4096).unwrap();
        assert_eq!(s, "hi");
    }

    #[test]
    fn access_to_unmapped_page_errors() {
        let space = fresh_space();
        assert!(copy_in(&space, VirtualAddress::new(0x9999_0000), 4).is_err());
    }

    #[test]
    fn copy_spanning_two_pages_works() {
        let space = fresh_space();
        alloc_anon(&space, VirtualAddress::new(0x3000));
        alloc_anon(&space, VirtualAddress::new(0x4000));

        let near_boundary = VirtualAddress::new(0x3000 + PGSIZE as u64 - 3);
        copy_out(&space, near_boundary, b"abcdef").unwrap();
        let back = copy_in(&space, near_boundary, 6).unwrap();
        assert_eq!(&back, b"abcdef");
    }
}
