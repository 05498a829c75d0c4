//! `exec()`: loads a named executable into a brand-new process (spec
//! C10/C11). Unlike `fork()`, the child gets a fresh address space built
//! straight from the ELF image, not a copy-on-write clone of the caller.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::{PGSIZE, PRI_DEFAULT, USER_ADDR_TOP};
use crate::error::KernelResult;
use crate::fs::file::OpenFlags;
use crate::mm::page::{PageOwner, UninitPayload};
use crate::mm::vas::AddressSpace;
use crate::mm::VirtualAddress;
use crate::sched::task::{self, Thread, ThreadId};

/// `exec(cmd_line)`: parses `cmd_line` into a program name and argv,
/// creates the child, and loads the named file into it. The caller
/// resumes immediately with the new pid; the caller's own image is
/// untouched (spec C10's `exec` is a combined fork-and-load, not
/// POSIX `execve`'s in-place replacement).
pub fn exec(cmd_line: &str, parent: Option<ThreadId>) -> KernelResult<ThreadId> {
    let mut parts = cmd_line.split_whitespace();
    let path = String::from(parts.next().unwrap_or(""));
    let argv: Vec<String> = core::iter::once(path.clone()).chain(parts.map(String::from)).collect();
    exec_new_process(&path, argv, parent)
}

pub fn exec_new_process(path: &str, argv: Vec<String>, parent: Option<ThreadId>) -> KernelResult<ThreadId> {
    let fs = crate::fs::root_fs();
    let cwd_cluster = parent
        .and_then(task::lookup)
        .map(|p| p.cwd.load(core::sync::atomic::Ordering::Relaxed))
        .unwrap_or_else(|| fs.root_dir_cluster());

    let file = crate::fs::open(&fs, cwd_cluster, path, OpenFlags::read_write(), false)?;

    let tid = task::alloc_tid();
    let thread = Arc::new(Thread::new(tid, path, PRI_DEFAULT, parent));
    thread.cwd.store(cwd_cluster, core::sync::atomic::Ordering::Relaxed);

    let stack_top = VirtualAddress::new(USER_ADDR_TOP as u64);
    let frames = crate::mm::user_frames();
    let arch_space = crate::arch::pagetable::backend();
    let space = Arc::new(Mutex::new(AddressSpace::new(arch_space, frames.clone(), stack_top)));

    let entry = match crate::elf::load(&file, &space) {
        Ok(e) => e,
        Err(e) => {
            *thread.fork_ok.lock() = Some(false);
            return Err(e);
        }
    };

    let sp = setup_user_stack(&space, &frames, stack_top, &argv)?;

    thread.entry_rip.store(entry.as_u64(), core::sync::atomic::Ordering::Relaxed);
    thread.entry_rsp.store(sp.as_u64(), core::sync::atomic::Ordering::Relaxed);
    *thread.address_space.lock() = Some(space);
    *thread.executing_file.lock() = Some(file);
    *thread.fork_ok.lock() = Some(true);

    if let Some(p) = parent.and_then(task::lookup) {
        p.children.lock().push(tid);
    }

    task::register(thread);
    crate::sched::scheduler::make_ready(tid);
    Ok(tid)
}

/// Lays out `argv` on a freshly allocated top-of-stack page, 16-byte
/// aligned at the final `rsp`, matching the x86-64 System V layout: the
/// strings first (in reverse, so `argv[0]` ends up at the highest address),
/// then padding to a word boundary, a null sentinel pointer, the argv
/// pointer array (reverse order), then argc and the fake return
/// address the entry point expects to pop.
fn setup_user_stack(
    space: &Arc<Mutex<AddressSpace>>,
    frames: &Arc<crate::mm::frame::FrameAllocator>,
    stack_top: VirtualAddress,
    argv: &[String],
) -> KernelResult<VirtualAddress> {
    let page_vaddr = VirtualAddress::new(stack_top.as_u64() - PGSIZE as u64);
    let owner: alloc::sync::Weak<dyn PageOwner> = Arc::downgrade(space) as alloc::sync::Weak<dyn PageOwner>;
    {
        let mut guard = space.lock();
        guard.spt_mut().alloc_with_initializer(page_vaddr, true, UninitPayload::Anon, owner);
        guard.set_stack_top(stack_top);
    }
    let page = space.lock().spt().lookup(page_vaddr).expect("just inserted");
    page.fault_in(frames)?;

    let mut cursor = PGSIZE;
    let mut str_offsets = Vec::with_capacity(argv.len());
    for arg in argv.iter().rev() {
        let bytes = arg.as_bytes();
        cursor -= bytes.len() + 1;
        page.write_bytes(frames, cursor, bytes)?;
        page.write_bytes(frames, cursor + bytes.len(), &[0])?;
        str_offsets.push(cursor);
    }
    str_offsets.reverse();

    cursor &= !0x7;

    let mut pointers: Vec<u64> = Vec::with_capacity(argv.len() + 1);
    for off in &str_offsets {
        pointers.push(page_vaddr.as_u64() + *off as u64);
    }
    pointers.push(0);

    cursor -= pointers.len() * 8;
    cursor &= !0xF;
    for (i, ptr) in pointers.iter().enumerate() {
        page.write_bytes(frames, cursor + i * 8, &ptr.to_le_bytes())?;
    }
    let argv_ptr = page_vaddr.as_u64() + cursor as u64;

    cursor -= 8;
    page.write_bytes(frames, cursor, &(argv.len() as u64).to_le_bytes())?;
    let _ = argv_ptr;

    cursor -= 8;
    page.write_bytes(frames, cursor, &0u64.to_le_bytes())?;

    Ok(VirtualAddress::new(page_vaddr.as_u64() + cursor as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamBlockDevice;
    use crate::fs::fat::FatFs;
    use alloc::string::String as AString;

    fn build_minimal_elf() -> Vec<u8> {
        crate::elf::test_support::minimal_executable(0x40_0000, &[0x90u8; 8])
    }

    #[test]
    fn exec_missing_file_reports_load_failure() {
        let dev = Arc::new(Mutex::new(RamBlockDevice::new(AString::from("t"), 4096)));
        let fs = Arc::new(FatFs::format(dev).unwrap());
        crate::fs::mount(fs);
        let result = exec_new_process("/nope", alloc::vec![AString::from("/nope")], None);
        assert!(result.is_err());
    }

    #[test]
    fn exec_loads_and_builds_a_stack() {
        let dev = Arc::new(Mutex::new(RamBlockDevice::new(AString::from("t2"), 8192)));
        let fs = Arc::new(FatFs::format(dev).unwrap());
        crate::fs::mount(fs.clone());
        let root = fs.root_dir_cluster();
        crate::fs::create(&fs, root, "/prog").unwrap();
        let f = crate::fs::open(&fs, root, "/prog", OpenFlags::read_write(), false).unwrap();
        f.write(&build_minimal_elf()).unwrap();

        let tid = exec_new_process("/prog", alloc::vec![AString::from("/prog")], None).unwrap();
        let thread = task::lookup(tid).unwrap();
        assert_eq!(*thread.fork_ok.lock(), Some(true));
        assert!(thread.entry_rsp.load(core::sync::atomic::Ordering::Relaxed) > 0);
        task::unregister(tid);
    }
}
