//! ELF64 executable loading (spec.md §6)
//!
//! Decodes exactly what this kernel's loader needs: the ELF64 header,
//! its `PT_LOAD` program headers, and the entry point. No dynamic
//! linking, no section headers, no interpreter lookup — every user
//! binary is a statically linked amd64 executable.

extern crate alloc;

use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use crate::error::{FsError, KernelResult};
use crate::fs::file::File;
use crate::mm::page::{PageOwner, UninitPayload};
use crate::mm::vas::AddressSpace;
use crate::mm::VirtualAddress;

const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64Header {
    magic: [u8; 4],
    class: u8,
    data: u8,
    version: u8,
    os_abi: u8,
    abi_version: u8,
    padding: [u8; 7],
    elf_type: u16,
    machine: u16,
    version2: u32,
    entry: u64,
    phoff: u64,
    shoff: u64,
    flags: u32,
    ehsize: u16,
    phentsize: u16,
    phnum: u16,
    shentsize: u16,
    shnum: u16,
    shstrndx: u16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct Elf64ProgramHeader {
    p_type: u32,
    p_flags: u32,
    p_offset: u64,
    p_vaddr: u64,
    p_filesz: u64,
    p_memsz: u64,
    p_align: u64,
}

const HEADER_SIZE: usize = core::mem::size_of::<Elf64Header>();
const PHDR_SIZE: usize = core::mem::size_of::<Elf64ProgramHeader>();

fn read_header(data: &[u8]) -> KernelResult<Elf64Header> {
    if data.len() < HEADER_SIZE {
        return Err(FsError::InvalidPath.into());
    }
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&data[..HEADER_SIZE]);
    // SAFETY: `Elf64Header` is `repr(C)` with no padding-sensitive
    // invariants; every bit pattern of its fields is a valid value, and
    // `raw` supplies exactly `HEADER_SIZE` bytes read from the file.
    let header: Elf64Header = unsafe { core::mem::transmute(raw) };
    if header.magic != ELF_MAGIC || header.class != ELFCLASS64 || header.data != ELFDATA2LSB {
        return Err(FsError::InvalidPath.into());
    }
    if header.elf_type != ET_EXEC || header.machine != EM_X86_64 {
        return Err(FsError::InvalidPath.into());
    }
    Ok(header)
}

fn read_program_headers(data: &[u8], header: &Elf64Header) -> KernelResult<Vec<Elf64ProgramHeader>> {
    let mut headers = Vec::with_capacity(header.phnum as usize);
    for i in 0..header.phnum as usize {
        let off = header.phoff as usize + i * header.phentsize as usize;
        if off + PHDR_SIZE > data.len() {
            return Err(FsError::InvalidPath.into());
        }
        let mut raw = [0u8; PHDR_SIZE];
        raw.copy_from_slice(&data[off..off + PHDR_SIZE]);
        // SAFETY: same reasoning as `read_header` — plain-old-data layout.
        let phdr: Elf64ProgramHeader = unsafe { core::mem::transmute(raw) };
        headers.push(phdr);
    }
    Ok(headers)
}

/// Loads every `PT_LOAD` segment of `file` into `space`'s supplemental
/// page table as Uninit FileBacked pages (file-backed portion) plus a
/// trailing Anon stretch for BSS when `p_memsz > p_filesz`, per
/// spec.md §6. Populated lazily, the same as any other FileBacked page.
///
/// Returns the entry point.
pub fn load(file: &Arc<File>, space: &Arc<spin::Mutex<AddressSpace>>) -> KernelResult<VirtualAddress> {
    let size = file.size();
    let mut image = alloc::vec![0u8; size];
    file.seek(crate::fs::file::SeekFrom::Start(0))?;
    let mut read = 0;
    while read < size {
        let n = file.read(&mut image[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }

    let header = read_header(&image)?;
    let phdrs = read_program_headers(&image, &header)?;

    let mut guard = space.lock();
    let owner: Weak<dyn PageOwner> = Arc::downgrade(space) as Weak<dyn PageOwner>;

    for phdr in phdrs.iter().filter(|p| p.p_type == PT_LOAD) {
        let writable = phdr.p_flags & PF_W != 0;
        let _executable = phdr.p_flags & PF_X != 0;
        load_segment(&mut guard, owner.clone(), file.clone(), phdr, writable)?;
    }
    drop(guard);

    Ok(VirtualAddress::new(header.entry))
}

fn load_segment(
    space: &mut AddressSpace,
    owner: Weak<dyn PageOwner>,
    file: Arc<File>,
    phdr: &Elf64ProgramHeader,
    writable: bool,
) -> KernelResult<()> {
    use crate::config::PGSIZE;

    let vaddr = phdr.p_vaddr;
    let page_start = vaddr - (vaddr % PGSIZE as u64);
    let end = vaddr + phdr.p_memsz;
    let page_end = end.div_ceil(PGSIZE as u64) * PGSIZE as u64;
    let page_count = ((page_end - page_start) / PGSIZE as u64) as usize;

    for i in 0..page_count {
        let page_vaddr = VirtualAddress::new(page_start + (i as u64) * PGSIZE as u64);
        let seg_offset = page_vaddr.as_u64().saturating_sub(vaddr);
        let file_bytes_here = if seg_offset >= phdr.p_filesz {
            0
        } else {
            core::cmp::min(PGSIZE as u64, phdr.p_filesz - seg_offset) as usize
        };

        let payload = if file_bytes_here == 0 {
            UninitPayload::Anon
        } else {
            UninitPayload::FileBacked {
                file: file.clone(),
                offset: (phdr.p_offset + seg_offset) as usize,
                read_bytes: file_bytes_here,
            }
        };
        space.spt_mut().alloc_with_initializer(page_vaddr, writable, payload, owner.clone());
    }
    Ok(())
}

/// Minimal valid ELF64 byte builder, shared by this module's own tests
/// and `process::creation`'s (which needs a loadable file to exec).
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub fn minimal_executable(entry: u64, code: &[u8]) -> Vec<u8> {
        build_elf_bytes(entry, code)
    }

    pub(super) const PGSIZE_TEST: usize = 4096;

    fn build_elf_bytes(entry: u64, code: &[u8]) -> Vec<u8> {
        let vaddr = 0x40_0000u64;
        let phoff = HEADER_SIZE as u64;
        let data_off = phoff + PHDR_SIZE as u64;

        let header = Elf64Header {
            magic: ELF_MAGIC,
            class: ELFCLASS64,
            data: ELFDATA2LSB,
            version: 1,
            os_abi: 0,
            abi_version: 0,
            padding: [0; 7],
            elf_type: ET_EXEC,
            machine: EM_X86_64,
            version2: 1,
            entry,
            phoff,
            shoff: 0,
            flags: 0,
            ehsize: HEADER_SIZE as u16,
            phentsize: PHDR_SIZE as u16,
            phnum: 1,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        };
        let phdr = Elf64ProgramHeader {
            p_type: PT_LOAD,
            p_flags: PF_X,
            p_offset: data_off,
            p_vaddr: vaddr,
            p_filesz: code.len() as u64,
            p_memsz: code.len() as u64 + PGSIZE_TEST as u64,
            p_align: 0x1000,
        };

        let mut bytes = Vec::new();
        // SAFETY: both structs are `repr(C)` POD with no padding hazards
        // for the purpose of this test-only serialization.
        unsafe {
            bytes.extend_from_slice(core::slice::from_raw_parts(
                &header as *const _ as *const u8,
                HEADER_SIZE,
            ));
            bytes.extend_from_slice(core::slice::from_raw_parts(
                &phdr as *const _ as *const u8,
                PHDR_SIZE,
            ));
        }
        bytes.extend_from_slice(code);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::pagetable::fake::FakeAddressSpace;
    use crate::fs::blockdev::RamBlockDevice;
    use crate::fs::fat::FatFs;
    use crate::fs::file::OpenFlags;
    use crate::mm::frame::FrameAllocator;
    use alloc::boxed::Box;
    use alloc::string::String;
    use spin::Mutex;

    #[test]
    fn load_maps_file_backed_and_bss_pages() {
        let dev = Arc::new(Mutex::new(RamBlockDevice::new(String::from("t"), 4096)));
        let fs = Arc::new(FatFs::format(dev).unwrap());
        let root = fs.root_dir_cluster();
        crate::fs::create(&fs, root, "/prog").unwrap();
        let f = crate::fs::open(&fs, root, "/prog", OpenFlags::read_write(), false).unwrap();
        let bytes = test_support::minimal_executable(0x40_0000, &[0x90u8; 16]);
        f.write(&bytes).unwrap();

        let frames = Arc::new(FrameAllocator::new(16));
        let space = Arc::new(Mutex::new(AddressSpace::new(
            Box::new(FakeAddressSpace::new()),
            frames,
            VirtualAddress::new(0x8000_0000),
        )));

        let entry = load(&f, &space).unwrap();
        assert_eq!(entry.as_u64(), 0x40_0000);
        assert!(space.lock().spt().len() >= 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = test_support::minimal_executable(0x40_0000, &[0x90]);
        bytes[0] = 0;
        assert!(read_header(&bytes).is_err());
    }
}
