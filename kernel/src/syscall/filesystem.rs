//! Filesystem syscalls: file I/O, directories, and fd-table plumbing
//! (spec.md §6, C11)
//!
//! `open` hands back a single fd namespace for both files and
//! directories, so `isdir`/`inumber`/`readdir` all key off the same
//! descriptor `create`/`open`/`close` use.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

use crate::error::FsError;
use crate::fs::{self, file::OpenFlags, file::SeekFrom, OpenHandle};
use crate::mm::VirtualAddress;

use super::uaccess::{copy_in, copy_in_cstr, copy_out};
use super::{current_space, current_thread, SyscallResult};

fn read_path(arg: usize) -> Result<String, super::SyscallError> {
    let space = current_space()?;
    Ok(copy_in_cstr(&space, VirtualAddress::new(arg as u64), fs::PATH_MAX)?)
}

/// `SYS_CREATE(file, initial_size)`: creates a zero-filled regular file.
pub(super) fn sys_create(path_ptr: usize, initial_size: usize) -> SyscallResult {
    let path = read_path(path_ptr)?;
    let thread = current_thread()?;
    let root = fs::root_fs();
    let cwd = thread.cwd.load(Ordering::Relaxed);

    fs::create(&root, cwd, &path)?;
    if initial_size > 0 {
        let file = fs::open(&root, cwd, &path, OpenFlags::read_write(), false)?;
        file.write(&alloc::vec![0u8; initial_size])?;
    }
    Ok(1)
}

/// `SYS_REMOVE(file)`.
pub(super) fn sys_remove(path_ptr: usize) -> SyscallResult {
    let path = read_path(path_ptr)?;
    let thread = current_thread()?;
    let root = fs::root_fs();
    fs::remove(&root, thread.cwd.load(Ordering::Relaxed), &path)?;
    Ok(1)
}

/// `SYS_OPEN(file)`: returns a descriptor covering either a regular
/// file or a directory.
pub(super) fn sys_open(path_ptr: usize) -> SyscallResult {
    let path = read_path(path_ptr)?;
    let thread = current_thread()?;
    let root = fs::root_fs();
    let cwd = thread.cwd.load(Ordering::Relaxed);

    let handle = fs::open_any(&root, cwd, &path, OpenFlags::read_write(), false)?;
    let fd = match handle {
        OpenHandle::File(file) => thread.fd_table.lock().open(file)?,
        OpenHandle::Dir(cluster) => thread.fd_table.lock().open_dir(cluster)?,
    };
    Ok(fd as usize)
}

fn get_file(fd: usize) -> Result<Arc<crate::fs::File>, super::SyscallError> {
    current_thread()?
        .fd_table
        .lock()
        .get(fd as i32)
        .ok_or_else(|| crate::error::KernelError::BadFileDescriptor { fd: fd as i32 }.into())
}

/// `SYS_FILESIZE(fd)`.
pub(super) fn sys_filesize(fd: usize) -> SyscallResult {
    Ok(get_file(fd)?.size())
}

/// `SYS_READ(fd, buffer, size)`. Reading from `STDIN` always reports
/// EOF — this kernel has no keyboard driver backing fd 0.
pub(super) fn sys_read(fd: usize, buf_ptr: usize, size: usize) -> SyscallResult {
    if fd as i32 == crate::fs::file::STDIN {
        return Ok(0);
    }
    let file = get_file(fd)?;
    let mut buf = alloc::vec![0u8; size];
    let n = file.read(&mut buf)?;
    let space = current_space()?;
    copy_out(&space, VirtualAddress::new(buf_ptr as u64), &buf[..n])?;
    Ok(n)
}

/// `SYS_WRITE(fd, buffer, size)`. Writes to `STDOUT`/`STDERR` are
/// surfaced through the kernel log rather than a VGA/serial console
/// driver, which is out of scope here.
pub(super) fn sys_write(fd: usize, buf_ptr: usize, size: usize) -> SyscallResult {
    let space = current_space()?;
    let data = copy_in(&space, VirtualAddress::new(buf_ptr as u64), size)?;

    if fd as i32 == crate::fs::file::STDOUT || fd as i32 == crate::fs::file::STDERR {
        log::info!("console: {}", String::from_utf8_lossy(&data));
        return Ok(size);
    }
    let file = get_file(fd)?;
    Ok(file.write(&data)?)
}

/// `SYS_SEEK(fd, position)`: void in the real ABI, encoded here as the
/// resulting position for easier testing.
pub(super) fn sys_seek(fd: usize, position: usize) -> SyscallResult {
    Ok(get_file(fd)?.seek(SeekFrom::Start(position))?)
}

/// `SYS_TELL(fd)`.
pub(super) fn sys_tell(fd: usize) -> SyscallResult {
    Ok(get_file(fd)?.tell())
}

/// `SYS_CLOSE(fd)`.
pub(super) fn sys_close(fd: usize) -> SyscallResult {
    current_thread()?.fd_table.lock().close(fd as i32)?;
    Ok(0)
}

/// `SYS_CHDIR(dir)`.
pub(super) fn sys_chdir(path_ptr: usize) -> SyscallResult {
    let path = read_path(path_ptr)?;
    let thread = current_thread()?;
    let root = fs::root_fs();
    let entry = fs::resolve(&root, thread.cwd.load(Ordering::Relaxed), &path)?;
    if !fs::is_dir(&entry) {
        let err: crate::error::KernelError = FsError::NotADirectory.into();
        return Err(err.into());
    }
    thread.cwd.store(entry.first_cluster, Ordering::Relaxed);
    Ok(1)
}

/// `SYS_MKDIR(dir)`.
pub(super) fn sys_mkdir(path_ptr: usize) -> SyscallResult {
    let path = read_path(path_ptr)?;
    let thread = current_thread()?;
    let root = fs::root_fs();
    fs::mkdir(&root, thread.cwd.load(Ordering::Relaxed), &path)?;
    Ok(1)
}

/// `SYS_READDIR(fd, name)`: advances `fd`'s cursor and copies the next
/// entry's name out; returns `false` (0) once the directory is
/// exhausted.
pub(super) fn sys_readdir(fd: usize, name_ptr: usize) -> SyscallResult {
    let thread = current_thread()?;
    let (cluster, cursor) = thread
        .fd_table
        .lock()
        .get_dir(fd as i32)
        .ok_or(crate::error::KernelError::BadFileDescriptor { fd: fd as i32 })?;

    let root = fs::root_fs();
    let entries = fs::readdir(&root, cluster);
    let mut pos = cursor.lock();
    let Some(entry) = entries.get(*pos) else {
        return Ok(0);
    };
    *pos += 1;
    drop(pos);

    let mut bytes = entry.name.clone().into_bytes();
    bytes.push(0);
    let space = current_space()?;
    copy_out(&space, VirtualAddress::new(name_ptr as u64), &bytes)?;
    Ok(1)
}

/// `SYS_ISDIR(fd)`.
pub(super) fn sys_isdir(fd: usize) -> SyscallResult {
    Ok(current_thread()?.fd_table.lock().is_dir(fd as i32) as usize)
}

/// `SYS_INUMBER(fd)`: the cluster backing `fd`, whether it names a file
/// or a directory.
pub(super) fn sys_inumber(fd: usize) -> SyscallResult {
    current_thread()?
        .fd_table
        .lock()
        .inumber(fd as i32)
        .map(|n| n as usize)
        .ok_or_else(|| crate::error::KernelError::BadFileDescriptor { fd: fd as i32 }.into())
}

/// `SYS_SYMLINK(target, linkpath)`.
pub(super) fn sys_symlink(target_ptr: usize, link_ptr: usize) -> SyscallResult {
    let target = read_path(target_ptr)?;
    let link = read_path(link_ptr)?;
    let thread = current_thread()?;
    let root = fs::root_fs();
    fs::symlink(&root, thread.cwd.load(Ordering::Relaxed), &target, &link)?;
    Ok(1)
}

/// `SYS_DUP2(oldfd, newfd)`.
pub(super) fn sys_dup2(old_fd: usize, new_fd: usize) -> SyscallResult {
    current_thread()?.fd_table.lock().dup2(old_fd as i32, new_fd as i32)?;
    Ok(new_fd)
}
