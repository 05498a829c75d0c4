//! Per-process file-descriptor table (spec.md C10/C11)
//!
//! Trimmed from the teacher's `FileTable` (close-on-exec / `dup3` /
//! `F_DUPFD` dropped — not in the syscall list) down to the operations
//! spec.md's syscalls actually need: open/close/dup2/clone-on-fork.
//! Extended with a directory variant so `open`/`readdir`/`isdir`/
//! `inumber` can all operate on a single fd namespace, keeping an open
//! directory handle alongside open file handles in the same table.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use crate::config::FDTABLE_CAPACITY;
use crate::error::{KernelError, KernelResult};
use crate::fs::fat::Cluster;
use crate::fs::file::{File, FileDescriptor, STDERR, STDIN, STDOUT};

/// What a live descriptor points at.
#[derive(Clone)]
pub enum FdEntry {
    File(Arc<File>),
    Dir { cluster: Cluster, cursor: Arc<spin::Mutex<usize>> },
}

impl FdEntry {
    fn close(&self) {
        if let FdEntry::File(f) = self {
            f.dec_ref();
        }
    }

    fn retain(&self) {
        if let FdEntry::File(f) = self {
            f.inc_ref();
        }
    }
}

pub struct FdTable {
    files: RwLock<Vec<Option<FdEntry>>>,
}

impl FdTable {
    pub fn new() -> Self {
        let mut files = Vec::with_capacity(FDTABLE_CAPACITY);
        files.push(None); // stdin
        files.push(None); // stdout
        files.push(None); // stderr
        FdTable { files: RwLock::new(files) }
    }

    fn insert(&self, entry: FdEntry) -> KernelResult<FileDescriptor> {
        let mut files = self.files.write();
        for (fd, slot) in files.iter_mut().enumerate().skip(3) {
            if slot.is_none() {
                *slot = Some(entry);
                return Ok(fd as FileDescriptor);
            }
        }
        if files.len() >= FDTABLE_CAPACITY {
            return Err(KernelError::TooManyOpenFiles);
        }
        let fd = files.len();
        files.push(Some(entry));
        Ok(fd as FileDescriptor)
    }

    /// Opens `file`, returning the lowest free descriptor at or above 3.
    pub fn open(&self, file: Arc<File>) -> KernelResult<FileDescriptor> {
        self.insert(FdEntry::File(file))
    }

    /// Opens a directory handle, returning the lowest free descriptor.
    /// The cursor tracks position for successive `readdir` calls on the
    /// same fd.
    pub fn open_dir(&self, cluster: Cluster) -> KernelResult<FileDescriptor> {
        self.insert(FdEntry::Dir { cluster, cursor: Arc::new(spin::Mutex::new(0)) })
    }

    fn entry(&self, fd: FileDescriptor) -> Option<FdEntry> {
        if fd < 0 {
            return None;
        }
        self.files.read().get(fd as usize)?.clone()
    }

    pub fn get(&self, fd: FileDescriptor) -> Option<Arc<File>> {
        match self.entry(fd)? {
            FdEntry::File(f) => Some(f),
            FdEntry::Dir { .. } => None,
        }
    }

    /// The directory cluster and read cursor backing `fd`, if it names a
    /// directory (spec C11 `readdir`/`isdir`/`inumber`).
    pub fn get_dir(&self, fd: FileDescriptor) -> Option<(Cluster, Arc<spin::Mutex<usize>>)> {
        match self.entry(fd)? {
            FdEntry::Dir { cluster, cursor } => Some((cluster, cursor)),
            FdEntry::File(_) => None,
        }
    }

    pub fn is_dir(&self, fd: FileDescriptor) -> bool {
        matches!(self.entry(fd), Some(FdEntry::Dir { .. }))
    }

    /// The fd's inode number: the cluster it resolves to, whether it
    /// names a file or a directory (spec C11 `inumber`).
    pub fn inumber(&self, fd: FileDescriptor) -> Option<u64> {
        match self.entry(fd)? {
            FdEntry::File(f) => Some(f.first_cluster() as u64),
            FdEntry::Dir { cluster, .. } => Some(cluster as u64),
        }
    }

    pub fn close(&self, fd: FileDescriptor) -> KernelResult<()> {
        if fd < 0 {
            return Err(KernelError::BadFileDescriptor { fd });
        }
        let mut files = self.files.write();
        let slot = files
            .get_mut(fd as usize)
            .ok_or(KernelError::BadFileDescriptor { fd })?;
        let entry = slot.take().ok_or(KernelError::BadFileDescriptor { fd })?;
        entry.close();
        Ok(())
    }

    /// Replaces `new_fd`'s entry with `old_fd`'s, matching POSIX `dup2`
    /// semantics (no-op if equal, closes any file already at `new_fd`).
    /// Directory fds cannot be duplicated this way — not needed by any
    /// syscall, and `dup2` only ever targets files.
    pub fn dup2(&self, old_fd: FileDescriptor, new_fd: FileDescriptor) -> KernelResult<()> {
        if old_fd == new_fd {
            return self
                .get(old_fd)
                .map(|_| ())
                .ok_or(KernelError::BadFileDescriptor { fd: old_fd });
        }
        let file = self
            .get(old_fd)
            .ok_or(KernelError::BadFileDescriptor { fd: old_fd })?;
        file.inc_ref();

        let mut files = self.files.write();
        while files.len() <= new_fd as usize {
            files.push(None);
        }
        if let Some(existing) = files[new_fd as usize].take() {
            existing.close();
        }
        files[new_fd as usize] = Some(FdEntry::File(file));
        Ok(())
    }

    /// Duplicates every open descriptor for `fork()`: the child shares
    /// the same underlying [`File`] (and hence file offset) with the
    /// parent. Directory fds are cloned with their own independent
    /// cursor — a `readdir` position is never shared across processes.
    pub fn clone_for_fork(&self) -> Self {
        let files = self.files.read();
        let mut cloned = Vec::with_capacity(files.len());
        for slot in files.iter() {
            match slot {
                Some(entry) => {
                    entry.retain();
                    let cloned_entry = match entry {
                        FdEntry::File(f) => FdEntry::File(f.clone()),
                        FdEntry::Dir { cluster, cursor } => {
                            FdEntry::Dir { cluster: *cluster, cursor: Arc::new(spin::Mutex::new(*cursor.lock())) }
                        }
                    };
                    cloned.push(Some(cloned_entry));
                }
                None => cloned.push(None),
            }
        }
        FdTable { files: RwLock::new(cloned) }
    }

    pub fn close_all(&self) {
        let mut files = self.files.write();
        for slot in files.iter_mut() {
            if let Some(entry) = slot.take() {
                entry.close();
            }
        }
    }

    pub fn is_std_fd(fd: FileDescriptor) -> bool {
        matches!(fd, STDIN | STDOUT | STDERR)
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::FatFs;
    use spin::Mutex;

    fn dummy_file() -> Arc<File> {
        let dev = Arc::new(Mutex::new(crate::fs::blockdev::RamBlockDevice::new(
            alloc::string::String::from("t"),
            64,
        )));
        let fs = Arc::new(FatFs::format(dev).unwrap());
        Arc::new(File::new(
            fs.clone(),
            fs.root_dir_cluster(),
            alloc::string::String::from("f"),
            0,
            0,
            crate::fs::file::OpenFlags::read_write(),
        ))
    }

    #[test]
    fn open_assigns_lowest_free_fd_above_stdio() {
        let t = FdTable::new();
        let fd = t.open(dummy_file()).unwrap();
        assert_eq!(fd, 3);
    }

    #[test]
    fn close_frees_the_slot_for_reuse() {
        let t = FdTable::new();
        let fd = t.open(dummy_file()).unwrap();
        t.close(fd).unwrap();
        let fd2 = t.open(dummy_file()).unwrap();
        assert_eq!(fd, fd2);
    }

    #[test]
    fn dup2_onto_self_requires_existing_fd() {
        let t = FdTable::new();
        assert!(t.dup2(5, 5).is_err());
        let fd = t.open(dummy_file()).unwrap();
        assert!(t.dup2(fd, fd).is_ok());
    }

    #[test]
    fn open_dir_reports_as_directory_not_file() {
        let t = FdTable::new();
        let fd = t.open_dir(7).unwrap();
        assert!(t.is_dir(fd));
        assert!(t.get(fd).is_none());
        assert_eq!(t.inumber(fd), Some(7));
    }

    #[test]
    fn clone_for_fork_gives_directory_fds_independent_cursors() {
        let t = FdTable::new();
        let fd = t.open_dir(3).unwrap();
        let (_, cursor) = t.get_dir(fd).unwrap();
        *cursor.lock() = 2;

        let cloned = t.clone_for_fork();
        let (_, cloned_cursor) = cloned.get_dir(fd).unwrap();
        assert_eq!(*cloned_cursor.lock(), 2);
        *cloned_cursor.lock() = 5;
        assert_eq!(*cursor.lock(), 2);
    }
}
