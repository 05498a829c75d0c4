//! Open file objects backed by the FAT cluster chain (spec.md §6/C11)

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::config::SECTOR_SIZE;
use crate::error::{FsError, KernelResult};
use crate::fs::dir::Directory;
use crate::fs::fat::{Cluster, FatFs};

pub type FileDescriptor = i32;

pub const STDIN: FileDescriptor = 0;
pub const STDOUT: FileDescriptor = 1;
pub const STDERR: FileDescriptor = 2;

#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
}

impl OpenFlags {
    pub fn read_write() -> Self {
        OpenFlags { read: true, write: true }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum SeekFrom {
    Start(usize),
    Current(isize),
    End(isize),
}

/// An open regular file: the directory it lives in (so writes that grow
/// it can update the entry's size/first-cluster) plus a cursor.
pub struct File {
    fs: Arc<FatFs>,
    parent_cluster: Cluster,
    name: String,
    first_cluster: Mutex<Cluster>,
    size: Mutex<u32>,
    pub flags: OpenFlags,
    position: Mutex<usize>,
    refcount: Mutex<usize>,
}

impl File {
    pub fn new(
        fs: Arc<FatFs>,
        parent_cluster: Cluster,
        name: String,
        first_cluster: Cluster,
        size: u32,
        flags: OpenFlags,
    ) -> Self {
        File {
            fs,
            parent_cluster,
            name,
            first_cluster: Mutex::new(first_cluster),
            size: Mutex::new(size),
            flags,
            position: Mutex::new(0),
            refcount: Mutex::new(1),
        }
    }

    pub fn size(&self) -> usize {
        *self.size.lock() as usize
    }

    /// The cluster this file's data chain starts at, doubling as its
    /// inode number for the `inumber` syscall (spec C11).
    pub fn first_cluster(&self) -> Cluster {
        *self.first_cluster.lock()
    }

    pub fn read(&self, buffer: &mut [u8]) -> KernelResult<usize> {
        if !self.flags.read {
            return Err(FsError::PermissionDenied.into());
        }
        let mut pos = self.position.lock();
        let size = self.size();
        if *pos >= size {
            return Ok(0);
        }
        let to_read = buffer.len().min(size - *pos);
        let first_cluster = *self.first_cluster.lock();
        let chain = self.fs.chain_clusters(first_cluster);

        let mut read = 0;
        while read < to_read {
            let abs = *pos + read;
            let cluster_index = abs / SECTOR_SIZE;
            let cluster_offset = abs % SECTOR_SIZE;
            let clst = match chain.get(cluster_index) {
                Some(c) => *c,
                None => break,
            };
            let mut buf = [0u8; SECTOR_SIZE];
            self.fs.read_cluster(clst, &mut buf)?;
            let take = (SECTOR_SIZE - cluster_offset).min(to_read - read);
            buffer[read..read + take].copy_from_slice(&buf[cluster_offset..cluster_offset + take]);
            read += take;
        }
        *pos += read;
        Ok(read)
    }

    pub fn write(&self, data: &[u8]) -> KernelResult<usize> {
        if !self.flags.write {
            return Err(FsError::PermissionDenied.into());
        }
        let mut pos = self.position.lock();
        let mut first_cluster = *self.first_cluster.lock();
        let mut chain = self.fs.chain_clusters(first_cluster);

        let mut written = 0;
        while written < data.len() {
            let abs = *pos + written;
            let cluster_index = abs / SECTOR_SIZE;
            let cluster_offset = abs % SECTOR_SIZE;

            while chain.len() <= cluster_index {
                let tail = chain.last().copied().unwrap_or(0);
                let new_clst = self.fs.create_chain(tail).ok_or(FsError::NoSpace)?;
                if tail == 0 {
                    first_cluster = new_clst;
                }
                let zero = [0u8; SECTOR_SIZE];
                self.fs.write_cluster(new_clst, &zero)?;
                chain.push(new_clst);
            }
            let clst = chain[cluster_index];

            let mut buf = [0u8; SECTOR_SIZE];
            self.fs.read_cluster(clst, &mut buf)?;
            let take = (SECTOR_SIZE - cluster_offset).min(data.len() - written);
            buf[cluster_offset..cluster_offset + take]
                .copy_from_slice(&data[written..written + take]);
            self.fs.write_cluster(clst, &buf)?;
            written += take;
        }

        *pos += written;
        *self.first_cluster.lock() = first_cluster;
        let mut size = self.size.lock();
        *size = (*pos as u32).max(*size);

        let dir = Directory::new(&self.fs, self.parent_cluster);
        dir.update(&self.name, first_cluster, *size)?;
        Ok(written)
    }

    pub fn seek(&self, from: SeekFrom) -> KernelResult<usize> {
        let mut pos = self.position.lock();
        let new_pos = match from {
            SeekFrom::Start(offset) => offset,
            SeekFrom::Current(offset) => checked_offset(*pos, offset)?,
            SeekFrom::End(offset) => checked_offset(self.size(), offset)?,
        };
        *pos = new_pos;
        Ok(new_pos)
    }

    pub fn tell(&self) -> usize {
        *self.position.lock()
    }

    /// Opens a fresh handle onto the same directory entry with its own
    /// cursor, independent of `self`'s position — `mmap` needs this since
    /// a mapped region's backing reads must not perturb the fd's `seek`
    /// position (or vice versa).
    pub fn reopen(&self) -> Arc<File> {
        Arc::new(File::new(
            self.fs.clone(),
            self.parent_cluster,
            self.name.clone(),
            self.first_cluster(),
            self.size() as u32,
            self.flags,
        ))
    }

    pub fn inc_ref(&self) {
        *self.refcount.lock() += 1;
    }

    pub fn dec_ref(&self) -> usize {
        let mut count = self.refcount.lock();
        *count = count.saturating_sub(1);
        *count
    }
}

fn checked_offset(base: usize, offset: isize) -> KernelResult<usize> {
    if offset < 0 {
        base.checked_sub((-offset) as usize)
            .ok_or_else(|| FsError::InvalidPath.into())
    } else {
        base.checked_add(offset as usize)
            .ok_or_else(|| FsError::InvalidPath.into())
    }
}
