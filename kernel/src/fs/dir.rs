//! FAT directory entries (spec.md §6 SUPPLEMENT)
//!
//! A directory is itself a cluster chain; each cluster holds fixed-size
//! entry records, giving each entry a name/kind/size triple adapted onto
//! FAT's cluster chains
//! instead of heap nodes, to support mkdir/readdir/symlink per spec §6.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

use crate::config::SECTOR_SIZE;
use crate::error::{FsError, KernelResult};
use crate::fs::fat::{Cluster, FatFs};

const ENTRY_SIZE: usize = 64;
const NAME_CAP: usize = 54;
const ENTRIES_PER_CLUSTER: usize = SECTOR_SIZE / ENTRY_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
    pub first_cluster: Cluster,
    pub size: u32,
}

impl DirEntry {
    fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut buf = [0u8; ENTRY_SIZE];
        buf[0] = match self.kind {
            EntryKind::File => 1,
            EntryKind::Directory => 2,
            EntryKind::Symlink => 3,
        };
        let name_bytes = self.name.as_bytes();
        let len = name_bytes.len().min(NAME_CAP);
        buf[1] = len as u8;
        buf[2..2 + len].copy_from_slice(&name_bytes[..len]);
        buf[56..60].copy_from_slice(&self.first_cluster.to_le_bytes());
        buf[60..64].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; ENTRY_SIZE]) -> Option<Self> {
        let kind = match buf[0] {
            1 => EntryKind::File,
            2 => EntryKind::Directory,
            3 => EntryKind::Symlink,
            _ => return None,
        };
        let len = buf[1] as usize;
        let name = String::from_utf8_lossy(&buf[2..2 + len]).into_owned();
        let first_cluster = u32::from_le_bytes(buf[56..60].try_into().unwrap());
        let size = u32::from_le_bytes(buf[60..64].try_into().unwrap());
        Some(DirEntry {
            name,
            kind,
            first_cluster,
            size,
        })
    }
}

/// A directory's entries, addressed by the cluster chain rooted at
/// `first_cluster`.
pub struct Directory<'a> {
    fs: &'a FatFs,
    first_cluster: Cluster,
}

impl<'a> Directory<'a> {
    pub fn new(fs: &'a FatFs, first_cluster: Cluster) -> Self {
        Directory { fs, first_cluster }
    }

    pub fn root(fs: &'a FatFs) -> Self {
        Directory::new(fs, fs.root_dir_cluster())
    }

    fn entry_slots(&self) -> Vec<(Cluster, usize, [u8; ENTRY_SIZE])> {
        let mut out = Vec::new();
        for clst in self.fs.chain_clusters(self.first_cluster) {
            let mut buf = [0u8; SECTOR_SIZE];
            if self.fs.read_cluster(clst, &mut buf).is_err() {
                continue;
            }
            for slot in 0..ENTRIES_PER_CLUSTER {
                let mut entry_buf = [0u8; ENTRY_SIZE];
                entry_buf.copy_from_slice(&buf[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE]);
                out.push((clst, slot, entry_buf));
            }
        }
        out
    }

    pub fn list(&self) -> Vec<DirEntry> {
        self.entry_slots()
            .into_iter()
            .filter_map(|(_, _, raw)| DirEntry::decode(&raw))
            .collect()
    }

    pub fn lookup(&self, name: &str) -> Option<DirEntry> {
        self.list().into_iter().find(|e| e.name == name)
    }

    /// Inserts a new entry, extending the directory's cluster chain if
    /// every existing cluster is full.
    pub fn insert(&self, entry: DirEntry) -> KernelResult<()> {
        if self.lookup(&entry.name).is_some() {
            return Err(FsError::AlreadyExists.into());
        }
        for (clst, slot, raw) in self.entry_slots() {
            if DirEntry::decode(&raw).is_none() {
                return self.write_slot(clst, slot, &entry);
            }
        }
        let tail = self
            .fs
            .chain_clusters(self.first_cluster)
            .last()
            .copied()
            .unwrap_or(self.first_cluster);
        let new_clst = self.fs.create_chain(tail).ok_or(FsError::NoSpace)?;
        let zero = [0u8; SECTOR_SIZE];
        self.fs.write_cluster(new_clst, &zero)?;
        self.write_slot(new_clst, 0, &entry)
    }

    fn write_slot(&self, clst: Cluster, slot: usize, entry: &DirEntry) -> KernelResult<()> {
        let mut buf = [0u8; SECTOR_SIZE];
        self.fs.read_cluster(clst, &mut buf)?;
        buf[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE].copy_from_slice(&entry.encode());
        self.fs.write_cluster(clst, &buf)?;
        Ok(())
    }

    pub fn remove(&self, name: &str) -> KernelResult<DirEntry> {
        for (clst, slot, raw) in self.entry_slots() {
            if let Some(entry) = DirEntry::decode(&raw) {
                if entry.name == name {
                    let mut buf = [0u8; SECTOR_SIZE];
                    self.fs.read_cluster(clst, &mut buf)?;
                    buf[slot * ENTRY_SIZE..(slot + 1) * ENTRY_SIZE].fill(0);
                    self.fs.write_cluster(clst, &buf)?;
                    return Ok(entry);
                }
            }
        }
        Err(FsError::NotFound.into())
    }

    /// Updates the size/first-cluster fields of an existing entry (e.g.
    /// after a write grows the file, or truncate resets it).
    pub fn update(&self, name: &str, first_cluster: Cluster, size: u32) -> KernelResult<()> {
        for (clst, slot, raw) in self.entry_slots() {
            if let Some(mut entry) = DirEntry::decode(&raw) {
                if entry.name == name {
                    entry.first_cluster = first_cluster;
                    entry.size = size;
                    return self.write_slot(clst, slot, &entry);
                }
            }
        }
        Err(FsError::NotFound.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamBlockDevice;
    use alloc::sync::Arc;
    use spin::Mutex;

    fn fresh_fs() -> FatFs {
        let dev = Arc::new(Mutex::new(RamBlockDevice::new(
            alloc::string::String::from("test"),
            256,
        )));
        FatFs::format(dev).unwrap()
    }

    #[test]
    fn insert_then_lookup() {
        let fs = fresh_fs();
        let root = Directory::root(&fs);
        root.insert(DirEntry {
            name: String::from("hello.txt"),
            kind: EntryKind::File,
            first_cluster: 0,
            size: 0,
        })
        .unwrap();
        let found = root.lookup("hello.txt").unwrap();
        assert_eq!(found.kind, EntryKind::File);
    }

    #[test]
    fn insert_duplicate_fails() {
        let fs = fresh_fs();
        let root = Directory::root(&fs);
        let mk = || DirEntry {
            name: String::from("dup"),
            kind: EntryKind::File,
            first_cluster: 0,
            size: 0,
        };
        root.insert(mk()).unwrap();
        assert!(root.insert(mk()).is_err());
    }

    #[test]
    fn remove_then_relist() {
        let fs = fresh_fs();
        let root = Directory::root(&fs);
        root.insert(DirEntry {
            name: String::from("a"),
            kind: EntryKind::File,
            first_cluster: 0,
            size: 0,
        })
        .unwrap();
        root.remove("a").unwrap();
        assert!(root.list().is_empty());
    }

    #[test]
    fn directory_spills_into_a_second_cluster() {
        let fs = fresh_fs();
        let root = Directory::root(&fs);
        for i in 0..(ENTRIES_PER_CLUSTER + 2) {
            root.insert(DirEntry {
                name: alloc::format!("f{i}"),
                kind: EntryKind::File,
                first_cluster: 0,
                size: 0,
            })
            .unwrap();
        }
        assert_eq!(root.list().len(), ENTRIES_PER_CLUSTER + 2);
    }
}
