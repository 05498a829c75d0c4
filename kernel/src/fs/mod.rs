//! Filesystem layer: FAT cluster chains, directories, and per-process file
//! descriptors (spec.md §6, C10, C11)

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

pub mod blockdev;
pub mod dir;
pub mod fat;
pub mod fdtable;
pub mod file;

pub use blockdev::{BlockDevice, RamBlockDevice};
pub use dir::{DirEntry, Directory, EntryKind};
pub use fat::FatFs;
pub use fdtable::{FdEntry, FdTable};
pub use file::{File, FileDescriptor, OpenFlags, SeekFrom};

use crate::error::{FsError, KernelResult};

pub const PATH_MAX: usize = 4096;
pub const NAME_MAX: usize = 54;

static ROOT_FS: Mutex<Option<Arc<FatFs>>> = Mutex::new(None);

/// Mounts a RAM-backed FAT filesystem as root. Swapping in a real disk
/// driver is a matter of handing `mount` a different [`BlockDevice`].
pub fn init() {
    let device: Arc<Mutex<dyn BlockDevice>> = Arc::new(Mutex::new(RamBlockDevice::new(
        String::from("root"),
        8192,
    )));
    match FatFs::open(device) {
        Ok(fs) => mount(Arc::new(fs)),
        Err(e) => log::error!("fs: failed to mount root filesystem: {e}"),
    }
    log::info!("fs: root filesystem mounted");
}

pub fn mount(fs: Arc<FatFs>) {
    *ROOT_FS.lock() = Some(fs);
}

pub fn root_fs() -> Arc<FatFs> {
    ROOT_FS.lock().clone().expect("filesystem not mounted")
}

/// Splits an absolute path into its directory components, resolving each
/// component against the directory tree so `mkdir`/`chdir`/`readdir`
/// have one to walk.
fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").collect()
}

/// Resolves `path` (relative to `cwd_cluster` if not absolute) down to
/// the cluster of the directory that should contain the final component,
/// plus that final component's name.
fn resolve_parent<'a>(
    fs: &FatFs,
    cwd_cluster: fat::Cluster,
    path: &'a str,
) -> KernelResult<(fat::Cluster, &'a str)> {
    let mut components = split_path(path);
    let name = components.pop().ok_or(FsError::InvalidPath)?;
    let mut current = if path.starts_with('/') {
        fs.root_dir_cluster()
    } else {
        cwd_cluster
    };
    for comp in components {
        if comp == ".." {
            continue; // no parent pointers kept; ".." at root is a no-op
        }
        let dir = Directory::new(fs, current);
        let entry = dir.lookup(comp).ok_or(FsError::NotFound)?;
        if entry.kind != EntryKind::Directory {
            return Err(FsError::NotADirectory.into());
        }
        current = entry.first_cluster;
    }
    Ok((current, name))
}

/// Resolves `path` fully, returning the entry it names.
pub fn resolve(fs: &FatFs, cwd_cluster: fat::Cluster, path: &str) -> KernelResult<DirEntry> {
    if path == "/" || path.is_empty() {
        return Ok(DirEntry {
            name: String::from("/"),
            kind: EntryKind::Directory,
            first_cluster: fs.root_dir_cluster(),
            size: 0,
        });
    }
    let (parent, name) = resolve_parent(fs, cwd_cluster, path)?;
    Directory::new(fs, parent).lookup(name).ok_or_else(|| FsError::NotFound.into())
}

/// Opens (optionally creating) `path` and returns a ready-to-use [`File`].
pub fn open(
    fs: &Arc<FatFs>,
    cwd_cluster: fat::Cluster,
    path: &str,
    flags: OpenFlags,
    create: bool,
) -> KernelResult<Arc<File>> {
    let (parent, name) = resolve_parent(fs, cwd_cluster, path)?;
    let dir = Directory::new(fs, parent);
    let entry = match dir.lookup(name) {
        Some(e) => e,
        None if create => {
            let entry = DirEntry {
                name: String::from(name),
                kind: EntryKind::File,
                first_cluster: 0,
                size: 0,
            };
            dir.insert(entry.clone())?;
            entry
        }
        None => return Err(FsError::NotFound.into()),
    };
    if entry.kind != EntryKind::File {
        return Err(FsError::IsADirectory.into());
    }
    Ok(Arc::new(File::new(
        fs.clone(),
        parent,
        String::from(name),
        entry.first_cluster,
        entry.size,
        flags,
    )))
}

/// What [`open_any`] found: a regular file ready for read/write, or a
/// directory's cluster, handed to `FdTable::open_dir` for fd-based
/// `readdir`/`isdir`/`inumber` (spec C11).
pub enum OpenHandle {
    File(Arc<File>),
    Dir(fat::Cluster),
}

/// Like [`open`], but also accepts directories (and `/`), returning
/// whichever kind `path` actually names. Backs the `open` syscall, which
/// hands back a single fd namespace for both.
pub fn open_any(
    fs: &Arc<FatFs>,
    cwd_cluster: fat::Cluster,
    path: &str,
    flags: OpenFlags,
    create: bool,
) -> KernelResult<OpenHandle> {
    if path == "/" {
        return Ok(OpenHandle::Dir(fs.root_dir_cluster()));
    }
    let (parent, name) = resolve_parent(fs, cwd_cluster, path)?;
    let dir = Directory::new(fs, parent);
    let entry = match dir.lookup(name) {
        Some(e) => e,
        None if create => {
            let entry = DirEntry {
                name: String::from(name),
                kind: EntryKind::File,
                first_cluster: 0,
                size: 0,
            };
            dir.insert(entry.clone())?;
            entry
        }
        None => return Err(FsError::NotFound.into()),
    };
    match entry.kind {
        EntryKind::Directory => Ok(OpenHandle::Dir(entry.first_cluster)),
        EntryKind::File => Ok(OpenHandle::File(Arc::new(File::new(
            fs.clone(),
            parent,
            String::from(name),
            entry.first_cluster,
            entry.size,
            flags,
        )))),
        EntryKind::Symlink => Err(FsError::NotAFile.into()),
    }
}

pub fn create(fs: &Arc<FatFs>, cwd_cluster: fat::Cluster, path: &str) -> KernelResult<()> {
    let (parent, name) = resolve_parent(fs, cwd_cluster, path)?;
    let dir = Directory::new(fs, parent);
    dir.insert(DirEntry {
        name: String::from(name),
        kind: EntryKind::File,
        first_cluster: 0,
        size: 0,
    })
}

pub fn mkdir(fs: &Arc<FatFs>, cwd_cluster: fat::Cluster, path: &str) -> KernelResult<()> {
    let (parent, name) = resolve_parent(fs, cwd_cluster, path)?;
    let dir = Directory::new(fs, parent);
    if dir.lookup(name).is_some() {
        return Err(FsError::AlreadyExists.into());
    }
    let clst = fs.create_chain(0).ok_or(FsError::NoSpace)?;
    let zero = [0u8; crate::config::SECTOR_SIZE];
    fs.write_cluster(clst, &zero)?;
    dir.insert(DirEntry {
        name: String::from(name),
        kind: EntryKind::Directory,
        first_cluster: clst,
        size: 0,
    })
}

pub fn symlink(
    fs: &Arc<FatFs>,
    cwd_cluster: fat::Cluster,
    target: &str,
    link_path: &str,
) -> KernelResult<()> {
    let (parent, name) = resolve_parent(fs, cwd_cluster, link_path)?;
    if target.len() > NAME_MAX {
        return Err(FsError::InvalidPath.into());
    }
    let dir = Directory::new(fs, parent);
    // The symlink's target path is stashed in the name field of a
    // first_cluster-less entry's payload is not enough room, so it is
    // written into a freshly allocated one-cluster chain instead.
    let clst = fs.create_chain(0).ok_or(FsError::NoSpace)?;
    let mut buf = [0u8; crate::config::SECTOR_SIZE];
    buf[..target.len()].copy_from_slice(target.as_bytes());
    fs.write_cluster(clst, &buf)?;
    dir.insert(DirEntry {
        name: String::from(name),
        kind: EntryKind::Symlink,
        first_cluster: clst,
        size: target.len() as u32,
    })
}

pub fn read_symlink(fs: &FatFs, entry: &DirEntry) -> KernelResult<String> {
    if entry.kind != EntryKind::Symlink {
        return Err(FsError::NotASymlink.into());
    }
    let mut buf = [0u8; crate::config::SECTOR_SIZE];
    fs.read_cluster(entry.first_cluster, &mut buf)?;
    Ok(String::from_utf8_lossy(&buf[..entry.size as usize]).into_owned())
}

pub fn remove(fs: &Arc<FatFs>, cwd_cluster: fat::Cluster, path: &str) -> KernelResult<()> {
    let (parent, name) = resolve_parent(fs, cwd_cluster, path)?;
    let dir = Directory::new(fs, parent);
    let entry = dir.lookup(name).ok_or(FsError::NotFound)?;
    if entry.kind == EntryKind::Directory && !Directory::new(fs, entry.first_cluster).list().is_empty() {
        return Err(FsError::DirectoryNotEmpty.into());
    }
    dir.remove(name)?;
    if entry.first_cluster != 0 {
        fs.remove_chain(entry.first_cluster, 0);
    }
    Ok(())
}

pub fn readdir(fs: &FatFs, dir_cluster: fat::Cluster) -> Vec<DirEntry> {
    Directory::new(fs, dir_cluster).list()
}

pub fn is_dir(entry: &DirEntry) -> bool {
    entry.kind == EntryKind::Directory
}

/// Cluster number doubles as the inode number (spec C11 `inumber`).
pub fn inumber(entry: &DirEntry) -> u64 {
    entry.first_cluster as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_fs() -> Arc<FatFs> {
        let dev: Arc<Mutex<dyn BlockDevice>> = Arc::new(Mutex::new(RamBlockDevice::new(
            String::from("t"),
            512,
        )));
        Arc::new(FatFs::format(dev).unwrap())
    }

    #[test]
    fn create_open_write_read_round_trip() {
        let fs = fresh_fs();
        let root = fs.root_dir_cluster();
        create(&fs, root, "/greeting").unwrap();
        let f = open(&fs, root, "/greeting", OpenFlags::read_write(), false).unwrap();
        f.write(b"hello, kernel").unwrap();
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut buf = [0u8; 32];
        let n = f.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello, kernel");
    }

    #[test]
    fn mkdir_then_readdir_sees_it() {
        let fs = fresh_fs();
        let root = fs.root_dir_cluster();
        mkdir(&fs, root, "/sub").unwrap();
        let entries = readdir(&fs, root);
        assert_eq!(entries.len(), 1);
        assert!(is_dir(&entries[0]));
    }

    #[test]
    fn symlink_round_trips_target() {
        let fs = fresh_fs();
        let root = fs.root_dir_cluster();
        symlink(&fs, root, "/greeting", "/link").unwrap();
        let entry = resolve(&fs, root, "/link").unwrap();
        assert_eq!(read_symlink(&fs, &entry).unwrap(), "/greeting");
    }

    #[test]
    fn remove_nonempty_directory_fails() {
        let fs = fresh_fs();
        let root = fs.root_dir_cluster();
        mkdir(&fs, root, "/sub").unwrap();
        let sub = resolve(&fs, root, "/sub").unwrap();
        let dir = Directory::new(&fs, sub.first_cluster);
        dir.insert(DirEntry {
            name: String::from("child"),
            kind: EntryKind::File,
            first_cluster: 0,
            size: 0,
        })
        .unwrap();
        assert!(remove(&fs, root, "/sub").is_err());
    }
}
