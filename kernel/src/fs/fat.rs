//! FAT cluster-chain filesystem (spec.md §6, SUPPLEMENT)
//!
//! Ported from `original_source/filesys/fat.c`: a boot sector naming the
//! FAT's location and length, a flat FAT table of `u32` cluster-chain
//! links, and a data region of fixed-size clusters. `sectors_per_cluster`
//! is pinned to 1 as in the original's default, so a cluster is exactly
//! one [`SECTOR_SIZE`] block; cluster numbering, the boot-sector layout,
//! `cluster_to_sector`/`sector_to_cluster`, and the linear free-cluster
//! scan in [`FatFs::create_chain`] all follow the original's arithmetic,
//! including its cluster-numbers-start-at-1 convention.

extern crate alloc;

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::config::SECTOR_SIZE;
use crate::error::KernelResult;
use crate::fs::blockdev::BlockDevice;

pub type Cluster = u32;

pub const FAT_MAGIC: u32 = 0x4641_3031; // "FA01"
pub const FAT_BOOT_SECTOR: u64 = 0;
pub const ROOT_DIR_CLUSTER: Cluster = 1;
pub const EOCHAIN: Cluster = 0x0FFF_FFFF;
pub const SECTORS_PER_CLUSTER: u32 = 1;

#[derive(Clone, Copy)]
struct BootSector {
    magic: u32,
    sectors_per_cluster: u32,
    total_sectors: u32,
    fat_start: u32,
    fat_sectors: u32,
    root_dir_cluster: u32,
}

impl BootSector {
    fn to_bytes(self) -> [u8; SECTOR_SIZE] {
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.sectors_per_cluster.to_le_bytes());
        buf[8..12].copy_from_slice(&self.total_sectors.to_le_bytes());
        buf[12..16].copy_from_slice(&self.fat_start.to_le_bytes());
        buf[16..20].copy_from_slice(&self.fat_sectors.to_le_bytes());
        buf[20..24].copy_from_slice(&self.root_dir_cluster.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; SECTOR_SIZE]) -> Self {
        let word = |r: core::ops::Range<usize>| u32::from_le_bytes(buf[r].try_into().unwrap());
        BootSector {
            magic: word(0..4),
            sectors_per_cluster: word(4..8),
            total_sectors: word(8..12),
            fat_start: word(12..16),
            fat_sectors: word(16..20),
            root_dir_cluster: word(20..24),
        }
    }
}

/// A mounted FAT filesystem over one [`BlockDevice`].
pub struct FatFs {
    boot: BootSector,
    fat: Mutex<Vec<Cluster>>,
    device: Arc<Mutex<dyn BlockDevice>>,
    data_start: u64,
}

impl FatFs {
    /// Lays down a fresh filesystem: boot sector, an all-free FAT with the
    /// root directory's single cluster marked end-of-chain, and a zeroed
    /// root directory cluster.
    pub fn format(device: Arc<Mutex<dyn BlockDevice>>) -> KernelResult<Self> {
        let total_sectors = device.lock().sector_count() as u32;
        let entries_per_sector = (SECTOR_SIZE / core::mem::size_of::<Cluster>()) as u32;
        let fat_sectors = (total_sectors.saturating_sub(1))
            / (entries_per_sector * SECTORS_PER_CLUSTER + 1)
            + 1;
        let boot = BootSector {
            magic: FAT_MAGIC,
            sectors_per_cluster: SECTORS_PER_CLUSTER,
            total_sectors,
            fat_start: 1,
            fat_sectors,
            root_dir_cluster: ROOT_DIR_CLUSTER,
        };
        let fat_length = total_sectors - 1 - fat_sectors;
        let mut fat = alloc::vec![0 as Cluster; fat_length as usize];
        fat[(ROOT_DIR_CLUSTER - 1) as usize] = EOCHAIN;

        let data_start = (boot.fat_start + boot.fat_sectors) as u64;
        let fs = FatFs {
            boot,
            fat: Mutex::new(fat),
            device,
            data_start,
        };
        fs.sync()?;
        let zero = [0u8; SECTOR_SIZE];
        fs.device
            .lock()
            .write_sector(fs.cluster_to_sector(ROOT_DIR_CLUSTER), &zero)?;
        Ok(fs)
    }

    /// Opens an existing filesystem, formatting it if the boot sector's
    /// magic doesn't match (first boot on a blank disk).
    pub fn open(device: Arc<Mutex<dyn BlockDevice>>) -> KernelResult<Self> {
        let mut buf = [0u8; SECTOR_SIZE];
        device.lock().read_sector(FAT_BOOT_SECTOR, &mut buf)?;
        let boot = BootSector::from_bytes(&buf);
        if boot.magic != FAT_MAGIC {
            return Self::format(device);
        }

        let fat_length = boot.total_sectors - 1 - boot.fat_sectors;
        let data_start = (boot.fat_start + boot.fat_sectors) as u64;
        let mut fat = alloc::vec![0 as Cluster; fat_length as usize];
        {
            let dev = device.lock();
            let mut offset = 0usize;
            let fat_bytes = fat_length as usize * core::mem::size_of::<Cluster>();
            let raw = unsafe {
                core::slice::from_raw_parts_mut(fat.as_mut_ptr() as *mut u8, fat_bytes)
            };
            for i in 0..boot.fat_sectors as u64 {
                let mut sector_buf = [0u8; SECTOR_SIZE];
                dev.read_sector(boot.fat_start as u64 + i, &mut sector_buf)?;
                let remaining = fat_bytes - offset;
                let take = remaining.min(SECTOR_SIZE);
                raw[offset..offset + take].copy_from_slice(&sector_buf[..take]);
                offset += take;
            }
        }
        Ok(FatFs {
            boot,
            fat: Mutex::new(fat),
            device,
            data_start,
        })
    }

    /// Writes the boot sector and FAT table back to the device.
    pub fn sync(&self) -> KernelResult<()> {
        let mut dev = self.device.lock();
        dev.write_sector(FAT_BOOT_SECTOR, &self.boot.to_bytes())?;

        let fat = self.fat.lock();
        let fat_bytes = fat.len() * core::mem::size_of::<Cluster>();
        let raw =
            unsafe { core::slice::from_raw_parts(fat.as_ptr() as *const u8, fat_bytes) };
        let mut offset = 0usize;
        for i in 0..self.boot.fat_sectors as u64 {
            let mut sector_buf = [0u8; SECTOR_SIZE];
            let remaining = fat_bytes.saturating_sub(offset);
            let take = remaining.min(SECTOR_SIZE);
            sector_buf[..take].copy_from_slice(&raw[offset..offset + take]);
            dev.write_sector(self.boot.fat_start as u64 + i, &sector_buf)?;
            offset += take;
        }
        Ok(())
    }

    pub fn root_dir_cluster(&self) -> Cluster {
        self.boot.root_dir_cluster
    }

    fn get(&self, clst: Cluster) -> Cluster {
        self.fat.lock()[(clst - 1) as usize]
    }

    fn put(&self, clst: Cluster, val: Cluster) {
        self.fat.lock()[(clst - 1) as usize] = val;
    }

    /// Appends a new cluster to the chain starting at `clst` (0 starts a
    /// fresh chain), returning the new cluster number or `None` if the
    /// disk is full.
    pub fn create_chain(&self, clst: Cluster) -> Option<Cluster> {
        let len = self.fat.lock().len() as Cluster;
        let mut free = None;
        for i in 2..=len {
            if self.get(i) == 0 {
                free = Some(i);
                break;
            }
        }
        let free = free?;
        self.put(free, EOCHAIN);

        if clst == 0 {
            return Some(free);
        }
        let mut tail = clst;
        while self.get(tail) != EOCHAIN {
            tail = self.get(tail);
        }
        self.put(tail, free);
        Some(free)
    }

    /// Frees every cluster in the chain from `clst` onward. If `pclst` is
    /// nonzero, it is the predecessor whose link is severed first.
    pub fn remove_chain(&self, clst: Cluster, pclst: Cluster) {
        if pclst != 0 {
            self.put(pclst, EOCHAIN);
        }
        let mut current = clst;
        loop {
            let next = self.get(current);
            self.put(current, 0);
            if next == EOCHAIN {
                break;
            }
            current = next;
        }
    }

    pub fn cluster_to_sector(&self, clst: Cluster) -> u64 {
        clst as u64 + self.data_start
    }

    pub fn read_cluster(&self, clst: Cluster, buf: &mut [u8; SECTOR_SIZE]) -> KernelResult<()> {
        self.device.lock().read_sector(self.cluster_to_sector(clst), buf)?;
        Ok(())
    }

    pub fn write_cluster(&self, clst: Cluster, buf: &[u8; SECTOR_SIZE]) -> KernelResult<()> {
        self.device
            .lock()
            .write_sector(self.cluster_to_sector(clst), buf)?;
        Ok(())
    }

    /// Walks the chain starting at `clst`, returning every cluster number
    /// up to and including the terminal one.
    pub fn chain_clusters(&self, clst: Cluster) -> Vec<Cluster> {
        if clst == 0 {
            return Vec::new();
        }
        let mut out = alloc::vec![clst];
        let mut current = clst;
        while self.get(current) != EOCHAIN {
            current = self.get(current);
            out.push(current);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::blockdev::RamBlockDevice;

    fn fresh_fs() -> FatFs {
        let dev = Arc::new(Mutex::new(RamBlockDevice::new(
            alloc::string::String::from("test"),
            256,
        )));
        FatFs::format(dev).unwrap()
    }

    #[test]
    fn format_marks_root_as_end_of_chain() {
        let fs = fresh_fs();
        assert_eq!(fs.get(ROOT_DIR_CLUSTER), EOCHAIN);
    }

    #[test]
    fn create_chain_extends_and_links() {
        let fs = fresh_fs();
        let a = fs.create_chain(0).unwrap();
        let b = fs.create_chain(a).unwrap();
        assert_ne!(a, b);
        assert_eq!(fs.get(a), b);
        assert_eq!(fs.get(b), EOCHAIN);
        assert_eq!(fs.chain_clusters(a), alloc::vec![a, b]);
    }

    #[test]
    fn remove_chain_frees_every_cluster() {
        let fs = fresh_fs();
        let a = fs.create_chain(0).unwrap();
        let b = fs.create_chain(a).unwrap();
        fs.remove_chain(a, 0);
        assert_eq!(fs.get(a), 0);
        assert_eq!(fs.get(b), 0);
    }

    #[test]
    fn cluster_data_round_trips() {
        let fs = fresh_fs();
        let c = fs.create_chain(0).unwrap();
        let mut buf = [0u8; SECTOR_SIZE];
        buf[0] = 7;
        fs.write_cluster(c, &buf).unwrap();
        let mut out = [0u8; SECTOR_SIZE];
        fs.read_cluster(c, &mut out).unwrap();
        assert_eq!(out, buf);
    }
}
