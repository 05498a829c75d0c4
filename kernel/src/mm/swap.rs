//! Anonymous-page swap device (spec.md §4.5)
//!
//! A single global swap disk, addressed in `PGSIZE/SECTOR_SIZE`-sector
//! slots tracked by a bitmap, reusing `fs::blockdev::BlockDevice` rather
//! than inventing a parallel disk abstraction.

extern crate alloc;

use alloc::string::String;
use alloc::sync::Arc;

use spin::Mutex;

use crate::config::{PGSIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
use crate::fs::blockdev::{BlockDevice, RamBlockDevice};

pub struct SwapDevice {
    device: Mutex<Arc<Mutex<dyn BlockDevice>>>,
    bitmap: Mutex<alloc::vec::Vec<bool>>,
}

impl SwapDevice {
    pub fn new(device: Arc<Mutex<dyn BlockDevice>>) -> Self {
        let slots = device.lock().sector_count() as usize / SECTORS_PER_PAGE;
        SwapDevice {
            device: Mutex::new(device),
            bitmap: Mutex::new(alloc::vec![false; slots]),
        }
    }

    pub fn alloc_slot(&self) -> Option<usize> {
        let mut bitmap = self.bitmap.lock();
        let idx = bitmap.iter().position(|used| !used)?;
        bitmap[idx] = true;
        Some(idx)
    }

    pub fn free_slot(&self, slot: usize) {
        if let Some(used) = self.bitmap.lock().get_mut(slot) {
            *used = false;
        }
    }

    pub fn write_slot(&self, slot: usize, bytes: &[u8; PGSIZE]) {
        let device = self.device.lock();
        let mut dev = device.lock();
        for i in 0..SECTORS_PER_PAGE {
            let mut sector = [0u8; SECTOR_SIZE];
            sector.copy_from_slice(&bytes[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
            let _ = dev.write_sector((slot * SECTORS_PER_PAGE + i) as u64, &sector);
        }
    }

    pub fn read_slot(&self, slot: usize, bytes: &mut [u8; PGSIZE]) {
        let device = self.device.lock();
        let mut dev = device.lock();
        for i in 0..SECTORS_PER_PAGE {
            let mut sector = [0u8; SECTOR_SIZE];
            let _ = dev.read_sector((slot * SECTORS_PER_PAGE + i) as u64, &mut sector);
            bytes[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE].copy_from_slice(&sector);
        }
    }
}

static SWAP: Mutex<Option<Arc<SwapDevice>>> = Mutex::new(None);

pub fn init(sectors: u64) {
    let device: Arc<Mutex<dyn BlockDevice>> =
        Arc::new(Mutex::new(RamBlockDevice::new(String::from("swap"), sectors)));
    *SWAP.lock() = Some(Arc::new(SwapDevice::new(device)));
}

/// Returns the global swap device, initializing a default-sized one on
/// first use (handy for tests that never call [`init`] explicitly).
pub fn swap_device() -> Arc<SwapDevice> {
    let mut guard = SWAP.lock();
    if guard.is_none() {
        let device: Arc<Mutex<dyn BlockDevice>> =
            Arc::new(Mutex::new(RamBlockDevice::new(String::from("swap"), 4096)));
        *guard = Some(Arc::new(SwapDevice::new(device)));
    }
    guard.as_ref().unwrap().clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_write_read_round_trips() {
        let device: Arc<Mutex<dyn BlockDevice>> =
            Arc::new(Mutex::new(RamBlockDevice::new(String::from("t"), 64)));
        let swap = SwapDevice::new(device);
        let slot = swap.alloc_slot().unwrap();
        let mut buf = [0u8; PGSIZE];
        buf[0] = 7;
        swap.write_slot(slot, &buf);
        let mut out = [0u8; PGSIZE];
        swap.read_slot(slot, &mut out);
        assert_eq!(out[0], 7);
    }

    #[test]
    fn free_slot_allows_reuse() {
        let device: Arc<Mutex<dyn BlockDevice>> =
            Arc::new(Mutex::new(RamBlockDevice::new(String::from("t"), 64)));
        let swap = SwapDevice::new(device);
        let slot = swap.alloc_slot().unwrap();
        swap.free_slot(slot);
        assert_eq!(swap.alloc_slot(), Some(slot));
    }
}
