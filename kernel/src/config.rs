//! Compile-time kernel tunables
//!
//! Collected in one place the way the teacher scatters a handful of
//! `pub const` tunables near their point of use (`DEFAULT_TIME_SLICE`,
//! `PRIORITY_BOOST_INTERVAL` in the original `sched/task.rs`); the core
//! triad has enough of these shared across modules to warrant a dedicated
//! module instead.

/// Lowest schedulable priority value.
pub const PRI_MIN: u8 = 0;
/// Highest schedulable priority value.
pub const PRI_MAX: u8 = 63;
/// Priority newly created threads start at absent other instruction.
pub const PRI_DEFAULT: u8 = 31;

/// Lowest/highest `nice` value under MLFQS.
pub const NICE_MIN: i32 = -20;
pub const NICE_MAX: i32 = 20;

/// Timer ticks per second.
pub const TIMER_FREQ: u64 = 100;

/// Length of one scheduling quantum, in timer ticks.
pub const TIME_SLICE_TICKS: u32 = 4;

/// Maximum depth of transitive priority donation (spec I3).
pub const MAX_DONATION_DEPTH: u32 = 8;

/// Number of slots in a process's file-descriptor table.
pub const FDTABLE_CAPACITY: usize = 128;

/// A user stack may grow at most this far below its current top.
pub const USER_STACK_LIMIT_BYTES: usize = 1024 * 1024;

/// Disk sector size in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Page size in bytes.
pub const PGSIZE: usize = 4096;

/// Sectors consumed by one swapped-out page.
pub const SECTORS_PER_PAGE: usize = PGSIZE / SECTOR_SIZE;

/// Highest byte of user address space (exclusive upper bound).
pub const USER_ADDR_TOP: usize = 0x0000_8000_0000_0000;

/// Frames in the single user physical page pool (spec.md §4.4).
pub const USER_POOL_FRAMES: usize = 4096;

/// Sectors on the swap device, sized for a handful of evicted pages.
pub const SWAP_DEVICE_SECTORS: u64 = 4096;
