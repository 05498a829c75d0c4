//! Slab-indexed intrusive list and open-addressing hash table
//!
//! An embed-and-offset intrusive list puts link fields directly in the
//! enclosing struct and recovers the container via pointer-offset
//! arithmetic. That idiom is replaced here with
//! a safe handle-indexed slab: the contract (`O(1)` remove given a handle,
//! merge sort, FIFO, ordered insert) is identical, but ownership and
//! aliasing stay within Rust's normal rules.

pub mod hash;
pub mod list;

pub use hash::HashTable;
pub use list::{Handle, List};
