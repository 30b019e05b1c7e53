//! Shared generation arrays.
//!
//! A generation array is a fixed-size block of 32-bit integers owned jointly
//! by the settings service (the only writer) and any number of client
//! processes (readers). Each namespace has one slot whose value the service
//! bumps on every change. Clients hold a handle, read their slot, and close
//! the handle when they stop tracking.
//!
//! The cache only depends on the narrow [`MemoryIntArray`] trait so that the
//! tracking logic can run against in-memory fakes.

pub mod atomic;
pub mod mapped;

pub use atomic::AtomicIntArray;
pub use mapped::MappedIntArray;

use crate::error::MemoryError;
use std::fmt;

/// Size in bytes of one slot.
pub const SLOT_SIZE: usize = std::mem::size_of::<i32>();

/// Read-only view onto an externally owned block of integers.
pub trait MemoryIntArray: Send + Sync + fmt::Debug {
    /// Number of slots in the block.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the value at `index`.
    fn get(&self, index: usize) -> Result<i32, MemoryError>;

    /// Release this handle. Other handles onto the same block are unaffected.
    fn close(&self) -> Result<(), MemoryError>;

    /// Whether this handle has been closed.
    fn is_closed(&self) -> bool;
}

fn check_index(index: usize, len: usize) -> Result<(), MemoryError> {
    if index >= len {
        Err(MemoryError::IndexOutOfBounds { index, len })
    } else {
        Ok(())
    }
}
