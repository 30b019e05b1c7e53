//! In-process generation array backed by atomics.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use super::{check_index, MemoryIntArray};
use crate::error::MemoryError;

/// A generation block living in this process's heap.
///
/// Every handle created with [`AtomicIntArray::handle`] shares the same
/// block but has its own open/closed state, so a client closing its handle
/// never affects the service or other clients.
#[derive(Debug)]
pub struct AtomicIntArray {
    block: Arc<[AtomicI32]>,
    closed: AtomicBool,
}

impl AtomicIntArray {
    /// Allocate a zeroed block of `len` slots.
    pub fn new(len: usize) -> Self {
        let slots: Vec<AtomicI32> = (0..len).map(|_| AtomicI32::new(0)).collect();
        Self {
            block: Arc::from(slots),
            closed: AtomicBool::new(false),
        }
    }

    /// Open another handle onto the same block.
    pub fn handle(&self) -> Self {
        Self {
            block: Arc::clone(&self.block),
            closed: AtomicBool::new(false),
        }
    }

    /// Store `value` at `index`.
    pub fn set(&self, index: usize, value: i32) -> Result<(), MemoryError> {
        self.ensure_open()?;
        check_index(index, self.block.len())?;
        self.block[index].store(value, Ordering::Release);
        Ok(())
    }

    /// Bump the counter at `index`, returning the new value. Wraps on overflow.
    pub fn increment(&self, index: usize) -> Result<i32, MemoryError> {
        self.ensure_open()?;
        check_index(index, self.block.len())?;
        let previous = self.block[index].fetch_add(1, Ordering::AcqRel);
        Ok(previous.wrapping_add(1))
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.closed.load(Ordering::Acquire) {
            Err(MemoryError::Closed)
        } else {
            Ok(())
        }
    }
}

impl MemoryIntArray for AtomicIntArray {
    fn len(&self) -> usize {
        self.block.len()
    }

    fn get(&self, index: usize) -> Result<i32, MemoryError> {
        self.ensure_open()?;
        check_index(index, self.block.len())?;
        Ok(self.block[index].load(Ordering::Acquire))
    }

    fn close(&self) -> Result<(), MemoryError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_is_zeroed() {
        let array = AtomicIntArray::new(3);
        assert_eq!(array.len(), 3);
        for i in 0..3 {
            assert_eq!(array.get(i).unwrap(), 0);
        }
    }

    #[test]
    fn test_handles_share_values() {
        let service = AtomicIntArray::new(2);
        let client = service.handle();

        service.set(1, 41).unwrap();
        assert_eq!(service.increment(1).unwrap(), 42);
        assert_eq!(client.get(1).unwrap(), 42);
    }

    #[test]
    fn test_close_is_per_handle() {
        let service = AtomicIntArray::new(1);
        let client = service.handle();

        client.close().unwrap();
        assert!(client.is_closed());
        assert_eq!(client.get(0), Err(MemoryError::Closed));

        assert!(!service.is_closed());
        assert_eq!(service.increment(0).unwrap(), 1);
    }

    #[test]
    fn test_out_of_bounds() {
        let array = AtomicIntArray::new(2);
        assert_eq!(
            array.get(2),
            Err(MemoryError::IndexOutOfBounds { index: 2, len: 2 })
        );
        assert!(array.set(5, 1).is_err());
    }

    #[test]
    fn test_increment_wraps() {
        let array = AtomicIntArray::new(1);
        array.set(0, i32::MAX).unwrap();
        assert_eq!(array.increment(0).unwrap(), i32::MIN);
    }
}
