//! Device slot numbering.

use std::sync::{Mutex, PoisonError};

use crate::error::{DspError, Result};

/// Owned bitmap allocator for device minor numbers.
///
/// One allocator instance per device class; no process-wide state.
#[derive(Debug)]
pub struct MinorAllocator {
    bitmap: Mutex<u64>,
    capacity: usize,
}

impl MinorAllocator {
    /// Create an allocator with `capacity` slots, all free.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` exceeds 64.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        assert!(capacity <= 64);
        Self {
            bitmap: Mutex::new(0),
            capacity,
        }
    }

    /// Claim the lowest free slot.
    ///
    /// # Errors
    ///
    /// Returns [`DspError::NoFreeMinor`] when every slot is taken.
    pub fn acquire(&self) -> Result<usize> {
        let mut bitmap = self.bitmap.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in 0..self.capacity {
            if *bitmap & (1 << slot) == 0 {
                *bitmap |= 1 << slot;
                return Ok(slot);
            }
        }
        Err(DspError::NoFreeMinor {
            capacity: self.capacity,
        })
    }

    /// Return a slot to the free pool. Releasing a free slot is a no-op.
    pub fn release(&self, slot: usize) {
        if slot < self.capacity {
            *self.bitmap.lock().unwrap_or_else(PoisonError::into_inner) &= !(1 << slot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_lowest_free() {
        let alloc = MinorAllocator::new(4);
        assert_eq!(alloc.acquire().unwrap(), 0);
        assert_eq!(alloc.acquire().unwrap(), 1);
        alloc.release(0);
        assert_eq!(alloc.acquire().unwrap(), 0);
    }

    #[test]
    fn exhaustion_reports_capacity() {
        let alloc = MinorAllocator::new(2);
        alloc.acquire().unwrap();
        alloc.acquire().unwrap();
        assert!(matches!(
            alloc.acquire(),
            Err(DspError::NoFreeMinor { capacity: 2 })
        ));
    }

    #[test]
    fn release_out_of_range_is_ignored() {
        let alloc = MinorAllocator::new(2);
        alloc.release(63);
        assert_eq!(alloc.acquire().unwrap(), 0);
    }
}
