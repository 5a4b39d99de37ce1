//! Page Number Bitmap
//!
//! Tracks which page numbers of a fixed range are in use.
//!
//! # Design
//! - Each bit in the bitmap represents one page
//! - Bit = 0: page is free
//! - Bit = 1: page is allocated
//! - Runs are found first-fit with a linear scan
//!
//! Double frees are reported, not ignored.

use alloc::vec;
use alloc::vec::Vec;

/// Error returned when releasing pages that are not allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoubleFree {
    /// First offending page index.
    pub index: usize,
}

/// Bitmap allocator over page indices `0..capacity`.
#[derive(Debug, Clone)]
pub struct PageBitmap {
    /// Bitmap tracking allocated pages (1 = allocated, 0 = free).
    bitmap: Vec<u8>,
    /// Number of pages under management.
    capacity: usize,
    /// Number of free pages remaining.
    free_count: usize,
}

impl PageBitmap {
    /// Create a bitmap with every page free.
    pub fn new(capacity: usize) -> Self {
        Self {
            bitmap: vec![0; capacity.div_ceil(8)],
            capacity,
            free_count: capacity,
        }
    }

    /// Set a bit in the bitmap.
    #[inline]
    fn set_bit(&mut self, index: usize, allocated: bool) {
        let byte_idx = index / 8;
        let bit_idx = index % 8;

        if allocated {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            self.bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }

    /// Check if a page is allocated. Out of range counts as allocated.
    #[inline]
    pub fn is_allocated(&self, index: usize) -> bool {
        if index >= self.capacity {
            return true;
        }
        (self.bitmap[index / 8] >> (index % 8)) & 1 == 1
    }

    /// Allocate `count` consecutive pages, returning the first index.
    pub fn alloc_run(&mut self, count: usize) -> Option<usize> {
        if count == 0 || count > self.free_count {
            return None;
        }

        let mut start = 0;
        let mut run = 0;
        for index in 0..self.capacity {
            if self.is_allocated(index) {
                run = 0;
                start = index + 1;
                continue;
            }
            run += 1;
            if run == count {
                for i in start..start + count {
                    self.set_bit(i, true);
                }
                self.free_count -= count;
                return Some(start);
            }
        }

        None
    }

    /// Release `count` pages starting at `start`.
    ///
    /// Nothing is released if any page in the run is not allocated.
    pub fn free_run(&mut self, start: usize, count: usize) -> Result<(), DoubleFree> {
        let mut run = start..start + count;
        if let Some(index) = run.find(|&i| i >= self.capacity || !self.is_allocated(i)) {
            return Err(DoubleFree { index });
        }
        for i in start..start + count {
            self.set_bit(i, false);
        }
        self.free_count += count;
        Ok(())
    }

    /// Get the number of free pages.
    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count
    }
}
