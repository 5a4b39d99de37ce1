//! Direct-Mapped Page Arena
//!
//! Uses `linked_list_allocator` to carve page-aligned regions out of a
//! fixed arena of kernel memory, the way a host kernel hands out free pages
//! for sharing. The same arena is directly addressable, so this type also
//! provides [`PageMemory`] for it.
//!
//! # Security Considerations
//! - Pages are scrubbed when allocated and again when freed
//! - Every byte access is bounds-checked against the arena
//! - Unknown or misaligned regions are never passed to the heap

use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::Heap;
use log::error;

use super::address::{VirtAddr, PAGE_SIZE};
use super::region::{PageAllocator, PageMemory, PageRegion};
use crate::error::{ChannelError, MemoryFault};
use crate::security::Zeroize;

/// Page allocator and memory accessor over one direct-mapped arena.
pub struct HeapPages {
    heap: Heap,
    start: usize,
    size: usize,
}

impl HeapPages {
    /// Create an arena with no memory behind it.
    pub const fn empty() -> Self {
        Self {
            heap: Heap::empty(),
            start: 0,
            size: 0,
        }
    }

    /// Create an arena over `size` bytes at `start`.
    ///
    /// # Safety
    /// - `start..start + size` must be valid, writable memory
    /// - The memory must not be used by anything else while the arena lives
    pub unsafe fn new(start: *mut u8, size: usize) -> Self {
        let mut pages = Self::empty();
        // SAFETY: forwarded caller contract
        unsafe { pages.init(start, size) };
        pages
    }

    /// Hand the arena its memory. Must be called at most once.
    ///
    /// # Safety
    /// Same contract as [`HeapPages::new`].
    pub unsafe fn init(&mut self, start: *mut u8, size: usize) {
        // SAFETY: caller guarantees exclusive, valid memory
        unsafe { self.heap.init(start, size) };
        self.start = start as usize;
        self.size = size;
    }

    /// Bytes still available in the arena.
    pub fn free_bytes(&self) -> usize {
        self.heap.free()
    }

    fn layout(page_count: usize) -> Option<Layout> {
        let size = page_count.checked_mul(PAGE_SIZE)?;
        Layout::from_size_align(size, PAGE_SIZE).ok()
    }

    /// Check that `addr..addr + len` lies inside the arena.
    fn validate(&self, addr: VirtAddr, len: usize) -> Result<usize, MemoryFault> {
        let fault = MemoryFault { addr };
        let start = addr.as_usize();
        if start == 0 || start < self.start {
            return Err(fault);
        }
        let end = start.checked_add(len).ok_or(fault)?;
        if end > self.start + self.size {
            return Err(fault);
        }
        Ok(start)
    }

    fn scrub(&mut self, region: &PageRegion) {
        if let Ok(start) = self.validate(region.base(), region.len()) {
            // SAFETY: range validated to lie inside our exclusively owned arena
            let bytes = unsafe { core::slice::from_raw_parts_mut(start as *mut u8, region.len()) };
            bytes.zeroize();
        }
    }
}

impl PageAllocator for HeapPages {
    fn allocate(&mut self, page_count: usize) -> Result<PageRegion, ChannelError> {
        if page_count == 0 {
            return Err(ChannelError::AllocationFailed);
        }
        let layout = Self::layout(page_count).ok_or(ChannelError::AllocationFailed)?;
        let ptr = self
            .heap
            .allocate_first_fit(layout)
            .map_err(|_| ChannelError::AllocationFailed)?;

        let region = PageRegion::new(VirtAddr::new(ptr.as_ptr() as usize), page_count);
        self.scrub(&region);
        Ok(region)
    }

    fn free(&mut self, region: PageRegion) {
        let (Some(layout), Some(ptr)) = (
            Self::layout(region.page_count()),
            NonNull::new(region.base().as_usize() as *mut u8),
        ) else {
            error!("[MM] refusing to free bogus region at {}", region.base());
            return;
        };
        if !region.base().is_aligned() || self.validate(region.base(), region.len()).is_err() {
            error!("[MM] refusing to free region outside arena at {}", region.base());
            return;
        }

        self.scrub(&region);
        // SAFETY: the region was produced by `allocate` with the same layout
        // and ownership of it is consumed here.
        unsafe { self.heap.deallocate(ptr, layout) };
    }
}

impl PageMemory for HeapPages {
    fn read(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), MemoryFault> {
        let start = self.validate(addr, buf.len())?;
        // SAFETY: range validated to lie inside the arena
        unsafe { core::ptr::copy_nonoverlapping(start as *const u8, buf.as_mut_ptr(), buf.len()) };
        Ok(())
    }

    fn write(&mut self, addr: VirtAddr, bytes: &[u8]) -> Result<(), MemoryFault> {
        let start = self.validate(addr, bytes.len())?;
        // SAFETY: range validated to lie inside the arena
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), start as *mut u8, bytes.len()) };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::alloc::{alloc_zeroed, dealloc};

    const ARENA_PAGES: usize = 16;

    fn with_arena(test: impl FnOnce(&mut HeapPages)) {
        let layout = Layout::from_size_align(ARENA_PAGES * PAGE_SIZE, PAGE_SIZE).unwrap();
        // SAFETY: non-zero layout
        let start = unsafe { alloc_zeroed(layout) };
        assert!(!start.is_null());
        // SAFETY: freshly allocated, exclusively owned for the test
        let mut pages = unsafe { HeapPages::new(start, layout.size()) };
        test(&mut pages);
        drop(pages);
        // SAFETY: allocated above with the same layout
        unsafe { dealloc(start, layout) };
    }

    #[test]
    fn test_allocate_aligned_and_scrubbed() {
        with_arena(|pages| {
            let data = pages.allocate(8).unwrap();
            assert!(data.base().is_aligned());
            assert_eq!(data.page_count(), 8);

            pages.write(data.base(), &[0xEE; 64]).unwrap();
            pages.free(data);

            let again = pages.allocate(8).unwrap();
            let mut buf = [0xFFu8; 64];
            pages.read(again.base(), &mut buf).unwrap();
            assert!(buf.iter().all(|&b| b == 0));
        });
    }

    #[test]
    fn test_exhaustion() {
        with_arena(|pages| {
            let full = pages.free_bytes();
            assert_eq!(pages.allocate(0), Err(ChannelError::AllocationFailed));
            assert_eq!(pages.allocate(ARENA_PAGES + 1), Err(ChannelError::AllocationFailed));
            let data = pages.allocate(8).unwrap();
            let control = pages.allocate(1).unwrap();
            assert!(!data.contains(control.base()));
            assert!(pages.free_bytes() <= full - 9 * PAGE_SIZE);
            pages.free(control);
            pages.free(data);
            assert_eq!(pages.free_bytes(), full);
        });
    }

    #[test]
    fn test_bounds_checked_access() {
        with_arena(|pages| {
            let region = pages.allocate(1).unwrap();
            pages.write(region.base(), b"TEST TEST TEST").unwrap();
            let mut buf = [0u8; 14];
            pages.read(region.base(), &mut buf).unwrap();
            assert_eq!(&buf, b"TEST TEST TEST");

            let mut byte = [0u8; 1];
            assert!(pages.read(VirtAddr::new(0), &mut byte).is_err());
            assert!(pages.read(VirtAddr::new(usize::MAX), &mut byte).is_err());
            let past_end = VirtAddr::new(pages.start + pages.size);
            assert_eq!(pages.write(past_end, &[1]), Err(MemoryFault { addr: past_end }));
            pages.free(region);
        });
    }
}
