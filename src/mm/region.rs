//! Page Regions and the Allocator/Memory Boundaries
//!
//! A [`PageRegion`] is a contiguous, page-aligned virtual range owned by the
//! side that allocated it. It is deliberately not `Clone`: the only way to
//! give it back is [`PageAllocator::free`], which consumes it.

use super::address::{VirtAddr, PAGE_SIZE};
use crate::error::{ChannelError, MemoryFault};

/// A contiguous run of local pages.
#[derive(Debug, PartialEq, Eq)]
pub struct PageRegion {
    base: VirtAddr,
    page_count: usize,
}

impl PageRegion {
    /// Describe a region.
    ///
    /// Only allocators create regions; the returned value stands for
    /// ownership of the range.
    #[inline]
    pub const fn new(base: VirtAddr, page_count: usize) -> Self {
        Self { base, page_count }
    }

    /// First page of the region.
    #[inline]
    pub const fn base(&self) -> VirtAddr {
        self.base
    }

    /// Number of pages in the region.
    #[inline]
    pub const fn page_count(&self) -> usize {
        self.page_count
    }

    /// Size of the region in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        self.page_count * PAGE_SIZE
    }

    /// Check for an empty region.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.page_count == 0
    }

    /// Address of the `index`-th page, if inside the region.
    #[inline]
    pub fn page(&self, index: usize) -> Option<VirtAddr> {
        if index < self.page_count {
            self.base.page(index)
        } else {
            None
        }
    }

    /// Iterate over the page addresses in order.
    pub fn pages(&self) -> impl Iterator<Item = VirtAddr> + '_ {
        (0..self.page_count).filter_map(move |i| self.base.page(i))
    }

    /// Check whether `addr` lies inside the region.
    #[inline]
    pub fn contains(&self, addr: VirtAddr) -> bool {
        addr >= self.base && addr.as_usize() - self.base.as_usize() < self.len()
    }
}

/// Source of local page ranges.
///
/// The grantor uses it for the pages it shares; the accessor uses it to
/// reserve the ranges peer pages get mapped into.
pub trait PageAllocator {
    /// Allocate `page_count` contiguous pages, zeroed.
    fn allocate(&mut self, page_count: usize) -> Result<PageRegion, ChannelError>;

    /// Return a region to the allocator.
    fn free(&mut self, region: PageRegion);
}

/// Byte access to locally mapped pages.
pub trait PageMemory {
    /// Copy `buf.len()` bytes starting at `addr` into `buf`.
    fn read(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), MemoryFault>;

    /// Copy `bytes` into memory starting at `addr`.
    fn write(&mut self, addr: VirtAddr, bytes: &[u8]) -> Result<(), MemoryFault>;
}
