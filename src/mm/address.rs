//! Virtual Addresses and Machine Frames
//!
//! Type-safe wrappers that keep a domain's local virtual addresses apart
//! from the machine frame numbers the capability authority hands around.
//!
//! # Security Properties
//! - Neither type can be dereferenced; memory is reached only through
//!   `PageMemory`, which bounds-checks every access
//! - Page arithmetic is checked instead of wrapping

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: usize = 12;

/// A machine frame number.
///
/// Identifies one page of machine memory independently of which domain
/// maps it, or where.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    /// Create a frame number.
    #[inline]
    pub const fn new(frame: usize) -> Self {
        Self(frame)
    }

    /// Get the raw frame index.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameNumber({:#x})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mfn {:#x}", self.0)
    }
}

/// A virtual address in one domain's address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Get the virtual page number.
    #[inline]
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Create from a virtual page number.
    #[inline]
    pub const fn from_page_number(vpn: usize) -> Self {
        Self(vpn << PAGE_SHIFT)
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Add a byte offset, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Address of the `index`-th page after this one.
    #[inline]
    pub const fn page(self, index: usize) -> Option<Self> {
        match index.checked_mul(PAGE_SIZE) {
            Some(offset) => self.checked_add(offset),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#018x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_alignment() {
        let addr = VirtAddr::new(0x4008_1234);
        assert!(!addr.is_aligned());
        assert_eq!(addr.page_offset(), 0x234);
        assert_eq!(addr.page_number(), 0x4_0081);
        assert!(VirtAddr::from_page_number(addr.page_number()).is_aligned());
    }

    #[test]
    fn test_page_indexing() {
        let base = VirtAddr::new(0x1000_0000);
        assert_eq!(base.page(3), Some(VirtAddr::new(0x1000_3000)));
        assert_eq!(VirtAddr::from_page_number(base.page_number()), base);
        assert_eq!(VirtAddr::new(usize::MAX - 10).page(1), None);
    }
}
