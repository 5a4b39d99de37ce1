//! Memory management for the channel
//!
//! Provides:
//! - Address and frame number types
//! - Page regions and the allocator/memory boundaries
//! - A bitmap page-number allocator
//! - A direct-mapped page arena backed by a linked-list heap
//!
//! # Security Principles
//! - All accesses are bounds-checked
//! - Pages are zeroed before they are shared
//! - Unsafe code is minimal and audited

pub mod address;
pub mod bitmap;
pub mod heap;
pub mod region;

pub use address::{FrameNumber, VirtAddr, PAGE_SHIFT, PAGE_SIZE};
pub use bitmap::{DoubleFree, PageBitmap};
pub use heap::HeapPages;
pub use region::{PageAllocator, PageMemory, PageRegion};
