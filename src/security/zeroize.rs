//! Page Scrubbing
//!
//! Pages are scrubbed before they are handed to a peer and again before
//! they go back to the allocator, so a grant never exposes stale data.
//!
//! # Design
//! - `Zeroize` for byte memory of any length
//! - Every byte is cleared with a volatile write, followed by a fence, so
//!   the compiler cannot drop the stores as dead

use core::ptr;
use core::sync::atomic::{compiler_fence, Ordering};

/// Memory that can be cleared in a way the optimizer must keep.
pub trait Zeroize {
    /// Overwrite with zeros.
    fn zeroize(&mut self);
}

impl Zeroize for [u8] {
    fn zeroize(&mut self) {
        for byte in self.iter_mut() {
            // SAFETY: `byte` is a valid, exclusive reference
            unsafe { ptr::write_volatile(byte, 0) };
        }
        compiler_fence(Ordering::SeqCst);
    }
}

impl<const N: usize> Zeroize for [u8; N] {
    fn zeroize(&mut self) {
        self.as_mut_slice().zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroize_slice() {
        let mut data = [0x42u8; 16];
        data.zeroize();
        assert!(data.iter().all(|&b| b == 0));

        let mut page = alloc::vec![0xA5u8; 4096];
        page[100..200].zeroize();
        assert!(page[100..200].iter().all(|&b| b == 0));
        assert_eq!(page[99], 0xA5);
        assert_eq!(page[200], 0xA5);
    }
}
