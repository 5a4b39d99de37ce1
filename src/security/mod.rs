//! Security Primitives Module
//!
//! - Page scrubbing before sharing and before release
//!
//! # Security Properties
//! - Memory is cleared using volatile writes to prevent optimization

pub mod zeroize;

pub use zeroize::Zeroize;
