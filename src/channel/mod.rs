//! Shared-Memory Channel
//!
//! Two-party channel setup and teardown between a [`Grantor`], which owns
//! the pages, and an [`Accessor`], which maps them.
//!
//! # Ordering
//! - Grant before publish: the manifest is written only once every data
//!   token exists
//! - Map before use: the accessor reads nothing before its mapping exists
//! - Unmap before revoke: the grantor never frees a page the peer maps
//!
//! Each role's state lives in its own value; nothing is process-global.

pub mod accessor;
pub mod grantor;
pub mod manifest;
pub mod teardown;

#[cfg(test)]
mod tests_prop;

pub use accessor::{Accessor, AccessorState};
pub use grantor::{Grantor, GrantorState};
pub use manifest::{ChannelManifest, LayoutMode, TokenList, MANIFEST_SIZE, MAX_DATA_PAGES};
pub use teardown::{ReleaseFailure, ReleaseStep, TeardownReport};

use crate::cap::CapabilityAuthority;
use crate::mm::{PageAllocator, PageMemory};

/// Everything one domain needs from its host to run either role.
pub trait Platform: CapabilityAuthority + PageAllocator + PageMemory {}

impl<T: CapabilityAuthority + PageAllocator + PageMemory + ?Sized> Platform for T {}
