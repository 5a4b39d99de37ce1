//! ivc-shm - Inter-Domain Shared-Memory Channel
//!
//! Page-granularity shared memory between two isolated domains, brokered
//! by a capability authority (a hypervisor grant table).
//!
//! # Roles
//! - The grantor allocates and grants one control page under a well-known
//!   token, grants its data pages, and publishes their tokens as a manifest
//! - The accessor maps the control page, reads the manifest, and maps the
//!   data pages contiguously
//!
//! # Security Features
//! - Nothing acquired is leaked: every partial failure rolls back, newest first
//! - A page the peer still maps is never returned to the allocator
//! - Every authority status reaches the caller
//! - Pages are scrubbed before they are shared and after release
//!
//! # Hosting
//! The crate is `no_std` + `alloc`. A host supplies a
//! [`cap::CapabilityAuthority`] and a page allocator; [`mm::HeapPages`]
//! covers direct-mapped arenas and [`sim`] simulates a whole machine.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod cap;
pub mod channel;
pub mod config;
pub mod console;
pub mod error;
pub mod mm;
pub mod security;
pub mod sim;

pub use channel::{Accessor, AccessorState, Grantor, GrantorState, Platform, TeardownReport};
pub use config::ChannelConfig;
pub use error::ChannelError;
