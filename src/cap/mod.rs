//! Grant Capabilities
//!
//! Page-granularity capabilities issued by a third-party authority.
//!
//! # Design
//! - The granting domain owns a token from grant until revoke
//! - The mapping domain owns a handle from map until unmap
//! - Only token and handle *values* ever cross between domains
//!
//! # Security Properties
//! - Every non-`Okay` authority status reaches the caller
//! - Revocation refuses to end a grant the peer still maps

pub mod authority;
pub mod primitives;
pub mod token;

pub use authority::CapabilityAuthority;
pub use primitives::{Grant, Mapping};
pub use token::{CapabilityToken, DomainId, GrantFlags, GrantStatus, MapFlags, MappingHandle};
