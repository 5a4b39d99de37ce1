//! Capability Authority Boundary
//!
//! The trusted third party (the hypervisor's grant table) that records which
//! domain may map which page. This crate never implements the authority for
//! real; hosts plug in their hypercall layer, tests plug in [`crate::sim`].

use super::token::{CapabilityToken, DomainId, GrantFlags, GrantStatus, MapFlags, MappingHandle};
use crate::mm::VirtAddr;

/// Grant-table operations as seen from one domain.
///
/// Every call may block indefinitely; none is retried by this crate.
pub trait CapabilityAuthority {
    /// Allow `peer` to map the local page at `page`. The authority picks the token.
    fn grant(
        &mut self,
        page: VirtAddr,
        peer: DomainId,
        flags: GrantFlags,
    ) -> Result<CapabilityToken, GrantStatus>;

    /// Allow `peer` to map the local page at `page` under a statically agreed token.
    fn grant_with_token(
        &mut self,
        token: CapabilityToken,
        page: VirtAddr,
        peer: DomainId,
        flags: GrantFlags,
    ) -> Result<(), GrantStatus>;

    /// Check whether a peer currently maps the page behind `token`.
    fn query_access(&self, token: CapabilityToken) -> bool;

    /// End a grant. Fails with `Busy` while the peer still maps it.
    fn revoke(&mut self, token: CapabilityToken) -> Result<(), GrantStatus>;

    /// Map the page `peer` granted under `token` at the local address `at`.
    fn map(
        &mut self,
        token: CapabilityToken,
        peer: DomainId,
        at: VirtAddr,
        flags: MapFlags,
    ) -> Result<MappingHandle, GrantStatus>;

    /// Undo the mapping `handle` installed at `at`. Not idempotent.
    fn unmap(&mut self, handle: MappingHandle, at: VirtAddr) -> Result<(), GrantStatus>;
}
