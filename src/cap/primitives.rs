//! Grant/Map Primitives
//!
//! Uniform wrappers over the four authority operations. Each wrapper logs
//! the outcome and turns any non-`Okay` status into a [`ChannelError`];
//! no status is ever dropped on the floor.
//!
//! # Ownership
//! - A [`Grant`] stays with the granting side until [`revoke`] succeeds.
//! - A [`Mapping`] stays with the mapping side until [`unmap`] succeeds.

use log::{debug, error, warn};

use super::authority::CapabilityAuthority;
use super::token::{CapabilityToken, DomainId, GrantFlags, GrantStatus, MapFlags, MappingHandle};
use crate::error::ChannelError;
use crate::mm::VirtAddr;

/// A live grant of one local page to a peer.
#[derive(Debug, PartialEq, Eq)]
pub struct Grant {
    token: CapabilityToken,
    page: VirtAddr,
    peer: DomainId,
}

impl Grant {
    /// Token the peer uses to map the page.
    #[inline]
    pub const fn token(&self) -> CapabilityToken {
        self.token
    }

    /// Local address of the granted page.
    #[inline]
    pub const fn page(&self) -> VirtAddr {
        self.page
    }

    /// Domain allowed to map the page.
    #[inline]
    pub const fn peer(&self) -> DomainId {
        self.peer
    }
}

/// A live local mapping of a peer's page.
#[derive(Debug, PartialEq, Eq)]
pub struct Mapping {
    handle: MappingHandle,
    token: CapabilityToken,
    addr: VirtAddr,
}

impl Mapping {
    /// Handle needed to unmap.
    #[inline]
    pub const fn handle(&self) -> MappingHandle {
        self.handle
    }

    /// Peer token this mapping was made from.
    #[inline]
    pub const fn token(&self) -> CapabilityToken {
        self.token
    }

    /// Local address the page is mapped at.
    #[inline]
    pub const fn addr(&self) -> VirtAddr {
        self.addr
    }
}

/// Grant `peer` access to the local page at `page`.
pub fn grant<A: CapabilityAuthority + ?Sized>(
    authority: &mut A,
    page: VirtAddr,
    peer: DomainId,
    flags: GrantFlags,
) -> Result<Grant, ChannelError> {
    match authority.grant(page, peer, flags) {
        Ok(token) => {
            debug!("[GNTTAB] granted {} to {} as token {}", page, peer, token);
            Ok(Grant { token, page, peer })
        }
        Err(status) => {
            error!("[GNTTAB] failed granting {} to {}: {}", page, peer, status);
            Err(ChannelError::GrantFailed(status))
        }
    }
}

/// Grant `peer` access to the local page at `page` under the agreed `token`.
pub fn grant_as<A: CapabilityAuthority + ?Sized>(
    authority: &mut A,
    token: CapabilityToken,
    page: VirtAddr,
    peer: DomainId,
    flags: GrantFlags,
) -> Result<Grant, ChannelError> {
    match authority.grant_with_token(token, page, peer, flags) {
        Ok(()) => {
            debug!("[GNTTAB] granted {} to {} as well-known token {}", page, peer, token);
            Ok(Grant { token, page, peer })
        }
        Err(status) => {
            error!(
                "[GNTTAB] failed granting {} to {} as token {}: {}",
                page, peer, token, status
            );
            Err(ChannelError::GrantFailed(status))
        }
    }
}

/// End a grant.
///
/// The authority is asked first whether the peer still maps the page; if
/// so nothing is revoked and `PeerStillMapped` is returned. The caller must
/// keep the page out of circulation until a later revoke succeeds. The
/// check is best effort: a map can still race in between, which the
/// authority reports as `Busy` and which is treated the same way.
pub fn revoke<A: CapabilityAuthority + ?Sized>(
    authority: &mut A,
    grant: &Grant,
) -> Result<(), ChannelError> {
    if authority.query_access(grant.token) {
        warn!("[GNTTAB] remote domain still using grant {}", grant.token);
        return Err(ChannelError::PeerStillMapped(grant.token));
    }

    match authority.revoke(grant.token) {
        Ok(()) => {
            debug!("[GNTTAB] revoked token {}", grant.token);
            Ok(())
        }
        Err(GrantStatus::Busy) => {
            warn!("[GNTTAB] grant {} mapped concurrently with revoke", grant.token);
            Err(ChannelError::PeerStillMapped(grant.token))
        }
        Err(status) => {
            error!("[GNTTAB] revoke of token {} failed: {}", grant.token, status);
            Err(ChannelError::RevokeFailed(status))
        }
    }
}

/// Map the page `peer` granted under `token` at `at`.
pub fn map<A: CapabilityAuthority + ?Sized>(
    authority: &mut A,
    token: CapabilityToken,
    peer: DomainId,
    at: VirtAddr,
    flags: MapFlags,
) -> Result<Mapping, ChannelError> {
    match authority.map(token, peer, at, flags) {
        Ok(handle) => {
            debug!("[GNTTAB] mapped token {} of {} at {} (handle {})", token, peer, at, handle);
            Ok(Mapping { handle, token, addr: at })
        }
        Err(status) => {
            error!("[GNTTAB] map of token {} of {} failed: {}", token, peer, status);
            Err(ChannelError::MapFailed(status))
        }
    }
}

/// Tear down a mapping.
///
/// On failure the foreign page may still be installed, so the caller must
/// keep the mapping and its range until a later unmap succeeds.
pub fn unmap<A: CapabilityAuthority + ?Sized>(
    authority: &mut A,
    mapping: &Mapping,
) -> Result<(), ChannelError> {
    match authority.unmap(mapping.handle, mapping.addr) {
        Ok(()) => {
            debug!("[GNTTAB] unmapped handle {} at {}", mapping.handle, mapping.addr);
            Ok(())
        }
        Err(status) => {
            error!(
                "[GNTTAB] unmap of handle {} at {} failed: {}",
                mapping.handle, mapping.addr, status
            );
            Err(ChannelError::UnmapFailed(status))
        }
    }
}
