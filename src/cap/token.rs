//! Capability Tokens, Handles and Status Codes
//!
//! The values that cross the authority boundary.
//!
//! # Ownership
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  CapabilityToken  - owned by the granting domain until   │
//! │                     revoked; referenced by the peer      │
//! │  MappingHandle    - owned by the mapping domain until    │
//! │                     unmapped; meaningless elsewhere      │
//! └──────────────────────────────────────────────────────────┘
//! ```

use bitflags::bitflags;
use core::fmt;

/// Identifier of an isolated execution context (a guest domain).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct DomainId(u16);

impl DomainId {
    /// Create a domain identifier.
    #[inline]
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    /// Get the raw identifier.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dom{}", self.0)
    }
}

/// An authority-issued right for a peer domain to access one page.
///
/// Unique per (granting domain, page) for the lifetime of the grant and
/// encoded on the control page as a little-endian `u32`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default)]
#[repr(transparent)]
pub struct CapabilityToken(u32);

impl CapabilityToken {
    /// Create a token from its wire value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the wire value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for CapabilityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Local reference to a successfully mapped grant, required to unmap it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct MappingHandle(u32);

impl MappingHandle {
    /// Create a handle from the authority's raw value.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw value.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for MappingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status codes reported by the capability authority.
///
/// Numeric values follow the hypervisor's grant-table status codes.
/// Anything other than `Okay` is a hard error to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum GrantStatus {
    Okay = 0,
    GeneralError = -1,
    BadDomain = -2,
    BadToken = -3,
    BadHandle = -4,
    BadVirtAddr = -5,
    NoSpace = -7,
    PermissionDenied = -8,
    BadPage = -9,
    Busy = -12,
}

impl GrantStatus {
    /// Decode a raw status code. Unknown codes become `GeneralError`.
    pub const fn from_code(code: i16) -> Self {
        match code {
            0 => Self::Okay,
            -2 => Self::BadDomain,
            -3 => Self::BadToken,
            -4 => Self::BadHandle,
            -5 => Self::BadVirtAddr,
            -7 => Self::NoSpace,
            -8 => Self::PermissionDenied,
            -9 => Self::BadPage,
            -12 => Self::Busy,
            _ => Self::GeneralError,
        }
    }

    /// Get the raw status code.
    #[inline]
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Check for the success code.
    #[inline]
    pub const fn is_okay(self) -> bool {
        matches!(self, Self::Okay)
    }
}

impl fmt::Display for GrantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Okay => "okay",
            Self::GeneralError => "general error",
            Self::BadDomain => "bad domain",
            Self::BadToken => "bad token",
            Self::BadHandle => "bad handle",
            Self::BadVirtAddr => "bad virtual address",
            Self::NoSpace => "no space",
            Self::PermissionDenied => "permission denied",
            Self::BadPage => "bad page",
            Self::Busy => "busy",
        };
        write!(f, "{} (err_code {})", name, self.code())
    }
}

bitflags! {
    /// Restrictions attached to a grant.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct GrantFlags: u32 {
        /// Peer may only map the page read-only.
        const READ_ONLY = 1 << 2;
    }
}

bitflags! {
    /// How a peer grant is mapped locally.
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct MapFlags: u32 {
        /// Map at a host virtual address.
        const HOST_MAP = 1 << 1;
        /// Map read-only.
        const READ_ONLY = 1 << 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in [
            GrantStatus::Okay,
            GrantStatus::BadDomain,
            GrantStatus::BadToken,
            GrantStatus::BadVirtAddr,
            GrantStatus::PermissionDenied,
            GrantStatus::Busy,
        ] {
            assert_eq!(GrantStatus::from_code(status.code()), status);
        }
        assert_eq!(GrantStatus::from_code(-99), GrantStatus::GeneralError);
        assert!(GrantStatus::Okay.is_okay());
        assert!(!GrantStatus::Busy.is_okay());
    }
}
