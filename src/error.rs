//! Channel Error Types
//!
//! Every primitive failure is surfaced as a [`ChannelError`]; nothing on the
//! open/close paths panics on a recoverable condition.

use core::fmt;

use crate::cap::{CapabilityToken, GrantStatus};
use crate::config::ConfigError;
use crate::mm::VirtAddr;

/// Error type for channel establishment and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelError {
    /// No pages (or no virtual range) available. Retrying later may succeed.
    AllocationFailed,
    /// The authority refused to grant a page.
    GrantFailed(GrantStatus),
    /// The authority refused to end a grant for a reason other than a live
    /// peer mapping.
    RevokeFailed(GrantStatus),
    /// The authority refused to map a peer's grant.
    MapFailed(GrantStatus),
    /// The authority refused to tear down a mapping.
    UnmapFailed(GrantStatus),
    /// Revoke attempted while the peer still maps the page.
    PeerStillMapped(CapabilityToken),
    /// Control page content is unusable.
    MalformedManifest(ManifestError),
    /// A page access hit memory that is not mapped locally.
    MemoryFault(VirtAddr),
    /// Operation not allowed in the current lifecycle state.
    InvalidState,
    /// The channel configuration is unusable.
    InvalidConfig(ConfigError),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed => write!(f, "could not get free page(s)"),
            Self::GrantFailed(status) => write!(f, "grant failed ({})", status),
            Self::RevokeFailed(status) => write!(f, "revoke failed ({})", status),
            Self::MapFailed(status) => write!(f, "map grant failed ({})", status),
            Self::UnmapFailed(status) => write!(f, "unmap grant failed ({})", status),
            Self::PeerStillMapped(token) => {
                write!(f, "remote domain still using grant {}", token)
            }
            Self::MalformedManifest(err) => write!(f, "malformed manifest: {}", err),
            Self::MemoryFault(addr) => write!(f, "memory fault at {}", addr),
            Self::InvalidState => write!(f, "operation invalid in current state"),
            Self::InvalidConfig(err) => write!(f, "invalid configuration: {}", err),
        }
    }
}

impl From<ManifestError> for ChannelError {
    fn from(err: ManifestError) -> Self {
        Self::MalformedManifest(err)
    }
}

impl From<ConfigError> for ChannelError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig(err)
    }
}

impl From<MemoryFault> for ChannelError {
    fn from(fault: MemoryFault) -> Self {
        Self::MemoryFault(fault.addr)
    }
}

/// Reasons a control page cannot be decoded (or encoded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestError {
    /// The buffer is shorter than the fixed manifest size.
    Truncated { len: usize },
    /// Declared page count exceeds the data-page capacity.
    PageCountOutOfRange(u32),
    /// Unknown layout-mode tag.
    UnknownLayout(u32),
    /// More tokens than the data-page capacity.
    TooManyTokens,
    /// The control page could not be read.
    Unreadable,
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { len } => write!(f, "control page truncated ({} bytes)", len),
            Self::PageCountOutOfRange(count) => write!(f, "page count {} out of range", count),
            Self::UnknownLayout(tag) => write!(f, "unknown layout mode {}", tag),
            Self::TooManyTokens => write!(f, "too many tokens"),
            Self::Unreadable => write!(f, "control page unreadable"),
        }
    }
}

/// A page access outside the locally mapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFault {
    /// First faulting address.
    pub addr: VirtAddr,
}

impl fmt::Display for MemoryFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fault at {}", self.addr)
    }
}
