//! Control Page Manifest
//!
//! The grantor publishes the data-page layout on the control page; the
//! accessor reads it back before mapping anything else.
//!
//! # Wire Format (little-endian, no padding)
//! ```text
//! offset  size            field
//! 0       4               page_count
//! 4       4*MAX_DATA_PAGES tokens[page_count], unused slots zero
//! 36      4               layout_mode (1 = static page mapping)
//! ```
//! The structure is always [`MANIFEST_SIZE`] bytes. There is no version
//! field; extending the format means a new layout-mode tag.

use core::fmt;

use static_assertions::const_assert;

use crate::cap::CapabilityToken;
use crate::error::ManifestError;
use crate::mm::PAGE_SIZE;

/// Data-page capacity of one channel.
pub const MAX_DATA_PAGES: usize = 8;

/// Offset of the layout-mode tag.
const LAYOUT_OFFSET: usize = 4 + 4 * MAX_DATA_PAGES;

/// Encoded size of a manifest.
pub const MANIFEST_SIZE: usize = LAYOUT_OFFSET + 4;

const_assert!(MANIFEST_SIZE <= PAGE_SIZE);

/// How the data pages are laid out for the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum LayoutMode {
    /// Page `i` of the manifest is mapped at `base + i * PAGE_SIZE`.
    #[default]
    Static = 1,
}

impl LayoutMode {
    /// Decode a wire tag.
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Static),
            _ => None,
        }
    }

    /// Get the wire tag.
    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }
}

/// Ordered token sequence bounded by [`MAX_DATA_PAGES`].
#[derive(Clone, Copy, Default)]
pub struct TokenList {
    tokens: [CapabilityToken; MAX_DATA_PAGES],
    len: usize,
}

impl TokenList {
    /// Create an empty list.
    pub const fn new() -> Self {
        Self {
            tokens: [CapabilityToken::new(0); MAX_DATA_PAGES],
            len: 0,
        }
    }

    /// Append a token. Fails once the capacity is reached.
    pub fn push(&mut self, token: CapabilityToken) -> Result<(), ManifestError> {
        let slot = self.tokens.get_mut(self.len).ok_or(ManifestError::TooManyTokens)?;
        *slot = token;
        self.len += 1;
        Ok(())
    }

    /// Tokens in page order.
    #[inline]
    pub fn as_slice(&self) -> &[CapabilityToken] {
        &self.tokens[..self.len]
    }

    /// Number of tokens.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check for an empty list.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl TryFrom<&[CapabilityToken]> for TokenList {
    type Error = ManifestError;

    fn try_from(tokens: &[CapabilityToken]) -> Result<Self, Self::Error> {
        let mut list = Self::new();
        for &token in tokens {
            list.push(token)?;
        }
        Ok(list)
    }
}

impl PartialEq for TokenList {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for TokenList {}

impl fmt::Debug for TokenList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.as_slice()).finish()
    }
}

/// Self-describing payload of the control page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelManifest {
    tokens: TokenList,
    layout: LayoutMode,
}

impl ChannelManifest {
    /// Build a manifest from data-page tokens in page order.
    pub fn new(tokens: TokenList, layout: LayoutMode) -> Self {
        Self { tokens, layout }
    }

    /// Build a static-layout manifest from a token slice.
    pub fn from_tokens(tokens: &[CapabilityToken]) -> Result<Self, ManifestError> {
        Ok(Self::new(TokenList::try_from(tokens)?, LayoutMode::Static))
    }

    /// Number of data pages described.
    #[inline]
    pub fn page_count(&self) -> usize {
        self.tokens.len()
    }

    /// Data-page tokens in page order.
    #[inline]
    pub fn tokens(&self) -> &[CapabilityToken] {
        self.tokens.as_slice()
    }

    /// Layout of the data pages.
    #[inline]
    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> [u8; MANIFEST_SIZE] {
        let mut buf = [0u8; MANIFEST_SIZE];
        put_u32(&mut buf, 0, self.page_count() as u32);
        for (i, token) in self.tokens().iter().enumerate() {
            put_u32(&mut buf, 4 + 4 * i, token.get());
        }
        put_u32(&mut buf, LAYOUT_OFFSET, self.layout.raw());
        buf
    }
}

/// Write `manifest` at the start of `buf`.
///
/// Bytes past [`MANIFEST_SIZE`] are left untouched.
pub fn encode(manifest: &ChannelManifest, buf: &mut [u8]) -> Result<(), ManifestError> {
    let len = buf.len();
    let out = buf
        .get_mut(..MANIFEST_SIZE)
        .ok_or(ManifestError::Truncated { len })?;
    out.copy_from_slice(&manifest.to_bytes());
    Ok(())
}

/// Read a manifest from the start of `buf`.
///
/// The declared page count is checked against [`MAX_DATA_PAGES`] before it
/// bounds any token read.
pub fn decode(buf: &[u8]) -> Result<ChannelManifest, ManifestError> {
    if buf.len() < MANIFEST_SIZE {
        return Err(ManifestError::Truncated { len: buf.len() });
    }

    let declared = get_u32(buf, 0);
    let page_count = declared as usize;
    if page_count > MAX_DATA_PAGES {
        return Err(ManifestError::PageCountOutOfRange(declared));
    }

    let tag = get_u32(buf, LAYOUT_OFFSET);
    let layout = LayoutMode::from_raw(tag).ok_or(ManifestError::UnknownLayout(tag))?;

    let mut tokens = TokenList::new();
    for i in 0..page_count {
        tokens.push(CapabilityToken::new(get_u32(buf, 4 + 4 * i)))?;
    }

    Ok(ChannelManifest::new(tokens, layout))
}

#[inline]
fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get_u32(buf: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_le_bytes(raw)
}
