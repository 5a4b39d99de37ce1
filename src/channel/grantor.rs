//! Grantor Lifecycle
//!
//! The side that owns the shared pages.
//!
//! # Lifecycle
//! ```text
//! Uninitialized ──open──▶ ControlReady ──▶ DataReady ──close──▶ TornDown
//!       ▲                      │                                   │
//!       └──── rollback ◀───────┘         (reopen once nothing is retained)
//! ```
//!
//! `open()` allocates and grants the control page under the well-known
//! token, allocates and grants every data page, then publishes the manifest.
//! Any failure rolls back everything acquired so far, newest first.
//!
//! `close()` revokes the control grant, then each data grant, then frees
//! the control page and the data pages. A page whose grant could not be
//! revoked, because the peer still maps it or the authority refused, is not
//! freed: its region stays with the grantor, the report says so, and a
//! later `close()` retries only what is left.

use alloc::vec::Vec;

use log::{debug, info, warn};

use super::manifest::{ChannelManifest, LayoutMode, TokenList};
use super::teardown::{ReleaseStep, TeardownReport};
use super::Platform;
use crate::cap::{primitives, Grant, GrantFlags, GrantStatus};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::mm::{PageRegion, VirtAddr};

/// How far the grantor got through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantorState {
    Uninitialized,
    /// Control page allocated and granted.
    ControlReady,
    /// Data pages granted and the manifest published.
    DataReady,
    TornDown,
}

/// A region plus the grants still live on its pages.
#[derive(Debug)]
struct SharedPages {
    region: PageRegion,
    /// Indexed by page; `None` once revoked.
    grants: Vec<Option<Grant>>,
}

impl SharedPages {
    fn new(region: PageRegion) -> Self {
        let grants = Vec::with_capacity(region.page_count());
        Self { region, grants }
    }

    fn live(&self) -> usize {
        self.grants.iter().flatten().count()
    }
}

/// Grantor end of one channel.
#[derive(Debug)]
pub struct Grantor {
    config: ChannelConfig,
    state: GrantorState,
    control: Option<SharedPages>,
    data: Option<SharedPages>,
    manifest: Option<ChannelManifest>,
}

impl Grantor {
    /// Create an unopened grantor.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: GrantorState::Uninitialized,
            control: None,
            data: None,
            manifest: None,
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> GrantorState {
        self.state
    }

    /// Configuration this grantor was built with.
    #[inline]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Manifest published on the control page.
    pub fn manifest(&self) -> Option<&ChannelManifest> {
        self.manifest.as_ref()
    }

    /// Local address of the control page.
    pub fn control_page(&self) -> Option<VirtAddr> {
        self.control.as_ref().map(|pages| pages.region.base())
    }

    /// Local data pages, once published.
    pub fn data_region(&self) -> Option<&PageRegion> {
        match self.state {
            GrantorState::DataReady => self.data.as_ref().map(|pages| &pages.region),
            _ => None,
        }
    }

    /// Local address of data page `index`, once published.
    pub fn data_page(&self, index: usize) -> Option<VirtAddr> {
        self.data_region()?.page(index)
    }

    /// Check whether pages are held back because a grant on them is still live.
    pub fn is_retaining(&self) -> bool {
        self.state == GrantorState::TornDown && (self.control.is_some() || self.data.is_some())
    }

    /// Grant the control and data pages and publish the manifest.
    ///
    /// On error every resource acquired by this call has been released
    /// before returning, or retained if one of its grants could not be
    /// revoked. A retaining grantor needs `close()` before it can reopen.
    pub fn open<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Result<(), ChannelError> {
        match self.state {
            GrantorState::Uninitialized => {}
            GrantorState::TornDown if !self.is_retaining() => {}
            _ => return Err(ChannelError::InvalidState),
        }
        self.config.validate()?;

        if let Err(err) = self.establish(platform) {
            warn!("[GRANTOR] open failed ({}), rolling back", err);
            let report = self.rollback(platform);
            if !report.is_clean() {
                warn!("[GRANTOR] rollback incomplete: {}", report);
            }
            self.state = if self.is_retaining_pages() {
                GrantorState::TornDown
            } else {
                GrantorState::Uninitialized
            };
            return Err(err);
        }

        info!(
            "[GRANTOR] channel to {} ready: {} data page(s), control token {}",
            self.config.peer_domain, self.config.data_pages, self.config.control_token
        );
        Ok(())
    }

    fn establish<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Result<(), ChannelError> {
        let peer = self.config.peer_domain;

        let region = platform.allocate(1)?;
        let base = region.base();
        let control = self.control.insert(SharedPages::new(region));
        let grant = primitives::grant_as(
            platform,
            self.config.control_token,
            base,
            peer,
            GrantFlags::empty(),
        )?;
        control.grants.push(Some(grant));
        self.state = GrantorState::ControlReady;
        info!("[GRANTOR] control page {} granted as token {}", base, self.config.control_token);

        let flags = if self.config.read_only {
            GrantFlags::READ_ONLY
        } else {
            GrantFlags::empty()
        };
        let region = platform.allocate(self.config.data_pages)?;
        let data = self.data.insert(SharedPages::new(region));
        let mut tokens = TokenList::new();
        for index in 0..data.region.page_count() {
            let page = data.region.page(index).ok_or(ChannelError::AllocationFailed)?;
            let grant = primitives::grant(platform, page, peer, flags)?;
            let token = grant.token();
            data.grants.push(Some(grant));
            tokens.push(token)?;
        }
        debug!("[GRANTOR] data tokens {:?}", tokens);

        let manifest = ChannelManifest::new(tokens, LayoutMode::Static);
        info!("[GRANTOR] writing grants to control page");
        platform.write(base, &manifest.to_bytes())?;
        self.manifest = Some(manifest);
        self.state = GrantorState::DataReady;
        Ok(())
    }

    /// Revoke every grant and free every page, best effort.
    ///
    /// Safe to call in any state and more than once; a grant is never
    /// presented again once revoked, and each region is freed at most once.
    pub fn close<P: Platform + ?Sized>(&mut self, platform: &mut P) -> TeardownReport {
        debug!("[GRANTOR] closing from {:?}", self.state);
        let mut report = TeardownReport::new();

        if let Some(control) = self.control.as_mut() {
            revoke_pages(platform, control, &mut report, |_| ReleaseStep::RevokeControl, false);
        }
        if let Some(data) = self.data.as_mut() {
            revoke_pages(platform, data, &mut report, ReleaseStep::RevokeData, false);
        }
        free_released(platform, &mut self.control, &mut report, ReleaseStep::FreeControl);
        free_released(platform, &mut self.data, &mut report, ReleaseStep::FreeData);

        self.manifest = None;
        self.state = GrantorState::TornDown;
        if report.is_clean() {
            info!("[GRANTOR] channel closed");
        } else {
            warn!("[GRANTOR] channel closed with errors: {}", report);
        }
        report
    }

    /// Release in reverse order of acquisition.
    fn rollback<P: Platform + ?Sized>(&mut self, platform: &mut P) -> TeardownReport {
        let mut report = TeardownReport::new();
        if let Some(data) = self.data.as_mut() {
            revoke_pages(platform, data, &mut report, ReleaseStep::RevokeData, true);
        }
        free_released(platform, &mut self.data, &mut report, ReleaseStep::FreeData);
        if let Some(control) = self.control.as_mut() {
            revoke_pages(platform, control, &mut report, |_| ReleaseStep::RevokeControl, true);
        }
        free_released(platform, &mut self.control, &mut report, ReleaseStep::FreeControl);
        self.manifest = None;
        report
    }

    fn is_retaining_pages(&self) -> bool {
        self.control.is_some() || self.data.is_some()
    }
}

/// Revoke the live grants of `pages`.
///
/// A grant is dropped once revoked, or once the authority no longer knows
/// its token. On any other failure the authority may still honor it, so it
/// stays live for a later attempt and its page is never freed.
fn revoke_pages<P: Platform + ?Sized>(
    platform: &mut P,
    pages: &mut SharedPages,
    report: &mut TeardownReport,
    step: fn(usize) -> ReleaseStep,
    reverse: bool,
) {
    let count = pages.grants.len();
    for n in 0..count {
        let index = if reverse { count - 1 - n } else { n };
        let Some(grant) = pages.grants[index].as_ref() else {
            continue;
        };
        let result = primitives::revoke(platform, grant);
        let released = matches!(
            result,
            Ok(()) | Err(ChannelError::RevokeFailed(GrantStatus::BadToken))
        );
        report.record(step(index), result);
        if released {
            pages.grants[index] = None;
        }
    }
}

/// Free the region in `slot` unless one of its pages is still granted.
fn free_released<P: Platform + ?Sized>(
    platform: &mut P,
    slot: &mut Option<SharedPages>,
    report: &mut TeardownReport,
    step: ReleaseStep,
) {
    let Some(pages) = slot.take() else {
        return;
    };
    if pages.live() == 0 {
        platform.free(pages.region);
    } else {
        warn!(
            "[GRANTOR] keeping {} page(s) at {}: {} grant(s) still in use",
            pages.region.page_count(),
            pages.region.base(),
            pages.live()
        );
        report.retain(step);
        *slot = Some(pages);
    }
}
