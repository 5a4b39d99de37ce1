//! Accessor Lifecycle
//!
//! The side that maps the grantor's pages.
//!
//! # Lifecycle
//! ```text
//! Uninitialized ──open──▶ ControlMapped ──▶ DataMapped ──close──▶ TornDown
//!                              ▲    │
//!                              └────┘ data-phase failure; open() retries it
//! ```
//!
//! `open()` maps the control page under the well-known token, copies the
//! manifest out of it, then maps every data page the manifest names at
//! `base + index * PAGE_SIZE`. A failed data mapping unmaps the pages
//! mapped so far, newest first; the control mapping and the copied manifest
//! stay so the caller can retry or `close()`.
//!
//! `close()` unmaps exactly the mappings that are live, data pages first,
//! then the control page, then frees the reserved ranges. A range is never
//! freed while a foreign page is still installed in it.

use alloc::vec::Vec;

use log::{debug, info, warn};

use super::manifest::{decode, ChannelManifest, MANIFEST_SIZE};
use super::teardown::{ReleaseStep, TeardownReport};
use super::Platform;
use crate::cap::{primitives, GrantStatus, MapFlags, Mapping};
use crate::config::ChannelConfig;
use crate::error::{ChannelError, ManifestError};
use crate::mm::{PageRegion, VirtAddr};

/// How far the accessor got through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessorState {
    Uninitialized,
    /// Control page mapped and manifest copied.
    ControlMapped,
    /// Every data page named by the manifest mapped.
    DataMapped,
    TornDown,
}

/// A reserved range plus the mappings still installed in it.
#[derive(Debug)]
struct MappedPages {
    area: PageRegion,
    /// Indexed by page; `None` once unmapped.
    mappings: Vec<Option<Mapping>>,
}

impl MappedPages {
    fn new(area: PageRegion) -> Self {
        let mappings = Vec::with_capacity(area.page_count());
        Self { area, mappings }
    }

    fn live(&self) -> usize {
        self.mappings.iter().flatten().count()
    }
}

/// Accessor end of one channel.
#[derive(Debug)]
pub struct Accessor {
    config: ChannelConfig,
    state: AccessorState,
    control: Option<MappedPages>,
    manifest: Option<ChannelManifest>,
    data: Option<MappedPages>,
}

impl Accessor {
    /// Create an unopened accessor.
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: AccessorState::Uninitialized,
            control: None,
            manifest: None,
            data: None,
        }
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> AccessorState {
        self.state
    }

    /// Configuration this accessor was built with.
    #[inline]
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Local copy of the grantor's manifest.
    pub fn manifest(&self) -> Option<&ChannelManifest> {
        self.manifest.as_ref()
    }

    /// Local address the control page is mapped at.
    pub fn control_page(&self) -> Option<VirtAddr> {
        match self.state {
            AccessorState::ControlMapped | AccessorState::DataMapped => {
                self.control.as_ref().map(|pages| pages.area.base())
            }
            _ => None,
        }
    }

    /// Range the data pages are mapped into.
    pub fn data_region(&self) -> Option<&PageRegion> {
        match self.state {
            AccessorState::DataMapped => self.data.as_ref().map(|pages| &pages.area),
            _ => None,
        }
    }

    /// Local address of mapped data page `index`.
    pub fn data_page(&self, index: usize) -> Option<VirtAddr> {
        let pages = self.data.as_ref().filter(|_| self.state == AccessorState::DataMapped)?;
        pages.mappings.get(index)?.as_ref().map(Mapping::addr)
    }

    /// Number of data pages currently mapped.
    pub fn mapped_pages(&self) -> usize {
        self.data.as_ref().map_or(0, MappedPages::live)
    }

    /// Check whether ranges are held back because a mapping in them could
    /// not be undone.
    pub fn is_retaining(&self) -> bool {
        match self.state {
            AccessorState::ControlMapped => self.data.is_some(),
            AccessorState::TornDown => self.control.is_some() || self.data.is_some(),
            _ => false,
        }
    }

    /// Map the control page, read the manifest and map every data page.
    ///
    /// From `ControlMapped` only the data phase runs again. A retaining
    /// accessor needs `close()` first.
    pub fn open<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Result<(), ChannelError> {
        if self.is_retaining() {
            return Err(ChannelError::InvalidState);
        }
        match self.state {
            AccessorState::Uninitialized | AccessorState::TornDown => {
                self.config.validate()?;
                self.map_control(platform)?;
            }
            AccessorState::ControlMapped => {}
            AccessorState::DataMapped => return Err(ChannelError::InvalidState),
        }
        self.map_data(platform)?;

        info!(
            "[ACCESSOR] channel from {} ready: {} data page(s)",
            self.config.peer_domain,
            self.mapped_pages()
        );
        Ok(())
    }

    fn map_control<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Result<(), ChannelError> {
        let peer = self.config.peer_domain;
        let token = self.config.control_token;

        let area = platform.allocate(1)?;
        let mapping = match primitives::map(platform, token, peer, area.base(), MapFlags::HOST_MAP) {
            Ok(mapping) => mapping,
            Err(err) => {
                platform.free(area);
                return Err(err);
            }
        };

        let mut bytes = [0u8; MANIFEST_SIZE];
        let manifest = platform
            .read(mapping.addr(), &mut bytes)
            .map_err(|_| ManifestError::Unreadable)
            .and_then(|()| decode(&bytes));
        let mut control = MappedPages::new(area);
        control.mappings.push(Some(mapping));
        self.control = Some(control);

        let manifest = match manifest {
            Ok(manifest) => manifest,
            Err(err) => {
                warn!("[ACCESSOR] rejecting control page from {}: {}", peer, err);
                let mut report = TeardownReport::new();
                if let Some(control) = self.control.as_mut() {
                    unmap_pages(platform, control, &mut report, |_| ReleaseStep::UnmapControl, false);
                }
                free_unmapped(platform, &mut self.control, &mut report, ReleaseStep::FreeControl);
                if !report.is_clean() {
                    warn!("[ACCESSOR] releasing control page incomplete: {}", report);
                    self.state = AccessorState::TornDown;
                }
                return Err(ChannelError::MalformedManifest(err));
            }
        };

        info!(
            "[ACCESSOR] control page token {} mapped: {} data page(s), {:?} layout",
            token,
            manifest.page_count(),
            manifest.layout()
        );
        self.manifest = Some(manifest);
        self.state = AccessorState::ControlMapped;
        Ok(())
    }

    fn map_data<P: Platform + ?Sized>(&mut self, platform: &mut P) -> Result<(), ChannelError> {
        let manifest = self.manifest.ok_or(ChannelError::InvalidState)?;
        let peer = self.config.peer_domain;
        let flags = if self.config.read_only {
            MapFlags::HOST_MAP | MapFlags::READ_ONLY
        } else {
            MapFlags::HOST_MAP
        };

        if manifest.page_count() == 0 {
            self.state = AccessorState::DataMapped;
            return Ok(());
        }

        let area = platform.allocate(manifest.page_count())?;
        let data = self.data.insert(MappedPages::new(area));
        let mut failure = None;
        for (index, &token) in manifest.tokens().iter().enumerate() {
            let result = match data.area.page(index) {
                Some(at) => primitives::map(platform, token, peer, at, flags),
                None => Err(ChannelError::AllocationFailed),
            };
            match result {
                Ok(mapping) => data.mappings.push(Some(mapping)),
                Err(err) => {
                    failure = Some((index, err));
                    break;
                }
            }
        }

        if let Some((index, err)) = failure {
            warn!(
                "[ACCESSOR] mapping data page {} failed, unmapping {} page(s)",
                index,
                data.live()
            );
            let mut report = TeardownReport::new();
            unmap_pages(platform, data, &mut report, ReleaseStep::UnmapData, true);
            free_unmapped(platform, &mut self.data, &mut report, ReleaseStep::FreeData);
            if !report.is_clean() {
                warn!("[ACCESSOR] rollback incomplete: {}", report);
            }
            return Err(err);
        }

        debug!("[ACCESSOR] data pages mapped at {}", data.area.base());
        self.state = AccessorState::DataMapped;
        Ok(())
    }

    /// Unmap every live mapping and free the reserved ranges, best effort.
    ///
    /// Safe to call in any state and more than once; a handle is never
    /// presented again once unmapped. A range whose mapping could not be
    /// undone is kept and reported, and a later `close()` retries it.
    pub fn close<P: Platform + ?Sized>(&mut self, platform: &mut P) -> TeardownReport {
        debug!("[ACCESSOR] closing from {:?}", self.state);
        let mut report = TeardownReport::new();

        if let Some(data) = self.data.as_mut() {
            unmap_pages(platform, data, &mut report, ReleaseStep::UnmapData, false);
        }
        if let Some(control) = self.control.as_mut() {
            unmap_pages(platform, control, &mut report, |_| ReleaseStep::UnmapControl, false);
        }
        free_unmapped(platform, &mut self.data, &mut report, ReleaseStep::FreeData);
        free_unmapped(platform, &mut self.control, &mut report, ReleaseStep::FreeControl);

        self.manifest = None;
        self.state = AccessorState::TornDown;
        if report.is_clean() {
            info!("[ACCESSOR] channel closed");
        } else {
            warn!("[ACCESSOR] channel closed with errors: {}", report);
        }
        report
    }
}

/// Unmap the live mappings of `pages`.
///
/// A mapping is dropped once unmapped, or once the authority no longer
/// knows its handle. On any other failure the foreign page may still be
/// installed, so the mapping stays for a later attempt.
fn unmap_pages<P: Platform + ?Sized>(
    platform: &mut P,
    pages: &mut MappedPages,
    report: &mut TeardownReport,
    step: fn(usize) -> ReleaseStep,
    reverse: bool,
) {
    let count = pages.mappings.len();
    for n in 0..count {
        let index = if reverse { count - 1 - n } else { n };
        let Some(mapping) = pages.mappings[index].as_ref() else {
            continue;
        };
        let result = primitives::unmap(platform, mapping);
        let released = matches!(
            result,
            Ok(()) | Err(ChannelError::UnmapFailed(GrantStatus::BadHandle))
        );
        report.record(step(index), result);
        if released {
            pages.mappings[index] = None;
        }
    }
}

/// Free the range in `slot` unless a foreign page is still mapped in it.
fn free_unmapped<P: Platform + ?Sized>(
    platform: &mut P,
    slot: &mut Option<MappedPages>,
    report: &mut TeardownReport,
    step: ReleaseStep,
) {
    let Some(pages) = slot.take() else {
        return;
    };
    if pages.live() == 0 {
        platform.free(pages.area);
    } else {
        warn!(
            "[ACCESSOR] keeping {} page(s) at {}: {} mapping(s) still installed",
            pages.area.page_count(),
            pages.area.base(),
            pages.live()
        );
        report.retain(step);
        *slot = Some(pages);
    }
}
