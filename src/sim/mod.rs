//! Simulated Capability Authority
//!
//! An in-memory machine that plays the hypervisor for any number of
//! domains: machine frames with real contents, one page table per domain,
//! a grant table and a mapping table.
//!
//! # Design
//! - [`Machine`] owns the shared state behind a spinlock
//! - [`Domain`] is one domain's view and implements [`crate::channel::Platform`]
//! - Faults can be injected per domain and operation
//! - Every revoke and unmap reaching the authority is counted
//!
//! # Enforced Rules
//! - A token maps only for the domain it was granted to
//! - Revoking a grant that is still mapped fails with `Busy`
//! - A frame freed while granted is taken out of circulation and counted
//!   as an unsafe free; it returns only once its last grant is revoked

mod domain;

pub use domain::Domain;

use alloc::boxed::Box;
use alloc::collections::{BTreeMap, BTreeSet};
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::error;
use spin::Mutex;

use crate::cap::{CapabilityToken, DomainId, GrantFlags, GrantStatus, MappingHandle};
use crate::mm::{FrameNumber, PageBitmap, VirtAddr, PAGE_SIZE};

/// Machine frames available by default.
pub const MACHINE_FRAMES: usize = 256;
/// First virtual address handed out in every domain.
pub const DOMAIN_VIRT_BASE: usize = 0x4000_0000;
/// Virtual pages available to every domain.
pub const DOMAIN_VIRT_PAGES: usize = 1024;
/// Tokens below this value are reserved for the authority.
const FIRST_DYNAMIC_TOKEN: u32 = 8;

/// Authority operations that can be counted and failed on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Allocate,
    Grant,
    Revoke,
    Map,
    Unmap,
}

#[derive(Debug)]
struct GrantEntry {
    frame: FrameNumber,
    peer: DomainId,
    flags: GrantFlags,
    map_count: usize,
}

#[derive(Debug)]
struct MappingEntry {
    domain: DomainId,
    granter: DomainId,
    token: CapabilityToken,
    addr: VirtAddr,
    /// Frame the mapping displaced; restored on unmap.
    local_frame: FrameNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pte {
    Local(FrameNumber),
    Foreign {
        frame: FrameNumber,
        handle: MappingHandle,
        read_only: bool,
    },
}

impl Pte {
    fn frame(self) -> FrameNumber {
        match self {
            Self::Local(frame) | Self::Foreign { frame, .. } => frame,
        }
    }
}

#[derive(Debug)]
struct Fault {
    op: Op,
    at_call: usize,
    status: GrantStatus,
}

#[derive(Debug)]
struct DomainState {
    vspace: PageBitmap,
    page_table: BTreeMap<usize, Pte>,
    next_token: u32,
    calls: BTreeMap<Op, usize>,
    faults: Vec<Fault>,
}

impl DomainState {
    fn new() -> Self {
        Self {
            vspace: PageBitmap::new(DOMAIN_VIRT_PAGES),
            page_table: BTreeMap::new(),
            next_token: FIRST_DYNAMIC_TOKEN,
            calls: BTreeMap::new(),
            faults: Vec::new(),
        }
    }

    /// Count a call to `op` and report an injected failure, if due.
    fn enter(&mut self, op: Op) -> Result<(), GrantStatus> {
        let count = self.calls.entry(op).or_insert(0);
        *count += 1;
        let now = *count;
        match self.faults.iter().position(|f| f.op == op && f.at_call == now) {
            Some(index) => Err(self.faults.remove(index).status),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct MachineState {
    frames: PageBitmap,
    memory: BTreeMap<FrameNumber, Box<[u8; PAGE_SIZE]>>,
    domains: BTreeMap<DomainId, DomainState>,
    grants: BTreeMap<(DomainId, CapabilityToken), GrantEntry>,
    mappings: BTreeMap<MappingHandle, MappingEntry>,
    next_handle: u32,
    revoke_calls: BTreeMap<(DomainId, CapabilityToken), usize>,
    unmap_calls: BTreeMap<MappingHandle, usize>,
    quarantined: BTreeSet<FrameNumber>,
    unsafe_frees: usize,
}

impl MachineState {
    fn new(frames: usize) -> Self {
        Self {
            frames: PageBitmap::new(frames),
            memory: BTreeMap::new(),
            domains: BTreeMap::new(),
            grants: BTreeMap::new(),
            mappings: BTreeMap::new(),
            next_handle: 1,
            revoke_calls: BTreeMap::new(),
            unmap_calls: BTreeMap::new(),
            quarantined: BTreeSet::new(),
            unsafe_frees: 0,
        }
    }

    fn domain(&mut self, id: DomainId) -> &mut DomainState {
        self.domains.entry(id).or_insert_with(DomainState::new)
    }

    fn alloc_frame(&mut self) -> Option<FrameNumber> {
        let frame = FrameNumber::new(self.frames.alloc_run(1)?);
        self.memory.insert(frame, Box::new([0; PAGE_SIZE]));
        Some(frame)
    }

    fn is_granted(&self, frame: FrameNumber) -> bool {
        self.grants.values().any(|grant| grant.frame == frame)
    }

    /// Return a frame to the pool unless a grant still names it.
    fn release_frame(&mut self, frame: FrameNumber) {
        if self.is_granted(frame) {
            error!("[SIM] {} freed while still granted", frame);
            self.unsafe_frees += 1;
            self.quarantined.insert(frame);
            return;
        }
        self.recycle(frame);
    }

    fn recycle(&mut self, frame: FrameNumber) {
        self.quarantined.remove(&frame);
        self.memory.remove(&frame);
        if self.frames.free_run(frame.as_usize(), 1).is_err() {
            error!("[SIM] double free of {}", frame);
        }
    }

    fn translate(&self, domain: DomainId, addr: VirtAddr) -> Option<Pte> {
        let vpn = addr.page_number();
        self.domains.get(&domain)?.page_table.get(&vpn).copied()
    }
}

/// A simulated machine shared by every domain created from it.
#[derive(Clone)]
pub struct Machine {
    state: Arc<Mutex<MachineState>>,
}

impl Machine {
    /// Create a machine with [`MACHINE_FRAMES`] frames.
    pub fn new() -> Self {
        Self::with_frames(MACHINE_FRAMES)
    }

    /// Create a machine with `frames` frames.
    pub fn with_frames(frames: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MachineState::new(frames))),
        }
    }

    /// View of the machine from domain `id`.
    pub fn domain(&self, id: DomainId) -> Domain {
        self.state.lock().domain(id);
        Domain::new(id, self.state.clone())
    }

    /// Grants issued by `domain` that are not revoked.
    pub fn live_grants(&self, domain: DomainId) -> usize {
        self.state.lock().grants.keys().filter(|(owner, _)| *owner == domain).count()
    }

    /// Mappings held by `domain` that are not unmapped.
    pub fn live_mappings(&self, domain: DomainId) -> usize {
        self.state.lock().mappings.values().filter(|m| m.domain == domain).count()
    }

    /// Check whether `domain` currently grants `token`.
    pub fn is_granted(&self, domain: DomainId, token: CapabilityToken) -> bool {
        self.state.lock().grants.contains_key(&(domain, token))
    }

    /// Frame behind a grant.
    pub fn granted_frame(&self, domain: DomainId, token: CapabilityToken) -> Option<FrameNumber> {
        self.state.lock().grants.get(&(domain, token)).map(|grant| grant.frame)
    }

    /// Frame `addr` currently resolves to in `domain`.
    pub fn frame_at(&self, domain: DomainId, addr: VirtAddr) -> Option<FrameNumber> {
        self.state.lock().translate(domain, addr).map(Pte::frame)
    }

    /// Revoke calls that reached the authority for one token.
    pub fn revoke_calls(&self, domain: DomainId, token: CapabilityToken) -> usize {
        self.state.lock().revoke_calls.get(&(domain, token)).copied().unwrap_or(0)
    }

    /// Unmap calls that reached the authority for one handle.
    pub fn unmap_calls(&self, handle: MappingHandle) -> usize {
        self.state.lock().unmap_calls.get(&handle).copied().unwrap_or(0)
    }

    /// Highest number of revoke calls seen for any single token.
    pub fn max_revoke_calls(&self) -> usize {
        self.state.lock().revoke_calls.values().copied().max().unwrap_or(0)
    }

    /// Highest number of unmap calls seen for any single handle.
    pub fn max_unmap_calls(&self) -> usize {
        self.state.lock().unmap_calls.values().copied().max().unwrap_or(0)
    }

    /// Frames freed while a grant still named them.
    pub fn unsafe_frees(&self) -> usize {
        self.state.lock().unsafe_frees
    }

    /// Frames available for allocation.
    pub fn free_frames(&self) -> usize {
        self.state.lock().frames.free_count()
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
