//! One domain's view of the simulated machine.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use log::{debug, error};
use spin::Mutex;

use super::{
    Fault, GrantEntry, MachineState, MappingEntry, Op, Pte, DOMAIN_VIRT_BASE, FIRST_DYNAMIC_TOKEN,
};
use crate::cap::{
    CapabilityAuthority, CapabilityToken, DomainId, GrantFlags, GrantStatus, MapFlags,
    MappingHandle,
};
use crate::error::{ChannelError, MemoryFault};
use crate::mm::{FrameNumber, PageAllocator, PageMemory, PageRegion, VirtAddr, PAGE_SIZE};

const FIRST_VPN: usize = DOMAIN_VIRT_BASE / PAGE_SIZE;

/// Handle on the machine acting as domain `id`.
///
/// Clones share the same domain.
#[derive(Clone)]
pub struct Domain {
    id: DomainId,
    state: Arc<Mutex<MachineState>>,
}

impl Domain {
    pub(super) fn new(id: DomainId, state: Arc<Mutex<MachineState>>) -> Self {
        Self { id, state }
    }

    /// Domain this view acts as.
    #[inline]
    pub fn id(&self) -> DomainId {
        self.id
    }

    /// Make the `nth` call to `op` from now on fail with `status`.
    ///
    /// `nth` counts from 1. Allocation failures ignore `status`.
    pub fn fail_nth(&self, op: Op, nth: usize, status: GrantStatus) {
        let mut state = self.state.lock();
        let domain = state.domain(self.id);
        let at_call = domain.calls.get(&op).copied().unwrap_or(0) + nth;
        domain.faults.push(Fault { op, at_call, status });
    }

    /// Calls to `op` made by this domain so far.
    pub fn calls(&self, op: Op) -> usize {
        let mut state = self.state.lock();
        state.domain(self.id).calls.get(&op).copied().unwrap_or(0)
    }

    /// Frame behind a local page this domain may grant.
    fn grantable(&self, state: &MachineState, page: VirtAddr, peer: DomainId) -> Result<FrameNumber, GrantStatus> {
        if peer == self.id {
            return Err(GrantStatus::BadDomain);
        }
        if !page.is_aligned() {
            return Err(GrantStatus::BadVirtAddr);
        }
        match state.translate(self.id, page) {
            Some(Pte::Local(frame)) => Ok(frame),
            _ => Err(GrantStatus::BadVirtAddr),
        }
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain").field("id", &self.id).finish_non_exhaustive()
    }
}

impl CapabilityAuthority for Domain {
    fn grant(&mut self, page: VirtAddr, peer: DomainId, flags: GrantFlags) -> Result<CapabilityToken, GrantStatus> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.domain(self.id).enter(Op::Grant)?;
        let frame = self.grantable(state, page, peer)?;

        let mut raw = state.domain(self.id).next_token;
        while state.grants.contains_key(&(self.id, CapabilityToken::new(raw))) {
            raw = raw.checked_add(1).unwrap_or(FIRST_DYNAMIC_TOKEN);
        }
        state.domain(self.id).next_token = raw.checked_add(1).unwrap_or(FIRST_DYNAMIC_TOKEN);

        let token = CapabilityToken::new(raw);
        state.grants.insert((self.id, token), GrantEntry { frame, peer, flags, map_count: 0 });
        Ok(token)
    }

    fn grant_with_token(
        &mut self,
        token: CapabilityToken,
        page: VirtAddr,
        peer: DomainId,
        flags: GrantFlags,
    ) -> Result<(), GrantStatus> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.domain(self.id).enter(Op::Grant)?;
        let frame = self.grantable(state, page, peer)?;
        if state.grants.contains_key(&(self.id, token)) {
            return Err(GrantStatus::Busy);
        }
        state.grants.insert((self.id, token), GrantEntry { frame, peer, flags, map_count: 0 });
        Ok(())
    }

    fn query_access(&self, token: CapabilityToken) -> bool {
        self.state
            .lock()
            .grants
            .get(&(self.id, token))
            .is_some_and(|grant| grant.map_count > 0)
    }

    fn revoke(&mut self, token: CapabilityToken) -> Result<(), GrantStatus> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        *state.revoke_calls.entry((self.id, token)).or_insert(0) += 1;
        state.domain(self.id).enter(Op::Revoke)?;

        match state.grants.get(&(self.id, token)) {
            None => return Err(GrantStatus::BadToken),
            Some(grant) if grant.map_count > 0 => return Err(GrantStatus::Busy),
            Some(_) => {}
        }
        let Some(grant) = state.grants.remove(&(self.id, token)) else {
            return Err(GrantStatus::BadToken);
        };
        if state.quarantined.contains(&grant.frame) && !state.is_granted(grant.frame) {
            debug!("[SIM] {} back in circulation", grant.frame);
            state.recycle(grant.frame);
        }
        Ok(())
    }

    fn map(
        &mut self,
        token: CapabilityToken,
        peer: DomainId,
        at: VirtAddr,
        flags: MapFlags,
    ) -> Result<MappingHandle, GrantStatus> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.domain(self.id).enter(Op::Map)?;

        let (grantee, grant_flags, frame) = match state.grants.get(&(peer, token)) {
            Some(grant) => (grant.peer, grant.flags, grant.frame),
            None => return Err(GrantStatus::BadToken),
        };
        if grantee != self.id {
            return Err(GrantStatus::PermissionDenied);
        }
        let read_only = flags.contains(MapFlags::READ_ONLY);
        if grant_flags.contains(GrantFlags::READ_ONLY) && !read_only {
            return Err(GrantStatus::PermissionDenied);
        }
        if !at.is_aligned() {
            return Err(GrantStatus::BadVirtAddr);
        }
        let local_frame = match state.translate(self.id, at) {
            Some(Pte::Local(local)) => local,
            _ => return Err(GrantStatus::BadVirtAddr),
        };

        let handle = MappingHandle::new(state.next_handle);
        state.next_handle += 1;
        state
            .domain(self.id)
            .page_table
            .insert(at.page_number(), Pte::Foreign { frame, handle, read_only });
        state.mappings.insert(
            handle,
            MappingEntry { domain: self.id, granter: peer, token, addr: at, local_frame },
        );
        if let Some(grant) = state.grants.get_mut(&(peer, token)) {
            grant.map_count += 1;
        }
        Ok(handle)
    }

    fn unmap(&mut self, handle: MappingHandle, at: VirtAddr) -> Result<(), GrantStatus> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        *state.unmap_calls.entry(handle).or_insert(0) += 1;
        state.domain(self.id).enter(Op::Unmap)?;

        match state.mappings.get(&handle) {
            Some(mapping) if mapping.domain != self.id => return Err(GrantStatus::BadHandle),
            Some(mapping) if mapping.addr != at => return Err(GrantStatus::BadVirtAddr),
            Some(_) => {}
            None => return Err(GrantStatus::BadHandle),
        }
        let Some(mapping) = state.mappings.remove(&handle) else {
            return Err(GrantStatus::BadHandle);
        };

        let still_mapped = matches!(
            state.translate(self.id, at),
            Some(Pte::Foreign { handle: live, .. }) if live == handle
        );
        if still_mapped {
            state
                .domain(self.id)
                .page_table
                .insert(at.page_number(), Pte::Local(mapping.local_frame));
        } else {
            // The range was freed under the mapping; its frame can go now.
            state.release_frame(mapping.local_frame);
        }
        if let Some(grant) = state.grants.get_mut(&(mapping.granter, mapping.token)) {
            grant.map_count = grant.map_count.saturating_sub(1);
        }
        Ok(())
    }
}

impl PageAllocator for Domain {
    fn allocate(&mut self, page_count: usize) -> Result<PageRegion, ChannelError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.domain(self.id).enter(Op::Allocate).is_err() || page_count == 0 {
            return Err(ChannelError::AllocationFailed);
        }
        let start = state
            .domain(self.id)
            .vspace
            .alloc_run(page_count)
            .ok_or(ChannelError::AllocationFailed)?;

        let mut frames = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            match state.alloc_frame() {
                Some(frame) => frames.push(frame),
                None => {
                    for frame in frames {
                        state.recycle(frame);
                    }
                    let _ = state.domain(self.id).vspace.free_run(start, page_count);
                    return Err(ChannelError::AllocationFailed);
                }
            }
        }

        let first = FIRST_VPN + start;
        let domain = state.domain(self.id);
        for (i, frame) in frames.into_iter().enumerate() {
            domain.page_table.insert(first + i, Pte::Local(frame));
        }
        let region = PageRegion::new(VirtAddr::from_page_number(first), page_count);
        debug!("[SIM] {} allocated {} page(s) at {}", self.id, page_count, region.base());
        Ok(region)
    }

    fn free(&mut self, region: PageRegion) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let first = region.base().page_number();
        let Some(start) = first.checked_sub(FIRST_VPN).filter(|_| region.base().is_aligned()) else {
            error!("[SIM] {} freeing foreign range at {}", self.id, region.base());
            return;
        };

        for vpn in first..first + region.page_count() {
            match state.domain(self.id).page_table.remove(&vpn) {
                Some(Pte::Local(frame)) => state.release_frame(frame),
                Some(Pte::Foreign { handle, .. }) => {
                    error!("[SIM] {} freeing page still mapping {}", self.id, handle);
                    state.unsafe_frees += 1;
                    if let Some(mapping) = state.mappings.get(&handle) {
                        let local = mapping.local_frame;
                        state.quarantined.insert(local);
                    }
                }
                None => error!("[SIM] {} freeing unallocated page {:#x}", self.id, vpn),
            }
        }
        if state.domain(self.id).vspace.free_run(start, region.page_count()).is_err() {
            error!("[SIM] {} double free at {}", self.id, region.base());
        }
    }
}

impl PageMemory for Domain {
    fn read(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), MemoryFault> {
        let state = self.state.lock();
        let mut done = 0;
        while done < buf.len() {
            let at = addr.checked_add(done).ok_or(MemoryFault { addr })?;
            let offset = at.page_offset();
            let n = (PAGE_SIZE - offset).min(buf.len() - done);
            let frame = state.translate(self.id, at).ok_or(MemoryFault { addr: at })?.frame();
            let page = state.memory.get(&frame).ok_or(MemoryFault { addr: at })?;
            buf[done..done + n].copy_from_slice(&page[offset..offset + n]);
            done += n;
        }
        Ok(())
    }

    fn write(&mut self, addr: VirtAddr, bytes: &[u8]) -> Result<(), MemoryFault> {
        let mut state = self.state.lock();
        let mut done = 0;
        while done < bytes.len() {
            let at = addr.checked_add(done).ok_or(MemoryFault { addr })?;
            let offset = at.page_offset();
            let n = (PAGE_SIZE - offset).min(bytes.len() - done);
            let frame = match state.translate(self.id, at) {
                Some(Pte::Foreign { read_only: true, .. }) | None => {
                    return Err(MemoryFault { addr: at });
                }
                Some(pte) => pte.frame(),
            };
            let page = state.memory.get_mut(&frame).ok_or(MemoryFault { addr: at })?;
            page[offset..offset + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
        }
        Ok(())
    }
}
