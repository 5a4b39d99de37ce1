//! Property tests for the manifest codec and for channel teardown under
//! injected authority faults.
//!
//! - Any manifest within capacity survives a trip through a control page
//! - Decoding arbitrary bytes never panics and never yields more than
//!   `MAX_DATA_PAGES` tokens
//! - A single fault anywhere in `open()` leaves nothing granted, mapped or
//!   allocated once both sides close
//! - Repeated `close()` never presents a token or handle again once it is
//!   released, retries only the one whose release failed, and never frees
//!   a page that is still granted or mapped

use alloc::vec::Vec;

use proptest::prelude::*;

use super::manifest::{decode, encode, MANIFEST_SIZE, MAX_DATA_PAGES};
use super::{Accessor, ChannelManifest, Grantor};
use crate::cap::{CapabilityToken, DomainId, GrantStatus};
use crate::config::ChannelConfig;
use crate::error::ManifestError;
use crate::mm::PAGE_SIZE;
use crate::sim::{Machine, Op};

const GRANTOR: DomainId = DomainId::new(9);
const ACCESSOR: DomainId = DomainId::new(8);

fn arb_tokens() -> impl Strategy<Value = Vec<CapabilityToken>> {
    prop::collection::vec(any::<u32>().prop_map(CapabilityToken::new), 0..=MAX_DATA_PAGES)
}

fn arb_status() -> impl Strategy<Value = GrantStatus> {
    prop_oneof![
        Just(GrantStatus::GeneralError),
        Just(GrantStatus::NoSpace),
        Just(GrantStatus::PermissionDenied),
        Just(GrantStatus::BadPage),
    ]
}

fn arb_open_op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Allocate), Just(Op::Grant), Just(Op::Map)]
}

proptest! {
    #[test]
    fn manifest_roundtrip(tokens in arb_tokens(), fill in any::<u8>()) {
        let manifest = ChannelManifest::from_tokens(&tokens).unwrap();
        let mut page = [fill; PAGE_SIZE];
        encode(&manifest, &mut page).unwrap();
        let decoded = decode(&page).unwrap();
        prop_assert_eq!(decoded.tokens(), tokens.as_slice());
        prop_assert_eq!(decoded, manifest);
    }

    #[test]
    fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2 * MANIFEST_SIZE)) {
        match decode(&bytes) {
            Ok(manifest) => prop_assert!(manifest.page_count() <= MAX_DATA_PAGES),
            Err(ManifestError::Truncated { len }) => prop_assert!(len < MANIFEST_SIZE),
            Err(_) => {}
        }
    }

    #[test]
    fn oversized_page_count_rejected(count in (MAX_DATA_PAGES as u32 + 1).., fill in any::<u8>()) {
        let mut buf = [fill; MANIFEST_SIZE];
        buf[..4].copy_from_slice(&count.to_le_bytes());
        prop_assert_eq!(decode(&buf), Err(ManifestError::PageCountOutOfRange(count)));
    }

    #[test]
    fn open_fault_leaves_nothing_behind(
        pages in 1..=MAX_DATA_PAGES,
        on_grantor in any::<bool>(),
        op in arb_open_op(),
        nth in 1usize..=12,
        status in arb_status(),
    ) {
        let machine = Machine::new();
        let mut front = machine.domain(GRANTOR);
        let mut back = machine.domain(ACCESSOR);
        let initial = machine.free_frames();
        if on_grantor {
            front.fail_nth(op, nth, status);
        } else {
            back.fail_nth(op, nth, status);
        }

        let config = ChannelConfig { data_pages: pages, ..ChannelConfig::grantor() };
        let mut grantor = Grantor::new(config);
        let mut accessor = Accessor::new(ChannelConfig::accessor());
        let _ = grantor.open(&mut front);
        let _ = accessor.open(&mut back);

        prop_assert!(accessor.close(&mut back).is_clean());
        prop_assert!(grantor.close(&mut front).is_clean());
        prop_assert_eq!(machine.live_grants(GRANTOR), 0);
        prop_assert_eq!(machine.live_mappings(ACCESSOR), 0);
        prop_assert_eq!(machine.free_frames(), initial);
        prop_assert_eq!(machine.unsafe_frees(), 0);
        prop_assert!(machine.max_revoke_calls() <= 1);
        prop_assert!(machine.max_unmap_calls() <= 1);
    }

    #[test]
    fn repeated_close_releases_once(
        revoke_fault in any::<bool>(),
        nth in 1usize..=MAX_DATA_PAGES + 1,
        status in arb_status(),
    ) {
        let machine = Machine::new();
        let mut front = machine.domain(GRANTOR);
        let mut back = machine.domain(ACCESSOR);
        let initial = machine.free_frames();
        let mut grantor = Grantor::new(ChannelConfig::grantor());
        let mut accessor = Accessor::new(ChannelConfig::accessor());
        grantor.open(&mut front).unwrap();
        accessor.open(&mut back).unwrap();
        if revoke_fault {
            front.fail_nth(Op::Revoke, nth, status);
        } else {
            back.fail_nth(Op::Unmap, nth, status);
        }

        accessor.close(&mut back);
        grantor.close(&mut front);
        prop_assert_eq!(machine.unsafe_frees(), 0);
        prop_assert!(grantor.is_retaining());
        prop_assert_eq!(accessor.is_retaining(), !revoke_fault);

        prop_assert!(accessor.close(&mut back).is_clean());
        prop_assert!(grantor.close(&mut front).is_clean());
        prop_assert!(accessor.close(&mut back).is_clean());
        prop_assert!(grantor.close(&mut front).is_clean());

        let retried = MAX_DATA_PAGES + 2;
        let (revokes, unmaps) = if revoke_fault {
            (retried, MAX_DATA_PAGES + 1)
        } else {
            (MAX_DATA_PAGES + 1, retried)
        };
        prop_assert_eq!(front.calls(Op::Revoke), revokes);
        prop_assert_eq!(back.calls(Op::Unmap), unmaps);
        prop_assert_eq!(machine.max_revoke_calls(), if revoke_fault { 2 } else { 1 });
        prop_assert_eq!(machine.max_unmap_calls(), if revoke_fault { 1 } else { 2 });
        prop_assert_eq!(machine.live_grants(GRANTOR), 0);
        prop_assert_eq!(machine.live_mappings(ACCESSOR), 0);
        prop_assert_eq!(machine.free_frames(), initial);
        prop_assert_eq!(machine.unsafe_frees(), 0);
    }
}
