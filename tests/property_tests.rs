//! Property-based tests for NAT1 Traversal
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// STUN Codec Properties
// ============================================================================

mod codec_properties {
    use super::*;
    use nat1_stun::message::{HEADER_SIZE, xor_mask};
    use nat1_stun::{StunAttribute, StunMessage, TransactionId};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn socket_addr() -> impl Strategy<Value = SocketAddrV4> {
        (any::<u32>(), any::<u16>()).prop_map(|(ip, port)| SocketAddrV4::new(Ipv4Addr::from(ip), port))
    }

    proptest! {
        /// Encoded messages decode to the same type, transaction and attributes
        #[test]
        fn message_roundtrip(
            msg_type in any::<u16>(),
            id in any::<[u8; 16]>(),
            attrs in prop::collection::vec((any::<u16>(), prop::collection::vec(any::<u8>(), 0..40)), 0..6),
        ) {
            let mut message = StunMessage::new(msg_type, TransactionId::from_bytes(id));
            for (attr_type, value) in attrs {
                message.add_attribute(StunAttribute::new(attr_type, value));
            }

            let encoded = message.encode();
            prop_assert_eq!(encoded.len() % 4, 0);
            let decoded = StunMessage::decode(&encoded).unwrap();
            prop_assert_eq!(decoded, message);
        }

        /// XOR masking is its own inverse
        #[test]
        fn xor_mask_involution(addr in socket_addr()) {
            prop_assert_eq!(xor_mask(xor_mask(addr)), addr);
        }

        /// XOR-MAPPED-ADDRESS and MAPPED-ADDRESS carry the same address
        #[test]
        fn mapped_address_attributes_agree(addr in socket_addr(), xor in any::<bool>()) {
            let mut message = StunMessage::binding_response(TransactionId::random());
            if xor {
                message.add_attribute(StunAttribute::xor_mapped_address(addr));
            } else {
                message.add_attribute(StunAttribute::mapped_address(addr));
            }
            let decoded = StunMessage::decode(&message.encode()).unwrap();
            prop_assert_eq!(decoded.mapped_address().unwrap(), Some(addr));
        }

        /// Anything shorter than a header is rejected
        #[test]
        fn decode_rejects_short_input(bytes in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)) {
            prop_assert!(StunMessage::decode(&bytes).is_err());
        }

        /// Trailing bytes beyond the declared length are rejected
        #[test]
        fn decode_rejects_overlong_input(
            addr in socket_addr(),
            extra in prop::collection::vec(any::<u8>(), 1..32),
        ) {
            let mut message = StunMessage::binding_response(TransactionId::random());
            message.add_attribute(StunAttribute::xor_mapped_address(addr));
            let mut bytes = message.encode();
            bytes.extend_from_slice(&extra);
            prop_assert!(StunMessage::decode(&bytes).is_err());
        }

        /// Arbitrary input never panics the decoder or the address accessors
        #[test]
        fn decode_arbitrary_input(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            if let Ok(message) = StunMessage::decode(&bytes) {
                let _ = message.mapped_address();
                let _ = message.other_address();
            }
        }
    }
}

// ============================================================================
// Classifier Properties
// ============================================================================

mod classifier_properties {
    use super::*;
    use nat1_integration_tests::ScriptedProber;
    use nat1_stun::nat::ports_preserved;
    use nat1_stun::{NatType, classify};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn block_on<F: std::future::Future>(future: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(future)
    }

    /// Decision tree restated over the script
    fn expected(script: &ScriptedProber) -> NatType {
        let first = script.first;
        let Some(mapped) = first.mapped_addr else {
            return NatType::Unsupported;
        };
        if first.source_addr == mapped {
            return NatType::OpenInternet;
        }
        if script.secondary.is_none() {
            return NatType::Unsupported;
        }
        if script.second_mapped != Some(mapped) {
            return NatType::Symmetric;
        }
        if script.inbound {
            if mapped.port() != first.source_addr.port() {
                return NatType::FullCone;
            }
            let ports: Vec<_> = (0..3).map(|i| script.fresh[i % script.fresh.len()]).collect();
            return if ports_preserved(&ports) {
                NatType::OpenInternet
            } else {
                NatType::FullCone
            };
        }
        if script.inbound_after_warmup {
            NatType::RestrictedCone
        } else {
            NatType::PortRestrictedCone
        }
    }

    prop_compose! {
        fn script()(
            source_port in 1024u16..1100,
            mapped_port in prop::option::of(1024u16..1100),
            same_ip in any::<bool>(),
            secondary in any::<bool>(),
            second_same in any::<bool>(),
            inbound in any::<bool>(),
            inbound_after_warmup in any::<bool>(),
            fresh in prop::collection::vec((1024u16..1030, prop::option::of(1024u16..1030)), 1..4),
        ) -> ScriptedProber {
            let source = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), source_port);
            let public_ip = if same_ip { *source.ip() } else { Ipv4Addr::new(203, 0, 113, 1) };
            let mapped = mapped_port.map(|port| SocketAddrV4::new(public_ip, port));

            let mut script = ScriptedProber::new(source, mapped);
            script.secondary = secondary.then(|| SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 2), 3478));
            script.second_mapped = if second_same {
                mapped
            } else {
                mapped.map(|m| SocketAddrV4::new(*m.ip(), m.port().wrapping_add(1)))
            };
            script.inbound = inbound;
            script.inbound_after_warmup = inbound_after_warmup;
            script.fresh = fresh;
            script
        }
    }

    proptest! {
        /// The classifier follows the decision tree for every script
        #[test]
        fn classify_matches_decision_tree(script in script()) {
            let want = expected(&script);
            let mut prober = script.clone();
            let classification = block_on(classify(&mut prober));

            prop_assert_eq!(classification.nat_type, want);
            prop_assert_eq!(classification.mapped_addr.is_some(), script.first.mapped_addr.is_some());
            prop_assert!(prober.fresh_calls() == 0 || prober.fresh_calls() == 3);
        }

        /// Same observations, same verdict
        #[test]
        fn classify_is_deterministic(script in script()) {
            let first = block_on(classify(&mut script.clone()));
            let second = block_on(classify(&mut script.clone()));
            prop_assert_eq!(first.nat_type, second.nat_type);
            prop_assert_eq!(first.mapped_addr, second.mapped_addr);
        }

        /// Port preservation needs every probe to keep its port and no repeats
        #[test]
        fn ports_preserved_requires_identity(ports in prop::collection::vec(1024u16..1030, 3)) {
            let probes: Vec<_> = ports.iter().map(|&p| (p, Some(p))).collect();
            let mut distinct = ports.clone();
            distinct.sort_unstable();
            distinct.dedup();
            prop_assert_eq!(ports_preserved(&probes), distinct.len() == 3);

            let mut shifted = probes.clone();
            shifted[0].1 = Some(ports[0].wrapping_add(100));
            prop_assert!(!ports_preserved(&shifted));
        }
    }
}

// ============================================================================
// Keepalive Properties
// ============================================================================

mod keepalive_properties {
    use super::*;
    use nat1_forward::{PingState, Route, Router};

    proptest! {
        /// Only the first route is the keepalive route
        #[test]
        fn router_reserves_first_route(count in 1usize..64) {
            let mut router = Router::new();
            let routes: Vec<_> = (0..count).map(|_| router.next_route()).collect();
            prop_assert_eq!(routes[0], Route::Keepalive);
            prop_assert!(routes[1..].iter().all(|r| *r == Route::Target));
            prop_assert_eq!(router.assigned(), count as u64);
        }

        /// Loss is declared exactly when the unanswered run reaches the limit
        #[test]
        fn ping_state_counts_consecutive_misses(
            max in 1u32..8,
            events in prop::collection::vec(any::<bool>(), 0..64),
        ) {
            // true = ping sent, false = pong received
            let mut state = PingState::new(max);
            let mut run = 0u32;
            for ping in events {
                if ping {
                    let result = state.on_ping();
                    if run + 1 >= max {
                        prop_assert!(result.is_err());
                        break;
                    }
                    prop_assert!(result.is_ok());
                    run += 1;
                } else {
                    state.on_pong();
                    run = 0;
                }
                prop_assert_eq!(state.missed(), run);
            }
        }
    }
}
