//! End-to-end tests against in-process STUN responders.
//!
//! Every exchange runs over loopback. Tests that need a second server IP use
//! 127.0.0.2, which Linux routes on the loopback interface.

use nat1_integration_tests::{BIND_ERROR_RESPONSE, FilteredServer, NatFilter, Responder, v4};
use nat1_stun::{
    ChangeRequest, MappingResolver, NatClassifier, NatType, ProtocolError, StunError, StunProbe,
    Transport,
};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;

const LOOPBACK_ANY_PORT: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0);

fn quick_probe() -> StunProbe {
    StunProbe::new()
        .with_timeout(Duration::from_millis(300))
        .with_retries(0)
}

fn translated() -> SocketAddrV4 {
    SocketAddrV4::new(Ipv4Addr::new(203, 0, 113, 9), 41000)
}

// ============================================================================
// Probe
// ============================================================================

#[tokio::test]
async fn test_udp_probe_reports_observed_source() {
    let server = Responder::new().spawn_udp().await;
    let result = quick_probe()
        .probe(Transport::Udp, LOOPBACK_ANY_PORT, server, ChangeRequest::NONE)
        .await
        .unwrap();

    assert_eq!(result.peer_addr, server);
    assert_eq!(result.mapped_addr, Some(result.source_addr));
    assert_ne!(result.source_addr.port(), 0);
    assert_eq!(result.other_addr, None);
}

#[tokio::test]
async fn test_tcp_probe_reports_observed_source() {
    let server = Responder::new().spawn_tcp().await;
    let result = quick_probe().probe_tcp(LOOPBACK_ANY_PORT, server).await.unwrap();

    assert_eq!(result.peer_addr, server);
    assert_eq!(result.mapped_addr, Some(result.source_addr));
}

#[tokio::test]
async fn test_legacy_attributes_are_understood() {
    let other = SocketAddrV4::new(Ipv4Addr::new(198, 51, 100, 2), 3479);
    let server = Responder::new()
        .legacy()
        .mapping(translated())
        .other_address(other)
        .spawn_udp()
        .await;

    let result = quick_probe()
        .probe(Transport::Udp, LOOPBACK_ANY_PORT, server, ChangeRequest::NONE)
        .await
        .unwrap();
    assert_eq!(result.mapped_addr, Some(translated()));
    assert_eq!(result.other_addr, Some(other));
}

#[tokio::test]
async fn test_error_response_is_reported() {
    let server = Responder::new().error_response().spawn_udp().await;
    let result = quick_probe()
        .probe(Transport::Udp, LOOPBACK_ANY_PORT, server, ChangeRequest::NONE)
        .await;

    assert!(matches!(
        result,
        Err(StunError::Protocol(ProtocolError::ErrorResponse(BIND_ERROR_RESPONSE)))
    ));
}

#[tokio::test]
async fn test_reply_from_wrong_endpoint_is_discarded() {
    // Loopback cannot answer from another IP, so CHANGE-IP never succeeds
    let server = Responder::new().spawn_udp().await;
    let result = quick_probe()
        .probe(Transport::Udp, LOOPBACK_ANY_PORT, server, ChangeRequest::IP_AND_PORT)
        .await;
    assert!(matches!(result, Err(StunError::Timeout { .. })));

    let result = quick_probe()
        .probe(Transport::Udp, LOOPBACK_ANY_PORT, server, ChangeRequest::PORT)
        .await
        .unwrap();
    assert_eq!(result.mapped_addr, Some(result.source_addr));
}

#[tokio::test]
async fn test_retransmission_recovers_from_lost_request() {
    // Drops the first request, answers the second
    let socket = UdpSocket::bind(LOOPBACK_ANY_PORT).await.unwrap();
    let server = v4(socket.local_addr().unwrap());
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let _ = socket.recv_from(&mut buf).await.unwrap();
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        let request = nat1_stun::StunMessage::decode(&buf[..len]).unwrap();
        let response = Responder::new().respond(&request, v4(from)).encode();
        socket.send_to(&response, from).await.unwrap();
    });

    let probe = StunProbe::new()
        .with_timeout(Duration::from_millis(200))
        .with_retries(1);
    let result = probe
        .probe(Transport::Udp, LOOPBACK_ANY_PORT, server, ChangeRequest::NONE)
        .await
        .unwrap();
    assert!(result.mapped_addr.is_some());
}

// ============================================================================
// Mapping resolver
// ============================================================================

#[tokio::test]
async fn test_mapping_resolver_udp() {
    let server = Responder::new().mapping(translated()).spawn_udp().await;
    let resolver = MappingResolver::new(Transport::Udp, server.to_string(), quick_probe());
    assert_eq!(resolver.resolve(LOOPBACK_ANY_PORT).await.unwrap(), translated());
}

#[tokio::test]
async fn test_mapping_resolver_tcp_shares_bound_port() {
    // The forwarder already holds the port; the probe must still bind it
    let listener = nat1_stun::socket::bind_tcp_listener(LOOPBACK_ANY_PORT).unwrap();
    let local = v4(listener.local_addr().unwrap());

    let server = Responder::new().spawn_tcp().await;
    let resolver = MappingResolver::new(Transport::Tcp, server.to_string(), quick_probe());
    assert_eq!(resolver.resolve(local).await.unwrap(), local);
}

#[tokio::test]
async fn test_mapping_resolver_rejects_response_without_address() {
    let socket = UdpSocket::bind(LOOPBACK_ANY_PORT).await.unwrap();
    let server = v4(socket.local_addr().unwrap());
    tokio::spawn(async move {
        let mut buf = [0u8; 1500];
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        let request = nat1_stun::StunMessage::decode(&buf[..len]).unwrap();
        let response = nat1_stun::StunMessage::binding_response(request.transaction_id);
        socket.send_to(&response.encode(), from).await.unwrap();
    });

    let resolver = MappingResolver::new(Transport::Udp, server.to_string(), quick_probe());
    let result = resolver.resolve(LOOPBACK_ANY_PORT).await;
    assert!(matches!(result, Err(StunError::MissingMappedAddress)));
}

// ============================================================================
// Classifier
// ============================================================================

#[tokio::test]
async fn test_classify_open_internet_udp() {
    let server = Responder::new().spawn_udp().await;
    let classifier = NatClassifier::new("127.0.0.1:1", server.to_string(), quick_probe());

    let classification = classifier.classify(Transport::Udp, LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.nat_type, NatType::OpenInternet);
    assert_eq!(classification.nat_type.code(), 0);
    assert!(classification.error.is_none());
    assert!(classification.is_directly_reachable());
}

#[tokio::test]
async fn test_classify_open_internet_tcp() {
    let server = Responder::new().spawn_tcp().await;
    let classifier = NatClassifier::new(server.to_string(), "127.0.0.1:1", quick_probe());

    let classification = classifier.classify(Transport::Tcp, LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.transport, Transport::Tcp);
    assert_eq!(classification.nat_type, NatType::OpenInternet);
}

#[tokio::test]
async fn test_classify_without_secondary_is_unsupported() {
    let server = Responder::new().mapping(translated()).spawn_udp().await;
    let classifier = NatClassifier::new("127.0.0.1:1", server.to_string(), quick_probe());

    let classification = classifier.classify_udp(LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.nat_type, NatType::Unsupported);
    assert_eq!(classification.nat_type.code(), -1);
    assert_eq!(classification.mapped_addr, Some(translated()));
    assert!(classification.error.is_none());
}

#[tokio::test]
async fn test_classify_secondary_on_same_ip_is_unsupported() {
    let other = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 3479);
    let server = Responder::new()
        .mapping(translated())
        .other_address(other)
        .spawn_udp()
        .await;
    let classifier = NatClassifier::new("127.0.0.1:1", server.to_string(), quick_probe());

    let classification = classifier.classify_udp(LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.nat_type, NatType::Unsupported);
}

#[tokio::test]
async fn test_classify_symmetric_udp() {
    let secondary = Responder::new()
        .mapping(SocketAddrV4::new(*translated().ip(), 41001))
        .spawn_udp_on(Ipv4Addr::new(127, 0, 0, 2))
        .await;
    let primary = Responder::new()
        .mapping(translated())
        .other_address(secondary)
        .spawn_udp()
        .await;
    let classifier = NatClassifier::new("127.0.0.1:1", primary.to_string(), quick_probe());

    let classification = classifier.classify_udp(LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.nat_type, NatType::Symmetric);
    assert_eq!(classification.nat_type.code(), 4);
    assert!(!classification.is_directly_reachable());
}

#[tokio::test]
async fn test_classify_restricted_cone_udp() {
    // Same mapping through both servers; only CHANGE-PORT replies get through
    let secondary = Responder::new()
        .mapping(translated())
        .spawn_udp_on(Ipv4Addr::new(127, 0, 0, 2))
        .await;
    let primary = Responder::new()
        .mapping(translated())
        .other_address(secondary)
        .spawn_udp()
        .await;
    let classifier = NatClassifier::new("127.0.0.1:1", primary.to_string(), quick_probe());

    let classification = classifier.classify_udp(LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.nat_type, NatType::RestrictedCone);
    assert_eq!(classification.mapped_addr, Some(translated()));
}

async fn classify_behind(filter: NatFilter) -> (NatType, FilteredServer) {
    let server = FilteredServer::spawn(translated(), filter).await;
    let classifier = NatClassifier::new("127.0.0.1:1", server.primary.to_string(), quick_probe());
    let classification = classifier.classify_udp(LOOPBACK_ANY_PORT).await;
    assert!(classification.error.is_none());
    (classification.nat_type, server)
}

#[tokio::test]
async fn test_port_restricted_filter_blocks_changed_replies() {
    let (nat_type, _server) = classify_behind(NatFilter::AddressAndPortDependent).await;
    assert_eq!(nat_type, NatType::PortRestrictedCone);
}

#[tokio::test]
async fn test_address_restricted_filter_admits_port_change_only() {
    let (nat_type, _server) = classify_behind(NatFilter::AddressDependent).await;
    assert_eq!(nat_type, NatType::RestrictedCone);
}

#[tokio::test]
async fn test_open_filter_is_full_cone() {
    let (nat_type, _server) = classify_behind(NatFilter::EndpointIndependent).await;
    assert_eq!(nat_type, NatType::FullCone);
}

#[tokio::test]
async fn test_filtering_exchanges_precede_secondary_contact() {
    let (_, server) = classify_behind(NatFilter::AddressAndPortDependent).await;
    let contacted = server.contacted();

    let first_secondary = contacted
        .iter()
        .position(|(endpoint, _)| *endpoint == server.other)
        .expect("secondary endpoint never contacted");
    let changes: Vec<_> = contacted[..first_secondary]
        .iter()
        .map(|(endpoint, change)| {
            assert_eq!(*endpoint, server.primary);
            *change
        })
        .collect();
    assert_eq!(
        changes,
        [ChangeRequest::NONE, ChangeRequest::IP_AND_PORT, ChangeRequest::PORT]
    );
    assert!(
        contacted[first_secondary..]
            .iter()
            .all(|(_, change)| *change == ChangeRequest::NONE)
    );
}

#[tokio::test]
async fn test_classify_silent_server_fails() {
    let silent = UdpSocket::bind(LOOPBACK_ANY_PORT).await.unwrap();
    let server = v4(silent.local_addr().unwrap());
    let classifier = NatClassifier::new("127.0.0.1:1", server.to_string(), quick_probe());

    let classification = classifier.classify_udp(LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.nat_type, NatType::Unsupported);
    assert!(matches!(classification.error, Some(StunError::Timeout { .. })));
}

#[tokio::test]
async fn test_classify_unresolvable_server_fails() {
    let classifier = NatClassifier::new("no-port", "no-port", quick_probe());

    let classification = classifier.classify_tcp(LOOPBACK_ANY_PORT).await;
    assert_eq!(classification.nat_type, NatType::Unsupported);
    assert!(matches!(classification.error, Some(StunError::Resolve { .. })));
}
