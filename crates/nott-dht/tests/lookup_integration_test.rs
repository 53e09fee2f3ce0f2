/**
 * Lookup integration tests
 *
 * A small network of nodes on the in-memory transport, bootstrapped through
 * the first node, exercising every lookup flow end to end.
 */
use nott_dht::{Dht, DhtConfig, PutItem, Refresh};
use nott_network::MemoryNetwork;
use nott_protocol::{NodeId, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

const NETWORK_SIZE: u8 = 24;
const LOOKUP_DEADLINE: Duration = Duration::from_secs(10);

fn addr(host: u8) -> SocketAddr {
    SocketAddr::from(([10, 0, 0, host], 6881))
}

fn test_config(bootstrap: bool) -> DhtConfig {
    DhtConfig {
        bootstrap_nodes: if bootstrap {
            vec![addr(1).to_string()]
        } else {
            Vec::new()
        },
        response_timeout_ms: 300,
        poll_interval_ms: 20,
        ..Default::default()
    }
}

fn start_node(network: &MemoryNetwork, host: u8, config: DhtConfig) -> Dht {
    let transport = network.bind(addr(host)).expect("address should be free");
    Dht::with_transport(config, Arc::new(transport)).expect("node should start")
}

/// Nodes 10.0.0.1..=size, all bootstrapped through the first one
async fn build_network(size: u8) -> (MemoryNetwork, Vec<Dht>) {
    let network = MemoryNetwork::new();
    let mut nodes = vec![start_node(&network, 1, test_config(false))];
    for host in 2..=size {
        let node = start_node(&network, host, test_config(true));
        node.bootstrap().await.expect("bootstrap should run");
        nodes.push(node);
    }
    (network, nodes)
}

// ===============
// Node lookups
// ===============

#[tokio::test]
async fn test_bootstrap_fills_routing_tables() {
    let (_network, nodes) = build_network(NETWORK_SIZE).await;

    for node in &nodes[1..] {
        assert!(
            node.routing_table().len() >= 2,
            "node {} only knows {} peers",
            node.node_id(),
            node.routing_table().len()
        );
    }
}

#[tokio::test]
async fn test_find_node_locates_existing_node() {
    let (_network, nodes) = build_network(NETWORK_SIZE).await;
    let target = *nodes[16].node_id();

    let found = nodes[4].find_node(target).collect_until(LOOKUP_DEADLINE).await;
    assert_eq!(found, vec![addr(17)]);
}

#[tokio::test]
async fn test_find_node_for_absent_id_terminates() {
    let (_network, nodes) = build_network(12).await;

    let mut lookup = nodes[3].find_node(NodeId::random());
    let outcome = tokio::time::timeout(LOOKUP_DEADLINE, lookup.next()).await;
    assert_eq!(outcome.expect("lookup should converge"), None);
}

#[tokio::test]
async fn test_find_node_routes_around_dead_nodes() {
    let (network, nodes) = build_network(NETWORK_SIZE).await;
    for host in [6, 7, 8, 9, 10] {
        network.blackhole(addr(host));
    }
    let target = *nodes[19].node_id();

    let found = nodes[2].find_node(target).collect_until(LOOKUP_DEADLINE).await;
    assert_eq!(found, vec![addr(20)]);
}

// ===============
// Peers and items
// ===============

#[tokio::test]
async fn test_announce_then_get_peers() {
    let (_network, nodes) = build_network(NETWORK_SIZE).await;
    let info_hash = NodeId::random();

    let acknowledged = nodes[2]
        .announce(info_hash, Some(51413), Refresh::Once)
        .collect_until(LOOKUP_DEADLINE)
        .await;
    assert!(!acknowledged.is_empty(), "no node accepted the announce");

    let peers = nodes[19]
        .get_peers(info_hash)
        .collect_until(LOOKUP_DEADLINE)
        .await;
    let announced = SocketAddr::from(([10, 0, 0, 3], 51413));
    assert_eq!(peers, vec![announced]);
}

#[tokio::test]
async fn test_implied_port_announce() {
    let (_network, nodes) = build_network(12).await;
    let info_hash = NodeId::random();

    let acknowledged = nodes[5]
        .announce(info_hash, None, Refresh::Once)
        .collect_until(LOOKUP_DEADLINE)
        .await;
    assert!(!acknowledged.is_empty());

    let peers = nodes[8]
        .get_peers(info_hash)
        .collect_until(LOOKUP_DEADLINE)
        .await;
    assert_eq!(peers, vec![addr(6)]);
}

#[tokio::test]
async fn test_put_is_acknowledged() {
    let (_network, nodes) = build_network(NETWORK_SIZE).await;
    let item = PutItem::immutable(Value::Bytes(b"Hello World!".to_vec()));

    let stored_at = nodes[7]
        .put(item, Refresh::Once)
        .expect("item is valid")
        .collect_until(LOOKUP_DEADLINE)
        .await;
    assert!(!stored_at.is_empty(), "no node acknowledged the put");
    assert!(!stored_at.contains(&addr(8)));
}

#[tokio::test]
async fn test_get_finishes_without_items() {
    let (_network, nodes) = build_network(12).await;
    let item = PutItem::immutable(Value::Int(42));
    let target = item.target().unwrap();

    // values are acknowledged but not kept
    let mut lookup = nodes[1].get(target, None);
    let outcome = tokio::time::timeout(LOOKUP_DEADLINE, lookup.next()).await;
    assert_eq!(outcome.expect("lookup should converge"), None);
}

// ===============
// Lookup handles
// ===============

#[tokio::test]
async fn test_cancel_closes_stream() {
    let (_network, nodes) = build_network(12).await;

    let mut lookup = nodes[2].announce(
        NodeId::random(),
        Some(6881),
        Refresh::Every(Duration::from_secs(60)),
    );
    let canceller = lookup.canceller();
    canceller.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        while lookup.next().await.is_some() {}
    })
    .await;
    assert!(outcome.is_ok(), "cancelled lookup kept its stream open");
}

#[tokio::test]
async fn test_read_only_node_looks_up_without_joining() {
    let (network, nodes) = build_network(12).await;
    let config = DhtConfig {
        read_only: true,
        ..test_config(true)
    };
    let quiet = start_node(&network, 50, config);
    quiet.bootstrap().await.unwrap();

    let target = *nodes[9].node_id();
    let found = quiet.find_node(target).collect_until(LOOKUP_DEADLINE).await;
    assert_eq!(found, vec![addr(10)]);

    for node in &nodes {
        assert!(node.routing_table().find_peer_by_id(quiet.node_id()).is_none());
    }
}

#[tokio::test]
async fn test_shutdown_ends_running_lookups() {
    let (_network, nodes) = build_network(12).await;
    let mut lookup = nodes[4].announce(
        NodeId::random(),
        Some(6881),
        Refresh::Every(Duration::from_millis(50)),
    );
    nodes[4].shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(2), async {
        while lookup.next().await.is_some() {}
    })
    .await;
    assert!(outcome.is_ok());
}
