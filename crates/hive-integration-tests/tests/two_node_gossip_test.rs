//! Two-and-three-node gossip scenarios over the in-memory transport.
//!
//! Covers the core delivery contract: mesh joins produce NeighborUp events,
//! broadcasts reach joined peers exactly once, relays cross hops, and link
//! failures surface as NeighborDown.

use hive_gossip::{
    GossipConfig, GossipEvent, GossipNode, MemoryNetwork, NodeAddress, Subscription,
};
use std::time::Duration;

// ============================================================================
// Helper Functions
// ============================================================================

fn test_config() -> GossipConfig {
    GossipConfig {
        heartbeat_interval: Duration::from_millis(50),
        heartbeat_timeout: Duration::from_millis(400),
        shuffle_interval: Duration::from_millis(500),
        summary_interval: Duration::from_millis(150),
        ..GossipConfig::small_mesh()
    }
}

/// Exchanges address hints between two nodes, as a ticket or invitation
/// code would out of band.
fn exchange_hints(a: &GossipNode, b: &GossipNode, port_a: u16, port_b: u16) {
    let addr_a = format!("127.0.0.1:{port_a}").parse().expect("valid addr");
    let addr_b = format!("127.0.0.1:{port_b}").parse().expect("valid addr");
    a.add_address_hint(NodeAddress::new(b.peer_id()).with_direct_addresses([addr_b]));
    b.add_address_hint(NodeAddress::new(a.peer_id()).with_direct_addresses([addr_a]));
}

/// Waits for an event matching the predicate, failing the test on timeout.
async fn wait_for_event(
    subscription: &mut Subscription,
    secs: u64,
    pred: impl Fn(&GossipEvent) -> bool,
) -> GossipEvent {
    tokio::time::timeout(Duration::from_secs(secs), async {
        loop {
            let event = subscription.recv().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ============================================================================
// Two-Node Join and Broadcast
// ============================================================================

#[tokio::test]
async fn two_node_join_and_broadcast() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());

    // Exchange addresses before subscribing, as a ticket would.
    exchange_hints(&n0, &n1, 4000, 4001);

    let topic = [1u8; 32];

    // n0 subscribes first with empty bootstrap.
    let mut sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");

    // n1 subscribes with n0 as bootstrap, initiating the join.
    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");

    // n0 must observe n1 as a neighbor within a bounded wait.
    let event = wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    assert_eq!(event, GossipEvent::NeighborUp(n1.peer_id()));

    // Give the link a moment to settle on both sides.
    tokio::time::sleep(Duration::from_millis(100)).await;

    sub0.broadcast(b"hello".to_vec()).await.expect("broadcast");

    let event = wait_for_event(&mut sub1, 15, |e| matches!(e, GossipEvent::Received { .. })).await;
    assert_eq!(
        event,
        GossipEvent::Received {
            content: b"hello".to_vec(),
            delivered_from: n0.peer_id(),
        }
    );
}

#[tokio::test]
async fn both_sides_observe_the_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());
    exchange_hints(&n0, &n1, 4000, 4001);

    let topic = [2u8; 32];
    let mut sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");

    let up0 = wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    let up1 = wait_for_event(&mut sub1, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;

    assert_eq!(up0, GossipEvent::NeighborUp(n1.peer_id()));
    assert_eq!(up1, GossipEvent::NeighborUp(n0.peer_id()));
}

// ============================================================================
// Link Failure
// ============================================================================

#[tokio::test]
async fn peer_failure_surfaces_as_neighbor_down() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());
    exchange_hints(&n0, &n1, 4000, 4001);

    let topic = [3u8; 32];
    let mut sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    let _sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");

    wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;

    // Sever n1; n0's next heartbeat or its expiry evicts the neighbor.
    network.disconnect(&n1.peer_id());

    let event =
        wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborDown(_))).await;
    assert_eq!(event, GossipEvent::NeighborDown(n1.peer_id()));
}

// ============================================================================
// Multi-Hop Relay
// ============================================================================

#[tokio::test]
async fn broadcast_relays_across_hops() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());
    let n2 = GossipNode::memory_with_config(&network, test_config());

    // A line topology: n2 never learns n0's address and vice versa.
    exchange_hints(&n0, &n1, 4000, 4001);
    exchange_hints(&n1, &n2, 4001, 4002);

    let topic = [4u8; 32];
    let mut sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");
    let mut sub2 = n2
        .subscribe(&topic, vec![n1.peer_id()])
        .await
        .expect("n2 subscribe");

    wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    wait_for_event(&mut sub2, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    sub0.broadcast(b"ripple".to_vec()).await.expect("broadcast");

    // n1 hears it from the origin, n2 from the relay.
    let event = wait_for_event(&mut sub1, 15, |e| matches!(e, GossipEvent::Received { .. })).await;
    assert_eq!(
        event,
        GossipEvent::Received {
            content: b"ripple".to_vec(),
            delivered_from: n0.peer_id(),
        }
    );

    let event = wait_for_event(&mut sub2, 15, |e| matches!(e, GossipEvent::Received { .. })).await;
    assert_eq!(
        event,
        GossipEvent::Received {
            content: b"ripple".to_vec(),
            delivered_from: n1.peer_id(),
        }
    );
}

// ============================================================================
// Duplicate Suppression
// ============================================================================

#[tokio::test]
async fn duplicate_forwarding_yields_single_received_event() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());
    let n2 = GossipNode::memory_with_config(&network, test_config());

    // Full triangle: everyone can reach everyone.
    exchange_hints(&n0, &n1, 4000, 4001);
    exchange_hints(&n1, &n2, 4001, 4002);
    exchange_hints(&n0, &n2, 4000, 4002);

    let topic = [5u8; 32];
    let mut sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");
    let mut sub2 = n2
        .subscribe(&topic, vec![n0.peer_id(), n1.peer_id()])
        .await
        .expect("n2 subscribe");

    // Wait until the triangle is fully linked: n2 links both peers, and n0
    // sees both of its own.
    wait_for_event(&mut sub2, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    wait_for_event(&mut sub2, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    sub0.broadcast(b"once".to_vec()).await.expect("broadcast");

    // Each peer gets the message both directly and via the other's forward;
    // the seen cache must collapse that to one Received event apiece.
    for sub in [&mut sub1, &mut sub2] {
        let event =
            wait_for_event(sub, 15, |e| matches!(e, GossipEvent::Received { .. })).await;
        assert!(matches!(event, GossipEvent::Received { content, .. } if content == b"once"));
    }

    // A settle window: no second Received may arrive anywhere.
    tokio::time::sleep(Duration::from_millis(500)).await;
    for sub in [&mut sub1, &mut sub2] {
        while let Some(event) = sub.try_recv() {
            assert!(
                !matches!(event, GossipEvent::Received { .. }),
                "duplicate Received event: {event:?}"
            );
        }
    }
}
