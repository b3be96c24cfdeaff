//! Subscription and topic lifecycle scenarios.
//!
//! Covers validation at the subscribe boundary, idempotent teardown,
//! cancellation concurrent with in-flight broadcasts, slow-consumer lag
//! coalescing, and node shutdown.

use hive_gossip::{
    GossipConfig, GossipError, GossipEvent, GossipNode, MemoryNetwork, NodeAddress, Subscription,
    TopicId,
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

fn exchange_hints(a: &GossipNode, b: &GossipNode, port_a: u16, port_b: u16) {
    let addr_a = format!("127.0.0.1:{port_a}").parse().expect("valid addr");
    let addr_b = format!("127.0.0.1:{port_b}").parse().expect("valid addr");
    a.add_address_hint(NodeAddress::new(b.peer_id()).with_direct_addresses([addr_b]));
    b.add_address_hint(NodeAddress::new(a.peer_id()).with_direct_addresses([addr_a]));
}

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

/// Waits until the node holds no topic state at all.
async fn wait_for_empty_topics(node: &GossipNode) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !node.topics().is_empty() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "topic state was never torn down"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ============================================================================
// Validation
// ============================================================================

#[tokio::test]
async fn malformed_topic_fails_before_any_state() {
    let network = MemoryNetwork::new();
    let node = GossipNode::memory_with_config(&network, test_config());

    for len in [0usize, 1, 16, 31, 33, 64] {
        let result = node.subscribe(&vec![7u8; len], vec![]).await;
        match result {
            Err(GossipError::InvalidTopic { len: reported }) => assert_eq!(reported, len),
            other => panic!("expected InvalidTopic for len {len}, got {other:?}"),
        }
    }

    assert!(node.topics().is_empty());
}

// ============================================================================
// Idempotent Teardown
// ============================================================================

#[tokio::test]
async fn subscribe_then_cancel_leaves_no_residue() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let node = GossipNode::memory_with_config(&network, test_config());
    let topic = [9u8; 32];

    let subscription = node.subscribe(&topic, vec![]).await.expect("subscribe");
    assert_eq!(node.topics(), vec![TopicId::from_bytes(topic)]);

    subscription.cancel().await.expect("cancel");
    wait_for_empty_topics(&node).await;

    // A later subscribe starts the topic from scratch and works normally.
    let again = node.subscribe(&topic, vec![]).await.expect("re-subscribe");
    again.broadcast(b"fresh start".to_vec()).await.expect("broadcast");
    assert_eq!(node.topics().len(), 1);
}

#[tokio::test]
async fn topic_survives_while_other_subscribers_remain() {
    let network = MemoryNetwork::new();
    let node = GossipNode::memory_with_config(&network, test_config());
    let topic = [10u8; 32];

    let first = node.subscribe(&topic, vec![]).await.expect("first");
    let second = node.subscribe(&topic, vec![]).await.expect("second");

    first.cancel().await.expect("cancel first");
    tokio::time::sleep(Duration::from_millis(100)).await;

    // The topic stays up for the remaining subscriber.
    assert_eq!(node.topics().len(), 1);
    second.broadcast(b"still here".to_vec()).await.expect("broadcast");

    second.cancel().await.expect("cancel second");
    wait_for_empty_topics(&node).await;
}

// ============================================================================
// Cancel Concurrent with Broadcast
// ============================================================================

#[tokio::test]
async fn cancel_mid_broadcast_stops_delivery_and_releases_link() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());
    exchange_hints(&n0, &n1, 4000, 4001);

    let topic = [11u8; 32];
    let mut sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");

    wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;

    // Keep broadcasting from n0 while n1 cancels mid-stream.
    let (handle0, _events0) = sub0.split();
    let broadcaster = tokio::spawn(async move {
        for n in 0u32..100 {
            if handle0.broadcast(n.to_le_bytes().to_vec()).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    });

    wait_for_event(&mut sub1, 10, |e| matches!(e, GossipEvent::Received { .. })).await;
    sub1.cancel().await.expect("cancel");

    // After cancel returns, nothing further is observable on this sink.
    assert_eq!(sub1.try_recv(), None);
    let next = tokio::time::timeout(Duration::from_millis(300), sub1.recv())
        .await
        .expect("recv should end immediately after cancel");
    assert_eq!(next, None);

    // n1 was the topic's last subscriber: its mesh participation is released.
    wait_for_empty_topics(&n1).await;

    broadcaster.await.expect("broadcaster task");
}

// ============================================================================
// Slow Consumer Lag
// ============================================================================

#[tokio::test]
async fn slow_consumer_gets_one_coalesced_lag_marker() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(
        &network,
        test_config().with_sink_capacity(4),
    );
    exchange_hints(&n0, &n1, 4000, 4001);

    let topic = [12u8; 32];
    let mut sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");

    wait_for_event(&mut sub0, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;
    // Drain n1's link event so only broadcasts hit the queue afterwards.
    wait_for_event(&mut sub1, 10, |e| matches!(e, GossipEvent::NeighborUp(_))).await;

    for n in 0u32..20 {
        sub0.broadcast(n.to_le_bytes().to_vec()).await.expect("broadcast");
    }

    // Let every message land while the consumer sits idle.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let mut lag_count = 0;
    let mut received = Vec::new();
    while let Some(event) = sub1.try_recv() {
        match event {
            GossipEvent::Lagged => lag_count += 1,
            GossipEvent::Received { content, .. } => received.push(content),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    // One coalesced marker for the whole overrun episode, never one per drop.
    assert_eq!(lag_count, 1);
    // Only the newest events survive, in order, within the queue bound.
    assert_eq!(received.len(), 4);
    assert_eq!(received.last(), Some(&19u32.to_le_bytes().to_vec()));
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn shutdown_tears_down_everything() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let node = GossipNode::memory_with_config(&network, test_config());

    let mut sub_a = node.subscribe(&[13u8; 32], vec![]).await.expect("subscribe a");
    let mut sub_b = node.subscribe(&[14u8; 32], vec![]).await.expect("subscribe b");

    node.shutdown().await;

    // Every live subscription ends and all topic state is gone.
    let next_a = tokio::time::timeout(Duration::from_secs(2), sub_a.recv())
        .await
        .expect("sub_a should end after shutdown");
    assert_eq!(next_a, None);
    let next_b = tokio::time::timeout(Duration::from_secs(2), sub_b.recv())
        .await
        .expect("sub_b should end after shutdown");
    assert_eq!(next_b, None);
    assert!(node.topics().is_empty());

    let result = node.subscribe(&[15u8; 32], vec![]).await;
    assert!(matches!(result, Err(GossipError::NodeShutdown)));
}
