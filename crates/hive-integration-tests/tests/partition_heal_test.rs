//! Lazy digest-exchange repair: messages missed by eager push are
//! backfilled through the periodic summary / pull-request cycle.

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

// ============================================================================
// Summary / Pull Backfill
// ============================================================================

#[tokio::test]
async fn late_joiner_backfills_missed_broadcast() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());
    exchange_hints(&n0, &n1, 4000, 4001);

    let topic = [21u8; 32];

    // n0 broadcasts while alone; eager push has nobody to reach.
    let sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    sub0.broadcast(b"early bird".to_vec()).await.expect("broadcast");
    tokio::time::sleep(Duration::from_millis(50)).await;

    // n1 joins afterwards and must still converge on the message via the
    // digest summary and pull exchange.
    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");

    let event = wait_for_event(&mut sub1, 10, |e| matches!(e, GossipEvent::Received { .. })).await;
    assert_eq!(
        event,
        GossipEvent::Received {
            content: b"early bird".to_vec(),
            delivered_from: n0.peer_id(),
        }
    );
}

#[tokio::test]
async fn backfilled_message_is_not_duplicated_later() {
    let _ = tracing_subscriber::fmt::try_init();

    let network = MemoryNetwork::new();
    let n0 = GossipNode::memory_with_config(&network, test_config());
    let n1 = GossipNode::memory_with_config(&network, test_config());
    exchange_hints(&n0, &n1, 4000, 4001);

    let topic = [22u8; 32];
    let sub0 = n0.subscribe(&topic, vec![]).await.expect("n0 subscribe");
    sub0.broadcast(b"repair me".to_vec()).await.expect("broadcast");

    let mut sub1 = n1
        .subscribe(&topic, vec![n0.peer_id()])
        .await
        .expect("n1 subscribe");

    wait_for_event(&mut sub1, 10, |e| matches!(e, GossipEvent::Received { .. })).await;

    // Several more summary rounds pass; the repaired digest must stay seen.
    tokio::time::sleep(Duration::from_millis(600)).await;
    while let Some(event) = sub1.try_recv() {
        assert!(
            !matches!(event, GossipEvent::Received { .. }),
            "backfilled message delivered twice: {event:?}"
        );
    }
}
