//! Gossip broadcast over the in-memory network.

use gossamer_node::sim::{Client, Network};
use gossamer_node::{Body, NodeConfig};
use gossamer_services::Broadcast;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn broadcast_node(network: &Network, id: &str) -> Arc<Broadcast> {
    let node = network.node(NodeConfig::default());
    let service = Broadcast::install(&node).unwrap();
    network.add_node(id, node);
    service
}

async fn read(client: &Client, node: &str) -> Value {
    let reply = client.call(node, Body::new("read")).await.unwrap();
    assert_eq!(reply.kind(), "read_ok");
    reply.body.get("messages").cloned().unwrap()
}

#[tokio::test]
async fn test_broadcast_forwards_to_neighbors_without_msg_id() {
    let network = Network::new();
    broadcast_node(&network, "n1");
    let n2 = network.client("n2");
    let n3 = network.client("n3");
    let client = network.client("c1");
    network.init(&client).await.unwrap();

    let reply = client
        .call(
            "n1",
            Body::new("topology").with("topology", json!({"n1": ["n2", "n3"], "n2": ["n1"]})),
        )
        .await
        .unwrap();
    assert_eq!(reply.kind(), "topology_ok");

    let reply = client
        .call("n1", Body::new("broadcast").with("message", "m5"))
        .await
        .unwrap();
    assert_eq!(reply.kind(), "broadcast_ok");
    assert_eq!(read(&client, "n1").await, json!(["m5"]));

    for peer in [&n2, &n3] {
        let gossip = peer.recv(Duration::from_secs(1)).await.unwrap();
        assert_eq!(gossip.src, "n1");
        assert_eq!(gossip.kind(), "broadcast");
        assert_eq!(gossip.body.get("message"), Some(&json!("m5")));
        assert_eq!(gossip.body.msg_id, None);
    }
}

#[tokio::test]
async fn test_gossip_is_not_acknowledged_and_forwarded_once() {
    let network = Network::new();
    let service = broadcast_node(&network, "n1");
    let n2 = network.client("n2");
    let client = network.client("c1");
    network.init(&client).await.unwrap();
    client
        .call("n1", Body::new("topology").with("topology", json!({"n1": ["n2"]})))
        .await
        .unwrap();

    // gossip from a peer: no msg_id, so no broadcast_ok comes back
    n2.send("n1", Body::new("broadcast").with("message", 1)).unwrap();
    n2.send("n1", Body::new("broadcast").with("message", 1)).unwrap();

    let forwarded = n2.recv(Duration::from_secs(1)).await.unwrap();
    assert_eq!(forwarded.kind(), "broadcast");
    assert_eq!(forwarded.body.msg_id, None);
    assert!(n2.recv(Duration::from_millis(100)).await.is_none());
    assert_eq!(service.messages().len(), 1);
}

#[tokio::test]
async fn test_flooding_converges_on_a_line() {
    let network = Network::new();
    let services: Vec<_> = ["n1", "n2", "n3", "n4"]
        .iter()
        .map(|id| broadcast_node(&network, id))
        .collect();
    let client = network.client("c1");
    network.init(&client).await.unwrap();

    let topology = json!({
        "n1": ["n2"],
        "n2": ["n1", "n3"],
        "n3": ["n2", "n4"],
        "n4": ["n3"],
    });
    for id in network.node_ids() {
        client
            .call(&id, Body::new("topology").with("topology", topology.clone()))
            .await
            .unwrap();
    }
    assert_eq!(services[1].neighbors(), vec!["n1", "n3"]);

    for (i, target) in ["n1", "n4", "n2", "n1"].iter().enumerate() {
        let reply = client
            .call(target, Body::new("broadcast").with("message", i))
            .await
            .unwrap();
        assert_eq!(reply.kind(), "broadcast_ok");
    }

    let expected = json!([0, 1, 2, 3]);
    for _ in 0..100 {
        if services
            .iter()
            .all(|s| serde_json::to_value(s.messages()).unwrap() == expected)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for id in network.node_ids() {
        assert_eq!(read(&client, &id).await, expected);
    }
}
