//! RPC correlation and dispatch-loop tests
//!
//! These run whole nodes: over the in-memory network for correlation under
//! concurrency, and over a pair of duplex pipes for the line-delimited loop.

use async_trait::async_trait;
use gossamer_node::sim::{Network, Service};
use gossamer_node::{Body, ErrorCode, LineTransport, Message, Node, NodeConfig, NodeConfigBuilder, NodeError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};

/// Replies after `delay_ms`, echoing `n`.
struct Delayed;

#[async_trait]
impl Service for Delayed {
    async fn handle(&self, request: &Message) -> Body {
        let delay = request.body.get("delay_ms").and_then(|v| v.as_u64()).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        let n = request.body.get("n").cloned().unwrap_or_default();
        Body::new("delayed_ok").with("n", n)
    }
}

async fn cluster_with_delayed_service(config: NodeConfig) -> (Network, Node) {
    let network = Network::new();
    network.add_service("delayed", Arc::new(Delayed));
    let node = network.node(config);
    network.add_node("n1", node.clone());
    let driver = network.client("c0");
    network.init(&driver).await.unwrap();
    (network, node)
}

#[tokio::test]
async fn test_out_of_order_replies_resolve_to_their_callers() {
    let (_network, node) = cluster_with_delayed_service(NodeConfig::default()).await;

    let calls = (0..5u64).map(|n| {
        let node = node.clone();
        tokio::spawn(async move {
            // later requests answer first
            let body = Body::new("delayed")
                .with("n", n)
                .with("delay_ms", 50 - n * 10);
            node.sync_rpc("delayed", body).await
        })
    });
    let calls: Vec<_> = calls.collect();

    let (async_tx, mut async_rx) = tokio::sync::mpsc::unbounded_channel();
    node.async_rpc(
        "delayed",
        Body::new("delayed").with("n", 99).with("delay_ms", 5),
        move |reply| {
            let _ = async_tx.send(reply);
        },
    )
    .await
    .unwrap();

    for (n, call) in calls.into_iter().enumerate() {
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply.body.get("n"), Some(&json!(n)));
        assert_eq!(reply.kind(), "delayed_ok");
    }

    let async_reply = async_rx.recv().await.unwrap();
    assert_eq!(async_reply.body.get("n"), Some(&json!(99)));
    assert_eq!(node.pending_rpcs(), 0);
}

#[tokio::test]
async fn test_unanswered_rpc_times_out() {
    let config = NodeConfigBuilder::new().rpc_timeout(50).build();
    let (network, node) = cluster_with_delayed_service(config).await;
    // a client endpoint that never answers
    let sink = network.client("void");

    let result = node.sync_rpc("void", Body::new("read")).await;
    assert!(matches!(result, Err(NodeError::Timeout { .. })));
    assert!(sink.recv(Duration::from_millis(10)).await.is_some());

    // a slow reply past the timeout also fails, and a fast one still works
    let slow = node
        .sync_rpc("delayed", Body::new("delayed").with("delay_ms", 200))
        .await;
    assert!(matches!(slow, Err(NodeError::Timeout { .. })));
    let fast = node.sync_rpc("delayed", Body::new("delayed")).await.unwrap();
    assert_eq!(fast.kind(), "delayed_ok");
}

#[tokio::test]
async fn test_line_loop_survives_garbage_and_unknown_types() {
    let (mut input, node_in) = tokio::io::duplex(4096);
    let (node_out, output) = tokio::io::duplex(4096);

    let node = Node::new(Arc::new(LineTransport::new(node_out)), NodeConfig::default());
    node.on("echo", |node, msg| async move {
        let echo = msg.body.get("echo").cloned().unwrap_or_default();
        node.reply(&msg, Body::new("echo_ok").with("echo", echo)).await?;
        Ok(())
    })
    .unwrap();

    let runner = {
        let node = node.clone();
        tokio::spawn(async move { node.run(BufReader::new(node_in)).await })
    };

    let lines = [
        r#"{"src":"c0","dest":"n1","body":{"type":"init","msg_id":1,"node_id":"n1","node_ids":["n1"]}}"#,
        "this is not json",
        r#"{"src":"c1","dest":"n1","body":{"msg_id":2}}"#,
        r#"{"src":"c1","dest":"n1","body":{"type":"mystery","msg_id":3}}"#,
        r#"{"src":"c1","dest":"n1","body":{"type":"echo","msg_id":4,"echo":"still here"}}"#,
    ];
    for line in lines {
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"\n").await.unwrap();
    }
    drop(input);
    runner.await.unwrap().unwrap();

    let mut output = BufReader::new(output);
    let mut replies = Vec::new();
    while replies.len() < 3 {
        let line = gossamer_node::message::read_message(&mut output)
            .await
            .unwrap()
            .unwrap();
        replies.push(Message::from_line(&line).unwrap());
    }
    replies.sort_by_key(|m| m.body.in_reply_to);

    assert_eq!(replies[0].kind(), "init_ok");
    assert_eq!(replies[1].body.in_reply_to, Some(3));
    assert_eq!(replies[1].body.error().unwrap().code, ErrorCode::Crash);
    assert_eq!(replies[2].kind(), "echo_ok");
    assert_eq!(replies[2].body.get("echo"), Some(&json!("still here")));
}

#[tokio::test]
async fn test_line_loop_skips_lines_that_are_not_utf8() {
    let (mut input, node_in) = tokio::io::duplex(4096);
    let (node_out, output) = tokio::io::duplex(4096);

    let node = Node::new(Arc::new(LineTransport::new(node_out)), NodeConfig::default());
    node.on("echo", |node, msg| async move {
        let echo = msg.body.get("echo").cloned().unwrap_or_default();
        node.reply(&msg, Body::new("echo_ok").with("echo", echo)).await?;
        Ok(())
    })
    .unwrap();

    let runner = {
        let node = node.clone();
        tokio::spawn(async move { node.run(BufReader::new(node_in)).await })
    };

    input
        .write_all(br#"{"src":"c0","dest":"n1","body":{"type":"init","msg_id":1,"node_id":"n1","node_ids":["n1"]}}"#)
        .await
        .unwrap();
    input.write_all(b"\n\xff\xfe garbage\n").await.unwrap();
    input
        .write_all(br#"{"src":"c1","dest":"n1","body":{"type":"echo","msg_id":4,"echo":"after"}}"#)
        .await
        .unwrap();
    input.write_all(b"\n").await.unwrap();
    drop(input);
    runner.await.unwrap().unwrap();

    let mut output = BufReader::new(output);
    let mut replies = Vec::new();
    while replies.len() < 2 {
        let line = gossamer_node::message::read_message(&mut output)
            .await
            .unwrap()
            .unwrap();
        replies.push(Message::from_line(&line).unwrap());
    }
    replies.sort_by_key(|m| m.body.in_reply_to);

    assert_eq!(replies[0].kind(), "init_ok");
    assert_eq!(replies[1].kind(), "echo_ok");
    assert_eq!(replies[1].body.in_reply_to, Some(4));
    assert_eq!(replies[1].body.get("echo"), Some(&json!("after")));
}
