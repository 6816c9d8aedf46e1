//! Outbound transports.
//!
//! The runtime only ever writes through a [`Transport`]; reading is driven
//! by [`Node::run`](crate::node::Node::run) or, in memory, by the simulator
//! calling [`Node::dispatch`](crate::node::Node::dispatch) directly.

use crate::error::{NodeError, Result};
use crate::message::{write_message, Message};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, Stdout};
use tokio::sync::{mpsc, Mutex};

/// Abstract outbound transport.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Writes one message. Concurrent calls must never interleave on the wire.
    async fn send(&self, message: &Message) -> Result<()>;
}

/// Line-delimited JSON over any async writer.
///
/// The writer sits behind an async mutex held across encode, write and
/// flush, so each message lands on the wire as one whole line.
pub struct LineTransport<W> {
    writer: Mutex<W>,
}

impl<W> LineTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl LineTransport<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

#[async_trait]
impl<W> Transport for LineTransport<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, message: &Message) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, message).await?;
        Ok(())
    }
}

/// In-memory transport feeding a simulated network's outbox.
#[derive(Clone)]
pub struct MemoryTransport {
    outbox: mpsc::UnboundedSender<Message>,
}

impl MemoryTransport {
    pub fn new(outbox: mpsc::UnboundedSender<Message>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, message: &Message) -> Result<()> {
        self.outbox.send(message.clone()).map_err(|_| {
            NodeError::Transport(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "network outbox closed",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{read_message, Body};
    use std::sync::Arc;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_concurrent_sends_produce_whole_lines() {
        let (writer, reader) = tokio::io::duplex(64 * 1024);
        let transport = Arc::new(LineTransport::new(writer));

        let mut tasks = Vec::new();
        for i in 0..20u64 {
            let transport = Arc::clone(&transport);
            tasks.push(tokio::spawn(async move {
                let body = Body::new("broadcast").with("message", "x".repeat(200) + &i.to_string());
                transport.send(&Message::new("n1", "n2", body)).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        drop(transport);

        let mut reader = BufReader::new(reader);
        let mut seen = 0;
        while let Some(line) = read_message(&mut reader).await.unwrap() {
            let msg = Message::from_line(&line).unwrap();
            assert_eq!(msg.kind(), "broadcast");
            seen += 1;
        }
        assert_eq!(seen, 20);
    }

    #[tokio::test]
    async fn test_memory_transport_reports_closed_outbox() {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport::new(tx);
        drop(rx);

        let result = transport
            .send(&Message::new("n1", "n2", Body::new("ping")))
            .await;
        assert!(matches!(result, Err(NodeError::Transport(_))));
    }
}
