//! Echo server: answers `echo` with the same payload.

use gossamer_node::{Body, Message, Node, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Deserialize)]
struct EchoRequest {
    echo: Value,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum EchoReply {
    EchoOk { echo: Value },
}

/// Registers the `echo` handler on `node`.
pub fn install(node: &Node) -> Result<()> {
    node.on("echo", |node: Node, msg: Message| async move {
        let req: EchoRequest = msg.body.parse()?;
        let reply = Body::from_payload(&EchoReply::EchoOk { echo: req.echo })?;
        node.reply(&msg, reply).await?;
        Ok(())
    })
}
