//! The wire envelope shared by every node.
//!
//! ```text
//! {"src": "n1", "dest": "c1", "body": {"type": "read_ok", "in_reply_to": 4, ...}}
//! ```
//!
//! [`Body`] keeps the routing fields (`type`, `msg_id`, `in_reply_to`) typed
//! and flattens everything else into a JSON field bag. Handlers decode the
//! bag into their own request structs with [`Body::parse`] and build replies
//! from serde-tagged enums with [`Body::from_payload`].

use crate::error::{NodeError, Result, RpcError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::warn;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// One protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub src: String,
    pub dest: String,
    pub body: Body,
}

impl Message {
    pub fn new(src: impl Into<String>, dest: impl Into<String>, body: Body) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            body,
        }
    }

    /// Parses one line of input. Rejects anything without a string `body.type`.
    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn kind(&self) -> &str {
        &self.body.kind
    }
}

/// A message body: routing fields plus an open set of payload fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub msg_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<u64>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Body {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            msg_id: None,
            in_reply_to: None,
            fields: Map::new(),
        }
    }

    /// Adds a payload field.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Builds a body from a serde-tagged payload, e.g. an enum with
    /// `#[serde(tag = "type", rename_all = "snake_case")]`.
    pub fn from_payload<T: Serialize>(payload: &T) -> Result<Self> {
        let value = serde_json::to_value(payload)?;
        if !value.is_object() {
            return Err(NodeError::InvalidMessage(format!(
                "payload must serialize to an object, got {value}"
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Decodes the payload fields into a handler's request type.
    pub fn parse<T: DeserializeOwned>(&self) -> std::result::Result<T, RpcError> {
        let value = Value::Object(self.fields.clone());
        serde_json::from_value(value).map_err(|e| {
            RpcError::malformed_request(format!("bad {} request: {}", self.kind, e))
        })
    }

    pub fn is_error(&self) -> bool {
        self.kind == "error"
    }

    /// Interprets an `error` body. Returns `None` for any other type.
    pub fn error(&self) -> Option<RpcError> {
        if !self.is_error() {
            return None;
        }
        let parsed = self.parse::<RpcError>();
        Some(parsed.unwrap_or_else(|e| e))
    }

    /// The body of an error reply carrying `err`.
    pub fn from_error(err: &RpcError) -> Self {
        Body::new("error")
            .with("code", err.code.code())
            .with("text", err.text.clone())
    }
}

/// Reads the next message from a line-delimited stream, skipping blank
/// lines and lines that are not valid UTF-8. Returns `Ok(None)` at end of
/// input.
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes = reader.read_until(b'\n', &mut buf).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line.trim_end_matches(LINE_ENDINGS),
            Err(err) => {
                warn!(bytes, error = %err, "skipping line that is not UTF-8");
                continue;
            }
        };
        if line.is_empty() {
            continue;
        }
        return Ok(Some(line.to_string()));
    }
}

/// Encodes `message` as one JSON line and flushes it.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
