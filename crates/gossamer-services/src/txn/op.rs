use gossamer_crdt::Datum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One micro-operation of a transaction, `[f, key, value]` on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "(String, Datum, Value)", into = "(String, Datum, Value)")]
pub enum Op {
    /// `["r", k, v]`: `v` is null in a request and the list read in a reply.
    Read { key: Datum, value: Value },
    /// `["append", k, v]`: appends `v` to the list at `k`.
    Append { key: Datum, value: Value },
}

impl TryFrom<(String, Datum, Value)> for Op {
    type Error = String;

    fn try_from((f, key, value): (String, Datum, Value)) -> Result<Self, Self::Error> {
        match f.as_str() {
            "r" => Ok(Op::Read { key, value }),
            "append" => Ok(Op::Append { key, value }),
            other => Err(format!("unknown txn function {other:?}")),
        }
    }
}

impl From<Op> for (String, Datum, Value) {
    fn from(op: Op) -> Self {
        match op {
            Op::Read { key, value } => ("r".to_string(), key, value),
            Op::Append { key, value } => ("append".to_string(), key, value),
        }
    }
}
