use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use actorfabric_shared::{set_path, ErrorCode};

/// One change to a channel's public data, keyed relative to `public`.
/// A missing `value` deletes the key; `null` is stored as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataOp {
    pub key: String,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

pub(crate) fn present_value<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl DataOp {
    pub fn new(key: &str, value: Option<Value>) -> Self {
        Self {
            key: key.to_string(),
            value,
        }
    }

    pub fn top_level(&self) -> &str {
        self.key.split('.').next().unwrap_or_default()
    }

    /// Applies this change to a mirrored public snapshot
    pub fn apply_to(&self, public: &mut Value) {
        let path: Vec<String> = self.key.split('.').map(str::to_string).collect();
        set_path(public, &path, self.value.clone());
    }
}

/// What a subscriber learns about a channel it subscribes to
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelDataUpdate {
    /// Full (filtered) public data, received when the subscription starts
    Snapshot(Value),
    /// Incremental changes pushed by the channel
    Ops(Vec<DataOp>),
}

#[derive(Serialize, Deserialize)]
struct BatchPayload {
    batch: Vec<DataOp>,
}

/// Payload of an `apply_channel_data` push: a single op object, or
/// `{"batch": [...]}` when one logical operation changed several keys
pub(crate) fn encode_apply_payload(ops: &[DataOp]) -> Value {
    match ops {
        [op] => serde_json::to_value(op).unwrap_or(Value::Null),
        _ => json!({ "batch": ops }),
    }
}

pub(crate) fn decode_apply_payload(payload: &Value) -> Result<Vec<DataOp>, ErrorCode> {
    if payload.get("batch").is_some() {
        return serde_json::from_value::<BatchPayload>(payload.clone())
            .map(|batch| batch.batch)
            .map_err(|_| ErrorCode::BadPayload);
    }
    serde_json::from_value::<DataOp>(payload.clone())
        .map(|op| vec![op])
        .map_err(|_| ErrorCode::BadPayload)
}
