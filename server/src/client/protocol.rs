use serde::{Deserialize, Serialize};
use serde_json::Value;

use actorfabric_shared::{ChannelId, ErrorCode};

use crate::worker::DataOp;

/// One end-user connection, e.g. a WebSocket, carrying JSON text frames.
/// Polled by its `client.*` channel once per tick.
pub trait ClientConnection {
    /// Next frame received from the user, if any
    fn receive(&mut self) -> Option<String>;
    fn send(&mut self, frame: String);
    fn is_connected(&self) -> bool;
}

/// Frames a user may send
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Subscribe {
        resp_id: u32,
        channel: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Vec<String>>,
    },
    Unsubscribe {
        resp_id: u32,
        channel: String,
    },
    /// A named message for another channel; with `resp_id` it is a request
    ChannelMsg {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resp_id: Option<u32>,
        channel: String,
        msg: String,
        #[serde(default)]
        data: Value,
    },
    SetChannelData {
        resp_id: u32,
        channel: String,
        key: String,
        /// Absent deletes the key
        #[serde(
            default,
            deserialize_with = "crate::worker::present_value",
            skip_serializing_if = "Option::is_none"
        )]
        value: Option<Value>,
    },
    Login {
        resp_id: u32,
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    Logout {
        resp_id: u32,
    },
}

/// Frames sent to a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPush {
    Response {
        resp_id: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        err: Option<ErrorCode>,
        #[serde(default)]
        data: Value,
    },
    ApplyChannelData {
        channel: ChannelId,
        ops: Vec<DataOp>,
    },
    Message {
        channel: ChannelId,
        msg: String,
        #[serde(default)]
        data: Value,
    },
}
