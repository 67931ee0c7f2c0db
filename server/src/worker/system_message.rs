use serde_json::Value;

use actorfabric_shared::{messages, packet::Payload, DataKey, ErrorCode, FieldFilter};

use super::channel_data::{decode_apply_payload, DataOp};

/// Messages every channel handles itself, before its handler table is
/// consulted
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SystemMessage {
    Subscribe {
        fields: FieldFilter,
    },
    Unsubscribe,
    SetChannelData {
        key: DataKey,
        value: Option<Value>,
    },
    SetChannelDataIf {
        key: DataKey,
        value: Option<Value>,
        expected: Option<Value>,
    },
    ApplyChannelData(Vec<DataOp>),
    ChannelData {
        fields: FieldFilter,
    },
}

impl SystemMessage {
    /// `None` when `name` is not a system message; `Some(Err)` when it is
    /// but the payload is malformed
    pub fn parse(name: &str, payload: &Payload) -> Option<Result<Self, ErrorCode>> {
        let parsed = match name {
            messages::SUBSCRIBE => {
                read_fields(payload).map(|fields| SystemMessage::Subscribe { fields })
            }
            messages::UNSUBSCRIBE => Ok(SystemMessage::Unsubscribe),
            messages::CHANNEL_DATA => {
                read_fields(payload).map(|fields| SystemMessage::ChannelData { fields })
            }
            messages::SET_CHANNEL_DATA => {
                read_key(payload).map(|key| SystemMessage::SetChannelData {
                    key,
                    value: optional_field(payload, "value"),
                })
            }
            messages::SET_CHANNEL_DATA_IF => {
                read_key(payload).map(|key| SystemMessage::SetChannelDataIf {
                    key,
                    value: optional_field(payload, "value"),
                    expected: optional_field(payload, "expected"),
                })
            }
            messages::APPLY_CHANNEL_DATA => {
                decode_apply_payload(&payload.to_json()).map(SystemMessage::ApplyChannelData)
            }
            _ => return None,
        };
        Some(parsed)
    }
}

// absent stays `None`, an explicit `null` is `Some(Null)`
fn optional_field(payload: &Payload, field: &str) -> Option<Value> {
    payload.json()?.get(field).cloned()
}

fn read_key(payload: &Payload) -> Result<DataKey, ErrorCode> {
    let key = payload.str_field("key").ok_or(ErrorCode::BadPayload)?;
    DataKey::parse(key).map_err(|_| ErrorCode::InvalidDataKey)
}

fn read_fields(payload: &Payload) -> Result<FieldFilter, ErrorCode> {
    let fields = match payload.json().and_then(|json| json.get("fields")) {
        None | Some(Value::Null) => None,
        Some(Value::Array(entries)) => Some(
            entries
                .iter()
                .map(|entry| entry.as_str().map(str::to_string))
                .collect::<Option<Vec<String>>>()
                .ok_or(ErrorCode::BadPayload)?,
        ),
        Some(_) => return Err(ErrorCode::BadPayload),
    };
    FieldFilter::from_field_list(fields.as_deref()).map_err(|_| ErrorCode::InvalidDataKey)
}
