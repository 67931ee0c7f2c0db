use thiserror::Error;

use crate::{codec::SerdeErr, ChannelIdError};

/// Errors that can occur while decoding an inter-channel packet
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Malformed binary framing (SECURITY: possibly malicious input)
    #[error("Malformed packet: {0}")]
    Serde(#[from] SerdeErr),

    /// Sender id field did not hold a valid channel id
    #[error("Packet sender id is invalid: {0}")]
    InvalidSender(#[from] ChannelIdError),

    /// Identity metadata or JSON payload failed to parse
    #[error("Packet JSON field `{field}` is invalid: {reason}")]
    InvalidJson { field: &'static str, reason: String },
}
