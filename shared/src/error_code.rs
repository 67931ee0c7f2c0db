use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Application-level error codes carried in error responses between
/// channels and back out to end-user connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorCode {
    /// No receiver is registered for the destination
    #[error("ERR_NOT_FOUND")]
    NotFound,
    /// A receiver is already registered under that id
    #[error("ERR_ALREADY_EXISTS")]
    AlreadyExists,
    #[error("ERR_ALREADY_SUBSCRIBED")]
    AlreadySubscribed,
    #[error("ERR_NOT_SUBSCRIBED")]
    NotSubscribed,
    #[error("ERR_LOGIN_REQUIRED")]
    LoginRequired,
    #[error("ERR_INVALID_CHANNEL_ID")]
    InvalidChannelId,
    #[error("ERR_INVALID_DATA_KEY")]
    InvalidDataKey,
    /// Compare-and-set found a different current value
    #[error("ERR_MISMATCH")]
    Mismatch,
    #[error("ERR_TIMEOUT")]
    Timeout,
    /// The owning channel shut down before the call completed
    #[error("ERR_SHUTDOWN")]
    Shutdown,
    #[error("ERR_UNKNOWN_MESSAGE")]
    UnknownMessage,
    #[error("ERR_NOT_ALLOWED")]
    NotAllowed,
    #[error("ERR_STORE")]
    Store,
    #[error("ERR_BAD_PAYLOAD")]
    BadPayload,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 14] = [
        ErrorCode::NotFound,
        ErrorCode::AlreadyExists,
        ErrorCode::AlreadySubscribed,
        ErrorCode::NotSubscribed,
        ErrorCode::LoginRequired,
        ErrorCode::InvalidChannelId,
        ErrorCode::InvalidDataKey,
        ErrorCode::Mismatch,
        ErrorCode::Timeout,
        ErrorCode::Shutdown,
        ErrorCode::UnknownMessage,
        ErrorCode::NotAllowed,
        ErrorCode::Store,
        ErrorCode::BadPayload,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "ERR_NOT_FOUND",
            ErrorCode::AlreadyExists => "ERR_ALREADY_EXISTS",
            ErrorCode::AlreadySubscribed => "ERR_ALREADY_SUBSCRIBED",
            ErrorCode::NotSubscribed => "ERR_NOT_SUBSCRIBED",
            ErrorCode::LoginRequired => "ERR_LOGIN_REQUIRED",
            ErrorCode::InvalidChannelId => "ERR_INVALID_CHANNEL_ID",
            ErrorCode::InvalidDataKey => "ERR_INVALID_DATA_KEY",
            ErrorCode::Mismatch => "ERR_MISMATCH",
            ErrorCode::Timeout => "ERR_TIMEOUT",
            ErrorCode::Shutdown => "ERR_SHUTDOWN",
            ErrorCode::UnknownMessage => "ERR_UNKNOWN_MESSAGE",
            ErrorCode::NotAllowed => "ERR_NOT_ALLOWED",
            ErrorCode::Store => "ERR_STORE",
            ErrorCode::BadPayload => "ERR_BAD_PAYLOAD",
        }
    }

    /// Whether a sender may retry the operation that produced this code
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorCode::NotFound | ErrorCode::Timeout | ErrorCode::Store | ErrorCode::Shutdown
        )
    }
}

/// Returned when parsing an unrecognized `ERR_*` string
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown error code `{0}`")]
pub struct UnknownErrorCode(pub String);

impl FromStr for ErrorCode {
    type Err = UnknownErrorCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCode::ALL
            .iter()
            .find(|code| code.as_str() == s)
            .copied()
            .ok_or_else(|| UnknownErrorCode(s.to_string()))
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
