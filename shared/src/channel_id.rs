use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub const MASTER_CHANNEL_TYPE: &str = "master";
pub const SERVER_CHANNEL_TYPE: &str = "server";
pub const CLIENT_CHANNEL_TYPE: &str = "client";
pub const BROADCAST_CHANNEL_TYPE: &str = "broadcast";

/// Errors produced when parsing a channel id
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelIdError {
    /// The id has no `.` separating type from subid
    #[error("Channel id `{id}` is missing the `type.subid` separator")]
    MissingSeparator { id: String },

    /// The type half is empty or contains characters outside `[a-z0-9_]`
    #[error("Channel id `{id}` has an invalid type")]
    InvalidType { id: String },

    /// The subid half is empty or contains whitespace / control characters
    #[error("Channel id `{id}` has an invalid subid")]
    InvalidSubId { id: String },
}

/// Address of a channel worker: `type.subid`, e.g. `user.42`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId {
    kind: String,
    subid: String,
}

impl ChannelId {
    pub fn new(kind: &str, subid: &str) -> Result<Self, ChannelIdError> {
        let id = format!("{}.{}", kind, subid);
        if kind.is_empty()
            || !kind
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        {
            return Err(ChannelIdError::InvalidType { id });
        }
        if subid.is_empty() || subid.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(ChannelIdError::InvalidSubId { id });
        }
        Ok(Self {
            kind: kind.to_string(),
            subid: subid.to_string(),
        })
    }

    pub fn parse(id: &str) -> Result<Self, ChannelIdError> {
        let Some((kind, subid)) = id.split_once('.') else {
            return Err(ChannelIdError::MissingSeparator { id: id.to_string() });
        };
        Self::new(kind, subid)
    }

    /// The singleton master actor
    pub fn master() -> Self {
        Self {
            kind: MASTER_CHANNEL_TYPE.to_string(),
            subid: MASTER_CHANNEL_TYPE.to_string(),
        }
    }

    /// Cluster-wide broadcast address every channel server subscribes to
    pub fn server_broadcast() -> Self {
        Self {
            kind: BROADCAST_CHANNEL_TYPE.to_string(),
            subid: "servers".to_string(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn subid(&self) -> &str {
        &self.subid
    }

    pub fn is_client(&self) -> bool {
        self.kind == CLIENT_CHANNEL_TYPE
    }

    pub fn is_master(&self) -> bool {
        self.kind == MASTER_CHANNEL_TYPE
    }

    pub fn is_server(&self) -> bool {
        self.kind == SERVER_CHANNEL_TYPE
    }

    /// Key under which this channel's data is persisted
    pub fn storage_key(&self) -> String {
        format!("{}/{}", self.kind, self.subid)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.subid)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({}.{})", self.kind, self.subid)
    }
}

impl FromStr for ChannelId {
    type Err = ChannelIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ChannelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ChannelId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
