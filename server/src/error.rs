use thiserror::Error;

use actorfabric_shared::{exchange::ExchangeError, ChannelId, ChannelIdError, ErrorCode};

use crate::registry::RegistryError;

/// Errors surfaced by a `ChannelServer`, either returned from a call or
/// delivered as an `ErrorEvent`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FabricServerError {
    /// A config struct failed validation
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Invalid channel id: {0}")]
    InvalidChannelId(#[from] ChannelIdError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Channel type registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Another server already runs with this server id
    #[error("Server id {0} is already taken on the exchange")]
    DuplicateServer(ChannelId),

    /// A channel with this id already lives on this server
    #[error("Channel {0} already exists on this server")]
    ChannelExists(ChannelId),

    /// Creating a channel failed for good
    #[error("Creating {channel} failed: {code}")]
    CreationFailed { channel: ChannelId, code: ErrorCode },

    /// Queued packets for a destination were given up on after retrying
    #[error("Delivery to {dest} failed: {code}")]
    DeliveryFailed { dest: ChannelId, code: ErrorCode },

    /// The shield exhausted its retries; storage is unavailable beyond
    /// tolerable bounds. The affected operation was abandoned.
    #[error("Store unavailable for {channel}: {reason}")]
    StoreUnavailable { channel: ChannelId, reason: String },

    /// `bootstrap` has not been called yet
    #[error("Server has not been bootstrapped")]
    NotBootstrapped,
}
