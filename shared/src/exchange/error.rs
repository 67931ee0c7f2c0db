use thiserror::Error;

use crate::ChannelId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExchangeError {
    /// No receiver or subscriber exists for the destination
    #[error("No receiver registered for {0}")]
    NotFound(ChannelId),

    /// Another endpoint already holds the exclusive registration
    #[error("{0} is already registered by another endpoint")]
    AlreadyExists(ChannelId),

    /// The transport itself failed
    #[error("Exchange transport failure: {0}")]
    Transport(String),
}
