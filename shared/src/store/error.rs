use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The stored bytes could not be interpreted
    #[error("Stored value for `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}
