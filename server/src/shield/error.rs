use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShieldError {
    /// The store did not answer within the call's timeout. For writes this is
    /// an assumed failure: the write may still land later.
    #[error("Store call timed out; outcome unknown")]
    Timeout,

    /// Every retry failed
    #[error("Store call for `{key}` failed after {attempts} attempts")]
    RetriesExhausted { key: String, attempts: u32 },
}
