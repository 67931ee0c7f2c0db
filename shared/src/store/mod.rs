mod error;
pub use error::StoreError;

cfg_if! {
    if #[cfg(feature = "local_backends")] {
        mod memory_store;
        pub use memory_store::{MemoryStore, MemoryStoreHub};
    }
}

use serde_json::Value;

use crate::types::ServerTime;

/// Caller-chosen id correlating a started operation with its completion
pub type StoreOpId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Get { key: String },
    Set { key: String, value: Value },
    /// Every entry whose key starts with `prefix`
    Search { prefix: String },
}

impl StoreOp {
    pub fn key(&self) -> &str {
        match self {
            StoreOp::Get { key } | StoreOp::Set { key, .. } => key,
            StoreOp::Search { prefix } => prefix,
        }
    }

    pub fn is_write(&self) -> bool {
        matches!(self, StoreOp::Set { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreReply {
    Value(Option<Value>),
    Written,
    Matches(Vec<(String, Value)>),
}

/// Asynchronous key/value metadata store, polled rather than awaited.
///
/// `start` begins an operation; its outcome shows up in a later `poll`
/// (possibly never, if the backend hangs). A completion may arrive long
/// after the caller gave up on it.
pub trait MetadataStore {
    fn start(&mut self, id: StoreOpId, op: StoreOp, now: ServerTime);

    fn poll(&mut self, now: ServerTime) -> Vec<(StoreOpId, Result<StoreReply, StoreError>)>;
}
