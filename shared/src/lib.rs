//! # Actorfabric Shared
//! Channel addressing, the inter-channel packet codec, and the Exchange /
//! metadata store contracts shared by actorfabric crates.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod channel_id;
mod codec;
mod data_path;
mod error_code;
mod sequence_list;
mod types;
mod wrapping_number;

pub mod exchange;
pub mod messages;
pub mod packet;
pub mod store;

pub use channel_id::{
    ChannelId, ChannelIdError, BROADCAST_CHANNEL_TYPE, CLIENT_CHANNEL_TYPE, MASTER_CHANNEL_TYPE,
    SERVER_CHANNEL_TYPE,
};
pub use codec::{ByteReader, ByteWriter, LongBytes, Serde, SerdeErr};
pub use data_path::{get_path, set_path, DataKey, DataPathError, DataRoot, FieldFilter};
pub use error_code::{ErrorCode, UnknownErrorCode};
pub use sequence_list::{SequenceError, SequenceList};
pub use types::{PingCount, RequestId, SequenceNumber, ServerTime};
pub use wrapping_number::{
    next_sequence, sequence_greater_than, sequence_less_than, wrapping_diff, SEQUENCE_MASK,
};
