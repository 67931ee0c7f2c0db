mod client_channel;
mod protocol;

pub use protocol::{ClientConnection, ClientPush, ClientRequest};

pub(crate) use client_channel::client_worker;
