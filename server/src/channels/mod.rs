pub mod master;
pub(crate) mod server_channel;
