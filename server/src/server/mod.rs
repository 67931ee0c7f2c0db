mod channel_server;
mod load;
mod server_config;

pub use channel_server::ChannelServer;
pub use load::{LoadReport, LoadStats};
pub use server_config::{RetryConfig, ServerConfig};
