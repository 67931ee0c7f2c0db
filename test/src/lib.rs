//! Single-process clusters of `ChannelServer`s over the in-memory exchange
//! and store, plus the channel types the integration tests drive.

pub mod channels;
pub mod cluster;
pub mod connection;

pub use channels::{test_registry, Received, Recorder};
pub use cluster::{id, init_logging, TestCluster, TICK_MS};
pub use connection::TestConnection;
