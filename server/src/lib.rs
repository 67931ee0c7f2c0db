//! # Actorfabric Server
//! Hosts channel workers: single-threaded actors addressed as `type.subid`
//! that exchange ordered packets over a shared exchange, mirror each other's
//! public data through subscriptions, and are created on first contact and
//! destroyed when idle.

#![deny(trivial_numeric_casts, unstable_features, unused_import_braces)]

#[macro_use]
extern crate cfg_if;

mod channels;
mod client;
mod error;
mod events;
mod registry;
mod server;
mod shield;
mod worker;

cfg_if! {
    if #[cfg(feature = "tokio_runtime")] {
        pub mod driver;
    }
}

pub use actorfabric_shared as shared;

pub use channels::master::MasterConfig;
pub use client::{ClientConnection, ClientPush, ClientRequest};
pub use error::FabricServerError;
pub use events::{CreateEvent, DestroyEvent, ErrorEvent, ServerEvent, ServerEvents};
pub use registry::{
    ChannelOptions, ChannelType, ChannelTypeRegistry, Persistence, Placement, RegistryError,
};
pub use server::{ChannelServer, LoadReport, LoadStats, RetryConfig, ServerConfig};
pub use shield::{
    DataStoreShield, ShieldCompletion, ShieldConfig, ShieldError, ShieldMetrics, ShieldTicket,
};
pub use worker::{
    ChannelDataUpdate, ChannelLogic, DataOp, HandlerFn, HandlerTable, Inbound, InboundSequencer,
    OutboundSequencer, Reply, RequestKey, ResponseHandle, WorkerConfig, WorkerContext,
};
