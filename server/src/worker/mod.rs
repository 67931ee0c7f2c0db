mod channel_data;
mod channel_worker;
mod context;
mod handlers;
mod lifecycle;
mod logic;
mod requests;
mod sequencing;
mod system_message;
mod worker_config;
mod worker_core;

pub use channel_data::{ChannelDataUpdate, DataOp};
pub(crate) use channel_data::present_value;
pub use context::WorkerContext;
pub use handlers::{HandlerFn, HandlerTable, Inbound, Reply, ResponseHandle};
pub use logic::ChannelLogic;
pub use requests::RequestKey;
pub use sequencing::{InboundSequencer, OutboundSequencer};
pub use worker_config::WorkerConfig;

pub(crate) use channel_worker::{AnyWorker, ChannelWorker};
pub(crate) use worker_core::{
    Clock, MissingPolicy, Outgoing, WorkerCore, WorkerEffect, WorkerInit,
};
