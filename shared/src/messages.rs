//! Names of the messages every channel understands, plus the coordination
//! messages exchanged between channel servers and the master.

pub const SUBSCRIBE: &str = "subscribe";
pub const UNSUBSCRIBE: &str = "unsubscribe";
pub const SET_CHANNEL_DATA: &str = "set_channel_data";
pub const SET_CHANNEL_DATA_IF: &str = "set_channel_data_if";
pub const APPLY_CHANNEL_DATA: &str = "apply_channel_data";
/// Read a channel's public data once, without subscribing
pub const CHANNEL_DATA: &str = "channel_data";

pub const CREATE_CHANNEL: &str = "create_channel";
pub const CREATE_WORKER: &str = "create_worker";
pub const MASTER_LOCK: &str = "master_lock";
pub const MASTER_UNLOCK: &str = "master_unlock";
pub const LOAD_REPORT: &str = "load_report";
pub const REPORT_LOAD: &str = "report_load";
