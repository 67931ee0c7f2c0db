mod data_store_shield;
mod error;
mod metrics;
mod shield_config;

pub use data_store_shield::{DataStoreShield, ShieldCompletion, ShieldTicket};
pub use error::ShieldError;
pub use metrics::ShieldMetrics;
pub use shield_config::ShieldConfig;
