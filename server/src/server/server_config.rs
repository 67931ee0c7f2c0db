use std::default::Default;

use actorfabric_shared::{ChannelId, SERVER_CHANNEL_TYPE};

use crate::{
    channels::master::MasterConfig, shield::ShieldConfig, worker::WorkerConfig, FabricServerError,
};

/// Capped exponential backoff for re-sending packets whose destination was
/// missing or still being created
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Attempts before queued packets are failed back to their senders
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 50,
            max_delay_ms: 2_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt`; the first attempt is immediate
    pub fn backoff(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}

/// Contains Config properties which will be used by a `ChannelServer`
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Subid of this server's `server.*` channel; unique across the cluster
    pub server_id: String,
    /// How often the server pings itself through the exchange. Sequence gap
    /// recovery is measured in these pings.
    pub ping_interval_ms: u64,
    pub load_report_interval_ms: u64,
    /// Requests without a response after this long fail with `ERR_TIMEOUT`
    pub request_timeout_ms: u64,
    /// Cap on exchange deliveries handled in one tick
    pub max_packets_per_tick: usize,
    pub send_retry: RetryConfig,
    pub worker: WorkerConfig,
    pub shield: ShieldConfig,
    pub master: MasterConfig,
    /// Seeds sequence starts and worker rngs; random when `None`
    pub rng_seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: "0".to_string(),
            ping_interval_ms: 100,
            load_report_interval_ms: 5_000,
            request_timeout_ms: 30_000,
            max_packets_per_tick: 10_000,
            send_retry: RetryConfig::default(),
            worker: WorkerConfig::default(),
            shield: ShieldConfig::default(),
            master: MasterConfig::default(),
            rng_seed: None,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), FabricServerError> {
        ChannelId::new(SERVER_CHANNEL_TYPE, &self.server_id)?;
        self.worker.validate()?;
        self.shield.validate()?;
        let invalid = |reason: &str| {
            Err(FabricServerError::InvalidConfig {
                reason: reason.to_string(),
            })
        };
        if self.ping_interval_ms == 0 {
            return invalid("ping_interval_ms must be positive");
        }
        if self.request_timeout_ms == 0 {
            return invalid("request_timeout_ms must be positive");
        }
        if self.send_retry.max_attempts == 0 {
            return invalid("send_retry.max_attempts must be at least 1");
        }
        if self.max_packets_per_tick == 0 {
            return invalid("max_packets_per_tick must be positive");
        }
        Ok(())
    }
}
