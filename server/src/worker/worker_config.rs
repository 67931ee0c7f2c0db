use crate::FabricServerError;

/// Timing knobs shared by every channel worker on a server
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// How long a worker must sit idle before it tries to auto-destroy
    pub destroy_idle_ms: u64,
    /// After this long, an unacknowledged packet that never asked for an ack
    /// is assumed delivered, so the next packet may start a new generation.
    /// Must be shorter than `destroy_idle_ms`.
    pub max_noack_ms: u64,
    /// Per-peer send state older than this is forgotten (receive state after
    /// twice this). Must be several times `max_noack_ms`.
    pub forget_index_ms: u64,
    /// Exchange pings to wait before giving up on a sequence gap
    pub recovery_pings: u64,
    /// Dirty data waits this long before being written, coalescing changes
    pub commit_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            destroy_idle_ms: 60_000,
            max_noack_ms: 30_000,
            forget_index_ms: 120_000,
            recovery_pings: 4,
            commit_delay_ms: 1_000,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), FabricServerError> {
        if self.max_noack_ms >= self.destroy_idle_ms {
            return Err(FabricServerError::InvalidConfig {
                reason: format!(
                    "max_noack_ms ({}) must be less than destroy_idle_ms ({})",
                    self.max_noack_ms, self.destroy_idle_ms
                ),
            });
        }
        if self.forget_index_ms < self.max_noack_ms.saturating_mul(3) {
            return Err(FabricServerError::InvalidConfig {
                reason: format!(
                    "forget_index_ms ({}) must be at least 3x max_noack_ms ({})",
                    self.forget_index_ms, self.max_noack_ms
                ),
            });
        }
        if self.recovery_pings == 0 {
            return Err(FabricServerError::InvalidConfig {
                reason: "recovery_pings must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}
