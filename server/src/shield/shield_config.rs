use crate::FabricServerError;

#[derive(Clone, Debug)]
pub struct ShieldConfig {
    pub read_timeout_ms: u64,
    /// Must exceed the store's own worst-case commit latency; giving up on a
    /// write that is still in flight risks a stale overwrite
    pub write_timeout_ms: u64,
    pub max_retries: u32,
    /// Retry `n` waits `backoff_base_ms * n^2`
    pub backoff_base_ms: u64,
    /// How long a timed-out write keeps its key blocked when the store never
    /// answers at all; timed-out reads are forgotten after the same span
    pub zombie_write_expiry_ms: u64,
}

impl Default for ShieldConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 5_000,
            write_timeout_ms: 60_000,
            max_retries: 3,
            backoff_base_ms: 100,
            zombie_write_expiry_ms: 300_000,
        }
    }
}

impl ShieldConfig {
    pub fn backoff(&self, attempts: u32) -> u64 {
        let n = u64::from(attempts);
        self.backoff_base_ms.saturating_mul(n.saturating_mul(n))
    }

    pub fn validate(&self) -> Result<(), FabricServerError> {
        if self.write_timeout_ms <= self.read_timeout_ms {
            return Err(FabricServerError::InvalidConfig {
                reason: format!(
                    "write_timeout_ms ({}) must be longer than read_timeout_ms ({})",
                    self.write_timeout_ms, self.read_timeout_ms
                ),
            });
        }
        if self.zombie_write_expiry_ms < self.write_timeout_ms {
            return Err(FabricServerError::InvalidConfig {
                reason: "zombie_write_expiry_ms must be at least write_timeout_ms".to_string(),
            });
        }
        Ok(())
    }
}
