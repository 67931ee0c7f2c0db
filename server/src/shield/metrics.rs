/// Counters for external load monitoring
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShieldMetrics {
    /// Calls issued to the store, retries included
    pub attempts: u64,
    /// Calls currently outstanding at the store
    pub in_flight: u64,
    /// Calls the store answered with an error
    pub errors: u64,
    pub timeouts: u64,
    pub retries: u64,
    /// Store answers that arrived after the shield had given up on them
    pub late_callbacks: u64,
    /// Queued writes replaced by a newer value for the same key
    pub superseded: u64,
}
