use serde::{Deserialize, Serialize};

/// What a server tells the master about itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub channels: u64,
    pub messages_in: u64,
    pub messages_out: u64,
}

/// Running counters kept by a `ChannelServer`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Live channel workers on this server
    pub channels: u64,
    pub messages_in: u64,
    pub messages_out: u64,
    pub creates: u64,
    pub destroys: u64,
    /// Sequence gaps given up on
    pub recoveries: u64,
    /// Packets re-published after their destination was missing
    pub sends_retried: u64,
    pub deliveries_failed: u64,
    /// Packets that reached a channel already shutting down and were
    /// re-routed to its next incarnation
    pub bounced: u64,
}

impl LoadStats {
    pub fn report(&self) -> LoadReport {
        LoadReport {
            channels: self.channels,
            messages_in: self.messages_in,
            messages_out: self.messages_out,
        }
    }
}
