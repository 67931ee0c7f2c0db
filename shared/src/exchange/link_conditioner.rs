/// Fault injection for the in-memory exchange
#[derive(Clone, Debug)]
pub struct LinkConditionerConfig {
    /// Probability (0.0 - 1.0) that a published packet is silently lost
    pub drop_chance: f32,
    /// Probability that a published packet is delivered twice
    pub duplicate_chance: f32,
    /// Probability that a published packet jumps ahead of queued ones
    pub reorder_chance: f32,
    /// How far back in the inbox a reordered packet may be inserted
    pub reorder_depth: usize,
    pub seed: u64,
}

impl LinkConditionerConfig {
    pub fn new(drop_chance: f32, duplicate_chance: f32, reorder_chance: f32) -> Self {
        Self {
            drop_chance,
            duplicate_chance,
            reorder_chance,
            reorder_depth: 4,
            seed: 0,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reorders and duplicates, but never loses anything
    pub fn shuffle_only() -> Self {
        Self::new(0.0, 0.1, 0.3)
    }

    pub fn poor_condition() -> Self {
        Self::new(0.05, 0.05, 0.2)
    }
}

impl Default for LinkConditionerConfig {
    fn default() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }
}
