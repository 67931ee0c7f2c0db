use std::collections::HashMap;

use actorfabric_shared::{next_sequence, ChannelId, SequenceNumber, ServerTime, SEQUENCE_MASK};

struct PeerSendState {
    last_sequence: SequenceNumber,
    last_sent_at: ServerTime,
    last_expects_ack: bool,
    last_acked: bool,
}

/// Assigns per-destination sequence numbers and decides when a packet may
/// carry the new-generation hint
#[derive(Default)]
pub struct OutboundSequencer {
    peers: HashMap<ChannelId, PeerSendState>,
}

impl OutboundSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sequence number for the next packet to `dest`, and whether
    /// it starts a new generation.
    ///
    /// A packet starts a new generation when nothing is known about `dest`
    /// (fresh sequences start at a random point), when the previous packet
    /// was acknowledged, or when the previous packet asked for no ack and
    /// `max_noack_ms` has passed since it went out.
    pub fn next(
        &mut self,
        dest: &ChannelId,
        expects_ack: bool,
        now: ServerTime,
        max_noack_ms: u64,
        rng: &mut fastrand::Rng,
    ) -> (SequenceNumber, bool) {
        let (sequence, new_generation) = match self.peers.get(dest) {
            None => (rng.u32(..) & SEQUENCE_MASK, true),
            Some(state) => {
                let quiet_for = now.saturating_sub(state.last_sent_at);
                let settled = state.last_acked
                    || (!state.last_expects_ack && quiet_for >= max_noack_ms);
                (next_sequence(state.last_sequence), settled)
            }
        };

        self.peers.insert(
            dest.clone(),
            PeerSendState {
                last_sequence: sequence,
                last_sent_at: now,
                last_expects_ack: expects_ack,
                last_acked: false,
            },
        );

        (sequence, new_generation)
    }

    /// Records a response to the packet sent with `sequence`. Only an ack of
    /// the most recent packet lets the next one start a new generation.
    pub fn acknowledge(&mut self, dest: &ChannelId, sequence: SequenceNumber) {
        if let Some(state) = self.peers.get_mut(dest) {
            if state.last_sequence == sequence {
                state.last_acked = true;
            }
        }
    }

    pub fn forget_stale(&mut self, now: ServerTime, forget_index_ms: u64) {
        self.peers
            .retain(|_, state| now.saturating_sub(state.last_sent_at) < forget_index_ms);
    }

    pub fn last_sequence(&self, dest: &ChannelId) -> Option<SequenceNumber> {
        self.peers.get(dest).map(|state| state.last_sequence)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}
