use std::collections::HashMap;

use log::{error, trace};

use actorfabric_shared::{
    next_sequence, sequence_greater_than, sequence_less_than, wrapping_diff, ChannelId,
    PingCount, SequenceList, SequenceNumber, ServerTime,
};

/// (sender, id the packet was addressed to)
type LinkKey = (ChannelId, ChannelId);

/// A new-generation packet at most this far past the last one received
/// continues the same sender's stream across lost packets. Anything else is a
/// restarted sender.
const MAX_CONTINUATION_GAP: i32 = 1 << 16;

struct PeerReceiveState<T> {
    generation_start: SequenceNumber,
    last_received: Option<SequenceNumber>,
    /// Window of the generation before a sender restart
    previous: Option<(SequenceNumber, SequenceNumber)>,
    last_seen_at: ServerTime,
    buffer: SequenceList<T>,
    recovery_started: Option<PingCount>,
}

impl<T> PeerReceiveState<T> {
    fn new(now: ServerTime) -> Self {
        Self {
            generation_start: 0,
            last_received: None,
            previous: None,
            last_seen_at: now,
            buffer: SequenceList::new(),
            recovery_started: None,
        }
    }

    fn already_dispatched(&self, sequence: SequenceNumber) -> bool {
        let within = |(start, end): (SequenceNumber, SequenceNumber)| {
            !sequence_less_than(sequence, start) && !sequence_greater_than(sequence, end)
        };
        self.last_received
            .is_some_and(|last| within((self.generation_start, last)))
            || self.previous.is_some_and(within)
    }

    fn accept_new_generation(&mut self, last: SequenceNumber, sequence: SequenceNumber) {
        let gap = wrapping_diff(last, sequence);
        if gap <= 0 || gap > MAX_CONTINUATION_GAP {
            // sender restarted at a fresh point
            self.previous = Some((self.generation_start, last));
            self.generation_start = sequence;
        }
        self.last_received = Some(sequence);
    }

    fn accept(&mut self, sequence: SequenceNumber, item: T, output: &mut Vec<T>) {
        if self.last_received.is_none() {
            self.generation_start = sequence;
        }
        self.last_received = Some(sequence);
        output.push(item);
    }

    /// Dispatches buffered items that became contiguous, discarding any the
    /// window has already moved past. Returns whether anything was dispatched.
    fn drain(&mut self, output: &mut Vec<T>) -> bool {
        let mut progressed = false;
        while let (Some(front), Some(last)) = (self.buffer.front_id(), self.last_received) {
            if !sequence_greater_than(front, last) {
                self.buffer.pop_front();
                continue;
            }
            if front != next_sequence(last) {
                break;
            }
            if let Some((sequence, item)) = self.buffer.pop_front() {
                self.last_received = Some(sequence);
                output.push(item);
                progressed = true;
            }
        }
        progressed
    }

    /// Holds a packet past a gap; false if it was already held
    fn buffer(&mut self, sequence: SequenceNumber, item: T, ping_count: PingCount) -> bool {
        if self.buffer.try_insert_scan_from_back(sequence, item).is_err() {
            trace!("dropping duplicate buffered packet {}", sequence);
            return false;
        }
        if self.recovery_started.is_none() {
            self.recovery_started = Some(ping_count);
        }
        true
    }

    fn settle_recovery(&mut self, progressed: bool, ping_count: PingCount) {
        if self.buffer.is_empty() {
            self.recovery_started = None;
        } else if progressed || self.recovery_started.is_none() {
            self.recovery_started = Some(ping_count);
        }
    }
}

/// Rebuilds per-link send order from packets the exchange may deliver late,
/// twice, or never.
///
/// In-order packets go straight through. A packet past a gap is held until
/// the gap fills, or until `recovery_pings` exchange pings have gone by, at
/// which point the oldest held packet is released anyway.
pub struct InboundSequencer<T> {
    links: HashMap<LinkKey, PeerReceiveState<T>>,
    recoveries: u64,
    duplicates: u64,
}

impl<T> Default for InboundSequencer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InboundSequencer<T> {
    pub fn new() -> Self {
        Self {
            links: HashMap::new(),
            recoveries: 0,
            duplicates: 0,
        }
    }

    /// Feeds one received packet in, returning whatever may now be dispatched,
    /// in order
    pub fn receive(
        &mut self,
        source: &ChannelId,
        addressed: &ChannelId,
        sequence: SequenceNumber,
        new_generation: bool,
        item: T,
        now: ServerTime,
        ping_count: PingCount,
    ) -> Vec<T> {
        let state = self
            .links
            .entry((source.clone(), addressed.clone()))
            .or_insert_with(|| PeerReceiveState::new(now));
        state.last_seen_at = now;

        let mut output = Vec::new();
        let last_received = state.last_received;
        match last_received {
            Some(last) if sequence == next_sequence(last) => {
                state.accept(sequence, item, &mut output);
            }
            None if new_generation => {
                state.accept(sequence, item, &mut output);
            }
            Some(last) if new_generation => {
                if state.already_dispatched(sequence) {
                    self.duplicates += 1;
                    return output;
                }
                // sender proved the old ordering is moot
                state.accept_new_generation(last, sequence);
                output.push(item);
            }
            Some(last) if !sequence_greater_than(sequence, last) => {
                self.duplicates += 1;
                return output;
            }
            _ if state.already_dispatched(sequence) => {
                self.duplicates += 1;
                return output;
            }
            _ => {
                if !state.buffer(sequence, item, ping_count) {
                    self.duplicates += 1;
                }
                return output;
            }
        }

        let progressed = state.drain(&mut output);
        state.settle_recovery(progressed, ping_count);
        output
    }

    /// Releases the oldest held packet on every link whose gap has outlived
    /// the recovery window
    pub fn poll_recovery(&mut self, ping_count: PingCount, recovery_pings: u64) -> Vec<T> {
        let mut output = Vec::new();
        for ((source, addressed), state) in self.links.iter_mut() {
            let Some(started) = state.recovery_started else {
                continue;
            };
            if ping_count.saturating_sub(started) < recovery_pings {
                continue;
            }
            let Some((sequence, item)) = state.buffer.pop_front() else {
                state.recovery_started = None;
                continue;
            };
            error!(
                "gap on link {} -> {} never filled; dispatching {} out of order",
                source, addressed, sequence
            );
            self.recoveries += 1;
            if state.last_received.is_none() {
                state.generation_start = sequence;
            }
            state.last_received = Some(sequence);
            output.push(item);
            state.drain(&mut output);
            state.recovery_started = if state.buffer.is_empty() {
                None
            } else {
                Some(ping_count)
            };
        }
        output
    }

    /// Drops quiet links with nothing held
    pub fn forget_stale(&mut self, now: ServerTime, forget_ms: u64) {
        self.links.retain(|_, state| {
            !state.buffer.is_empty() || now.saturating_sub(state.last_seen_at) < forget_ms
        });
    }

    /// Packets held waiting for a gap to fill
    pub fn buffered(&self) -> usize {
        self.links.values().map(|state| state.buffer.len()).sum()
    }

    pub fn recoveries(&self) -> u64 {
        self.recoveries
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }
}
