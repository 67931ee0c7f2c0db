use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use serde_json::Value;

use crate::types::ServerTime;

use super::{MetadataStore, StoreError, StoreOp, StoreOpId, StoreReply};

#[derive(Default)]
struct StoreState {
    entries: BTreeMap<String, Value>,
    latency_ms: ServerTime,
    fail_next: u32,
    stall_writes: bool,
    write_log: Vec<(String, Value)>,
    writes_in_flight: HashMap<String, usize>,
    max_concurrent_writes: HashMap<String, usize>,
}

/// Shared backing data for every `MemoryStore` connection in a cluster,
/// with knobs for latency and failure injection
#[derive(Clone, Default)]
pub struct MemoryStoreHub {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStoreHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> MemoryStore {
        MemoryStore {
            hub: self.clone(),
            pending: Vec::new(),
        }
    }

    /// Delay applied to every operation started from now on
    pub fn set_latency(&self, latency_ms: ServerTime) {
        self.lock().latency_ms = latency_ms;
    }

    /// The next `count` operations started will fail
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// While stalled, writes never complete; clearing the stall lets every
    /// held write complete on the next poll
    pub fn set_stall_writes(&self, stall: bool) {
        self.lock().stall_writes = stall;
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().entries.get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.lock().entries.insert(key.to_string(), value);
    }

    /// Every write applied, in application order
    pub fn write_log(&self) -> Vec<(String, Value)> {
        self.lock().write_log.clone()
    }

    pub fn writes_for(&self, key: &str) -> Vec<Value> {
        self.lock()
            .write_log
            .iter()
            .filter(|(written, _)| written == key)
            .map(|(_, value)| value.clone())
            .collect()
    }

    /// Highest number of writes ever outstanding at once for `key`
    pub fn max_concurrent_writes(&self, key: &str) -> usize {
        self.lock()
            .max_concurrent_writes
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct PendingOp {
    id: StoreOpId,
    op: StoreOp,
    ready_at: ServerTime,
    fail: bool,
}

/// One server's connection to a `MemoryStoreHub`
pub struct MemoryStore {
    hub: MemoryStoreHub,
    pending: Vec<PendingOp>,
}

impl MetadataStore for MemoryStore {
    fn start(&mut self, id: StoreOpId, op: StoreOp, now: ServerTime) {
        let mut state = self.hub.lock();
        let fail = if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            false
        };
        if let StoreOp::Set { key, .. } = &op {
            let in_flight = state.writes_in_flight.entry(key.clone()).or_insert(0);
            *in_flight += 1;
            let in_flight = *in_flight;
            let max = state.max_concurrent_writes.entry(key.clone()).or_insert(0);
            *max = (*max).max(in_flight);
        }
        let ready_at = now + state.latency_ms;
        self.pending.push(PendingOp {
            id,
            op,
            ready_at,
            fail,
        });
    }

    fn poll(&mut self, now: ServerTime) -> Vec<(StoreOpId, Result<StoreReply, StoreError>)> {
        let mut state = self.hub.lock();
        let stall_writes = state.stall_writes;

        let (ready, waiting): (Vec<PendingOp>, Vec<PendingOp>) =
            std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|pending| {
                    pending.ready_at <= now && !(stall_writes && pending.op.is_write())
                });
        self.pending = waiting;

        let mut output = Vec::with_capacity(ready.len());
        for pending in ready {
            if let StoreOp::Set { key, .. } = &pending.op {
                if let Some(in_flight) = state.writes_in_flight.get_mut(key) {
                    *in_flight = in_flight.saturating_sub(1);
                }
            }

            if pending.fail {
                output.push((
                    pending.id,
                    Err(StoreError::Unavailable("injected failure".to_string())),
                ));
                continue;
            }

            let reply = match pending.op {
                StoreOp::Get { key } => StoreReply::Value(state.entries.get(&key).cloned()),
                StoreOp::Set { key, value } => {
                    state.write_log.push((key.clone(), value.clone()));
                    state.entries.insert(key, value);
                    StoreReply::Written
                }
                StoreOp::Search { prefix } => StoreReply::Matches(
                    state
                        .entries
                        .range(prefix.clone()..)
                        .take_while(|(key, _)| key.starts_with(&prefix))
                        .map(|(key, value)| (key.clone(), value.clone()))
                        .collect(),
                ),
            };
            output.push((pending.id, Ok(reply)));
        }
        output
    }
}
