use std::{collections::HashMap, mem};

use log::{debug, error, warn};
use serde_json::Value;

use actorfabric_shared::{
    store::{MetadataStore, StoreError, StoreOp, StoreOpId, StoreReply},
    ServerTime,
};

use super::{ShieldConfig, ShieldError, ShieldMetrics};

pub type ShieldTicket = u64;

/// The outcome of a call made through the shield
#[derive(Debug, Clone, PartialEq)]
pub struct ShieldCompletion {
    pub ticket: ShieldTicket,
    pub result: Result<StoreReply, ShieldError>,
}

#[derive(Clone, Copy)]
enum Phase {
    InFlight,
    Backoff { retry_at: ServerTime },
}

struct ReadOp {
    op: StoreOp,
    attempts: u32,
    phase: Phase,
}

struct WriteOp {
    value: Value,
    tickets: Vec<ShieldTicket>,
    attempts: u32,
    phase: Phase,
}

struct QueuedWrite {
    value: Value,
    tickets: Vec<ShieldTicket>,
}

#[derive(Default)]
struct WriteSlot {
    current: Option<WriteOp>,
    queued: Option<QueuedWrite>,
    /// A timed-out write the store never answered; the key stays blocked
    /// until it does, or until its abandoned entry expires
    zombie: Option<StoreOpId>,
}

impl WriteSlot {
    fn is_idle(&self) -> bool {
        self.current.is_none() && self.zombie.is_none()
    }

    fn is_empty(&self) -> bool {
        self.is_idle() && self.queued.is_none()
    }
}

#[derive(Clone)]
enum Owner {
    Read(ShieldTicket),
    Write(String),
}

struct Outstanding {
    owner: Owner,
    deadline: ServerTime,
}

struct Abandoned {
    key: String,
    write: bool,
    expires_at: ServerTime,
}

/// Wraps a `MetadataStore` with per-call timeouts, bounded retries with
/// quadratic backoff, and single-flight writes per key.
///
/// While a write for a key is outstanding, newer writes for that key wait;
/// each newer one replaces the waiting value, so the store only ever sees
/// the latest value next and never two concurrent writes for one key.
pub struct DataStoreShield {
    store: Box<dyn MetadataStore>,
    config: ShieldConfig,
    next_ticket: ShieldTicket,
    next_store_id: StoreOpId,
    reads: HashMap<ShieldTicket, ReadOp>,
    writes: HashMap<String, WriteSlot>,
    outstanding: HashMap<StoreOpId, Outstanding>,
    abandoned: HashMap<StoreOpId, Abandoned>,
    completions: Vec<ShieldCompletion>,
    metrics: ShieldMetrics,
}

impl DataStoreShield {
    pub fn new(store: Box<dyn MetadataStore>, config: ShieldConfig) -> Self {
        Self {
            store,
            config,
            next_ticket: 0,
            next_store_id: 0,
            reads: HashMap::new(),
            writes: HashMap::new(),
            outstanding: HashMap::new(),
            abandoned: HashMap::new(),
            completions: Vec::new(),
            metrics: ShieldMetrics::default(),
        }
    }

    pub fn get(&mut self, key: &str, now: ServerTime) -> ShieldTicket {
        self.read(StoreOp::Get { key: key.to_string() }, now)
    }

    pub fn search(&mut self, prefix: &str, now: ServerTime) -> ShieldTicket {
        self.read(
            StoreOp::Search {
                prefix: prefix.to_string(),
            },
            now,
        )
    }

    pub fn set(&mut self, key: &str, value: Value, now: ServerTime) -> ShieldTicket {
        let ticket = self.ticket();
        let slot = self.writes.entry(key.to_string()).or_default();

        if slot.is_idle() {
            slot.current = Some(WriteOp {
                value,
                tickets: vec![ticket],
                attempts: 0,
                phase: Phase::InFlight,
            });
            self.launch_write(key, now);
            return ticket;
        }

        match slot.queued.as_mut() {
            Some(queued) => {
                queued.value = value;
                queued.tickets.push(ticket);
                self.metrics.superseded += 1;
            }
            None => {
                slot.queued = Some(QueuedWrite {
                    value,
                    tickets: vec![ticket],
                });
            }
        }
        ticket
    }

    /// Advances every outstanding call and returns the ones that finished
    pub fn poll(&mut self, now: ServerTime) -> Vec<ShieldCompletion> {
        for (store_id, result) in self.store.poll(now) {
            self.on_store_result(store_id, result, now);
        }

        self.expire_timeouts(now);
        self.expire_abandoned(now);
        self.launch_due_retries(now);

        self.writes.retain(|_, slot| !slot.is_empty());
        self.metrics.in_flight = self.outstanding.len() as u64;
        mem::take(&mut self.completions)
    }

    pub fn metrics(&self) -> &ShieldMetrics {
        &self.metrics
    }

    /// Whether a write for `key` is outstanding, backing off, queued, or
    /// blocked behind a timed-out one
    pub fn has_pending_write(&self, key: &str) -> bool {
        self.writes.contains_key(key)
    }

    pub fn is_idle(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    // Private

    fn ticket(&mut self) -> ShieldTicket {
        self.next_ticket = self.next_ticket.wrapping_add(1);
        self.next_ticket
    }

    fn store_id(&mut self) -> StoreOpId {
        self.next_store_id = self.next_store_id.wrapping_add(1);
        self.next_store_id
    }

    fn read(&mut self, op: StoreOp, now: ServerTime) -> ShieldTicket {
        let ticket = self.ticket();
        self.reads.insert(
            ticket,
            ReadOp {
                op,
                attempts: 0,
                phase: Phase::InFlight,
            },
        );
        self.launch_read(ticket, now);
        ticket
    }

    fn launch_read(&mut self, ticket: ShieldTicket, now: ServerTime) {
        let store_id = self.store_id();
        let Some(read) = self.reads.get_mut(&ticket) else {
            return;
        };
        read.attempts += 1;
        read.phase = Phase::InFlight;
        self.store.start(store_id, read.op.clone(), now);
        self.outstanding.insert(
            store_id,
            Outstanding {
                owner: Owner::Read(ticket),
                deadline: now + self.config.read_timeout_ms,
            },
        );
        self.metrics.attempts += 1;
    }

    fn launch_write(&mut self, key: &str, now: ServerTime) {
        let store_id = self.store_id();
        let Some(write) = self
            .writes
            .get_mut(key)
            .and_then(|slot| slot.current.as_mut())
        else {
            return;
        };
        write.attempts += 1;
        write.phase = Phase::InFlight;
        self.store.start(
            store_id,
            StoreOp::Set {
                key: key.to_string(),
                value: write.value.clone(),
            },
            now,
        );
        self.outstanding.insert(
            store_id,
            Outstanding {
                owner: Owner::Write(key.to_string()),
                deadline: now + self.config.write_timeout_ms,
            },
        );
        self.metrics.attempts += 1;
    }

    /// Promotes the queued write for `key`, if the key is free
    fn start_next_write(&mut self, key: &str, now: ServerTime) {
        let Some(slot) = self.writes.get_mut(key) else {
            return;
        };
        if !slot.is_idle() {
            return;
        }
        let Some(queued) = slot.queued.take() else {
            return;
        };
        slot.current = Some(WriteOp {
            value: queued.value,
            tickets: queued.tickets,
            attempts: 0,
            phase: Phase::InFlight,
        });
        self.launch_write(key, now);
    }

    fn complete(&mut self, tickets: Vec<ShieldTicket>, result: Result<StoreReply, ShieldError>) {
        for ticket in tickets {
            self.completions.push(ShieldCompletion {
                ticket,
                result: result.clone(),
            });
        }
    }

    fn on_store_result(
        &mut self,
        store_id: StoreOpId,
        result: Result<StoreReply, StoreError>,
        now: ServerTime,
    ) {
        let Some(outstanding) = self.outstanding.remove(&store_id) else {
            self.on_late_result(store_id, now);
            return;
        };

        if let Err(err) = &result {
            warn!("store call failed: {}", err);
            self.metrics.errors += 1;
        }

        match (outstanding.owner, result) {
            (Owner::Read(ticket), Ok(reply)) => {
                self.reads.remove(&ticket);
                self.complete(vec![ticket], Ok(reply));
            }
            (Owner::Read(ticket), Err(_)) => self.retry_read(ticket, now),
            (Owner::Write(key), Ok(reply)) => {
                let tickets = self
                    .writes
                    .get_mut(&key)
                    .and_then(|slot| slot.current.take())
                    .map(|write| write.tickets)
                    .unwrap_or_default();
                self.complete(tickets, Ok(reply));
                self.start_next_write(&key, now);
            }
            (Owner::Write(key), Err(_)) => self.retry_write(&key, now),
        }
    }

    fn on_late_result(&mut self, store_id: StoreOpId, now: ServerTime) {
        let Some(abandoned) = self.abandoned.remove(&store_id) else {
            warn!("store answered unknown call {}", store_id);
            return;
        };
        self.metrics.late_callbacks += 1;
        error!(
            "store answered {} for `{}` after the shield timed it out; caller was already told it failed",
            if abandoned.write { "a write" } else { "a read" },
            abandoned.key
        );
        if !abandoned.write {
            return;
        }
        self.unblock_write(&abandoned.key, store_id, now);
    }

    fn unblock_write(&mut self, key: &str, store_id: StoreOpId, now: ServerTime) {
        let Some(slot) = self.writes.get_mut(key) else {
            return;
        };
        if slot.zombie != Some(store_id) {
            return;
        }
        slot.zombie = None;
        self.start_next_write(key, now);
    }

    fn retry_read(&mut self, ticket: ShieldTicket, now: ServerTime) {
        let Some(read) = self.reads.get_mut(&ticket) else {
            return;
        };
        if read.attempts > self.config.max_retries {
            let key = read.op.key().to_string();
            let attempts = read.attempts;
            self.reads.remove(&ticket);
            self.complete(vec![ticket], Err(ShieldError::RetriesExhausted { key, attempts }));
            return;
        }
        read.phase = Phase::Backoff {
            retry_at: now + self.config.backoff(read.attempts),
        };
        self.metrics.retries += 1;
    }

    fn retry_write(&mut self, key: &str, now: ServerTime) {
        let Some(slot) = self.writes.get_mut(key) else {
            return;
        };
        let Some(write) = slot.current.as_mut() else {
            return;
        };
        // a newer value makes retrying the old one pointless
        if let Some(queued) = slot.queued.take() {
            write.value = queued.value;
            write.tickets.extend(queued.tickets);
        }
        if write.attempts > self.config.max_retries {
            let attempts = write.attempts;
            let tickets = mem::take(&mut write.tickets);
            slot.current = None;
            self.complete(
                tickets,
                Err(ShieldError::RetriesExhausted {
                    key: key.to_string(),
                    attempts,
                }),
            );
            self.start_next_write(key, now);
            return;
        }
        write.phase = Phase::Backoff {
            retry_at: now + self.config.backoff(write.attempts),
        };
        self.metrics.retries += 1;
    }

    fn expire_timeouts(&mut self, now: ServerTime) {
        let expired: Vec<StoreOpId> = self
            .outstanding
            .iter()
            .filter(|(_, outstanding)| outstanding.deadline <= now)
            .map(|(store_id, _)| *store_id)
            .collect();

        for store_id in expired {
            let Some(outstanding) = self.outstanding.remove(&store_id) else {
                continue;
            };
            self.metrics.timeouts += 1;
            match outstanding.owner {
                Owner::Read(ticket) => {
                    let key = self
                        .reads
                        .get(&ticket)
                        .map(|read| read.op.key().to_string())
                        .unwrap_or_default();
                    warn!("store read for `{}` timed out", key);
                    let expires_at = now + self.config.zombie_write_expiry_ms;
                    self.abandoned.insert(
                        store_id,
                        Abandoned {
                            key,
                            write: false,
                            expires_at,
                        },
                    );
                    self.retry_read(ticket, now);
                }
                Owner::Write(key) => {
                    error!(
                        "store write for `{}` timed out; it may still land, key blocked until it answers",
                        key
                    );
                    let expires_at = now + self.config.zombie_write_expiry_ms;
                    let mut tickets = Vec::new();
                    if let Some(slot) = self.writes.get_mut(&key) {
                        slot.zombie = Some(store_id);
                        if let Some(write) = slot.current.take() {
                            tickets = write.tickets;
                        }
                    }
                    self.complete(tickets, Err(ShieldError::Timeout));
                    self.abandoned.insert(
                        store_id,
                        Abandoned {
                            key,
                            write: true,
                            expires_at,
                        },
                    );
                }
            }
        }
    }

    /// Forgets timed-out calls the store never answered; a forgotten write
    /// releases its key
    fn expire_abandoned(&mut self, now: ServerTime) {
        let expired: Vec<StoreOpId> = self
            .abandoned
            .iter()
            .filter(|(_, abandoned)| abandoned.expires_at <= now)
            .map(|(store_id, _)| *store_id)
            .collect();
        for store_id in expired {
            let Some(abandoned) = self.abandoned.remove(&store_id) else {
                continue;
            };
            if !abandoned.write {
                debug!("store never answered timed-out read for `{}`", abandoned.key);
                continue;
            }
            warn!(
                "store never answered timed-out write for `{}`; unblocking key",
                abandoned.key
            );
            self.unblock_write(&abandoned.key, store_id, now);
        }
    }

    fn launch_due_retries(&mut self, now: ServerTime) {
        let due_reads: Vec<ShieldTicket> = self
            .reads
            .iter()
            .filter(|(_, read)| {
                matches!(read.phase, Phase::Backoff { retry_at } if retry_at <= now)
            })
            .map(|(ticket, _)| *ticket)
            .collect();
        for ticket in due_reads {
            self.launch_read(ticket, now);
        }

        let due_writes: Vec<String> = self
            .writes
            .iter()
            .filter(|(_, slot)| {
                matches!(
                    slot.current.as_ref().map(|write| write.phase),
                    Some(Phase::Backoff { retry_at }) if retry_at <= now
                )
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in due_writes {
            self.launch_write(&key, now);
        }
    }
}
