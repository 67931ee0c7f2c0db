use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use serde_json::{json, Value};

use actorfabric_shared::{
    get_path, messages,
    packet::{Opcode, Packet, Payload},
    set_path, ChannelId, DataKey, DataRoot, ErrorCode, FieldFilter, PingCount, RequestId,
    SequenceNumber, ServerTime, BROADCAST_CHANNEL_TYPE,
};

use crate::registry::{ChannelOptions, Persistence};

use super::{
    channel_data::{encode_apply_payload, DataOp},
    handlers::ResponseHandle,
    lifecycle::Lifecycle,
    requests::{PendingRequest, RequestKey, RequestPurpose, RequestTable},
    sequencing::{InboundSequencer, OutboundSequencer},
    WorkerConfig,
};

/// What the server does when a packet's destination is not registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MissingPolicy {
    /// Create the destination if its type allows it, then deliver
    Autocreate,
    /// Give up quietly; the sender forgets the destination as a subscriber
    Drop,
}

#[derive(Debug, Clone)]
pub(crate) struct Outgoing {
    pub dest: ChannelId,
    pub packet: Packet,
    pub missing: MissingPolicy,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    pub now: ServerTime,
    pub ping_count: PingCount,
}

pub(crate) struct WorkerInit {
    pub config: WorkerConfig,
    pub request_timeout_ms: u64,
    pub seed: u64,
    /// Persisted `{"public": .., "private": ..}` document, if one was loaded
    pub state: Option<Value>,
    pub now: ServerTime,
}

/// Requests a worker makes of the server hosting it
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WorkerEffect {
    Persist { value: Value },
    Unregister,
    Destroyed,
    CreateLocal {
        id: ChannelId,
        waiter: Option<ResponseHandle>,
    },
    CreationResolved {
        id: ChannelId,
        result: Result<(), ErrorCode>,
    },
    ReportLoad,
    StoreFailure { reason: String },
    Search { key: RequestKey, prefix: String },
}

/// State every channel worker has regardless of its logic
pub(crate) struct WorkerCore {
    pub(super) id: ChannelId,
    pub(super) options: ChannelOptions,
    pub(super) config: WorkerConfig,
    request_timeout_ms: u64,
    pub(super) now: ServerTime,
    pub(super) ping_count: PingCount,
    pub(super) rng: fastrand::Rng,

    pub(super) data: Value,
    pub(super) identity: Option<Value>,
    pub(super) subscribers: HashMap<ChannelId, FieldFilter>,
    /// Mirrors of the public data of channels this one subscribed to
    pub(super) subscriptions: HashMap<ChannelId, Value>,

    pub(super) outbound: OutboundSequencer,
    pub(super) inbound: InboundSequencer<(ChannelId, Packet)>,
    pub(super) requests: RequestTable,
    /// Store searches whose results have not come back
    pub(super) searches: HashSet<RequestKey>,
    pub(super) lifecycle: Lifecycle,
    registered: bool,
    queued_sends: Vec<Outgoing>,
    outbox: Vec<Outgoing>,
    effects: Vec<WorkerEffect>,

    dirty_since: Option<ServerTime>,
    commit_in_flight: bool,
    changed_keys: Vec<DataKey>,
    batch: Vec<DataOp>,
    batch_depth: u32,
    pub(super) last_activity: ServerTime,
}

impl WorkerCore {
    pub fn new(id: ChannelId, options: ChannelOptions, init: WorkerInit) -> Self {
        Self {
            id,
            options,
            config: init.config,
            request_timeout_ms: init.request_timeout_ms,
            now: init.now,
            ping_count: 0,
            rng: fastrand::Rng::with_seed(init.seed),

            data: initial_data(init.state),
            identity: None,
            subscribers: HashMap::new(),
            subscriptions: HashMap::new(),

            outbound: OutboundSequencer::new(),
            inbound: InboundSequencer::new(),
            requests: RequestTable::new(),
            searches: HashSet::new(),
            lifecycle: Lifecycle::new(),
            registered: false,
            queued_sends: Vec::new(),
            outbox: Vec::new(),
            effects: Vec::new(),

            dirty_since: None,
            commit_in_flight: false,
            changed_keys: Vec::new(),
            batch: Vec::new(),
            batch_depth: 0,
            last_activity: init.now,
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn public(&self) -> &Value {
        &self.data[DataRoot::Public.as_str()]
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_live(&self) -> bool {
        self.lifecycle.is_live()
    }

    pub fn buffered_packets(&self) -> usize {
        self.inbound.buffered()
    }

    pub fn recoveries(&self) -> u64 {
        self.inbound.recoveries()
    }

    pub(super) fn set_clock(&mut self, clock: Clock) {
        self.now = clock.now;
        self.ping_count = clock.ping_count;
    }

    pub fn take_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    pub fn take_effects(&mut self) -> Vec<WorkerEffect> {
        std::mem::take(&mut self.effects)
    }

    pub(super) fn push_effect(&mut self, effect: WorkerEffect) {
        self.effects.push(effect);
    }

    /// The exchange confirmed our receiver; release what was sent before
    pub(super) fn mark_registered(&mut self) {
        self.registered = true;
        self.outbox.append(&mut self.queued_sends);
    }

    // Sending

    pub(super) fn send_packet(
        &mut self,
        dest: &ChannelId,
        opcode: Opcode,
        payload: Payload,
        request_id: Option<RequestId>,
        expects_ack: bool,
        missing: MissingPolicy,
    ) -> SequenceNumber {
        let (sequence, new_generation) = self.outbound.next(
            dest,
            expects_ack,
            self.now,
            self.config.max_noack_ms,
            &mut self.rng,
        );
        let mut packet = Packet::new(self.id.clone(), opcode, payload);
        packet.sequence = sequence;
        // broadcast subscribers come and go, so each broadcast stands alone
        packet.new_generation = new_generation || dest.kind() == BROADCAST_CHANNEL_TYPE;
        packet.identity = self.identity.clone();
        packet.request_id = request_id;

        let outgoing = Outgoing {
            dest: dest.clone(),
            packet,
            missing,
        };
        if self.registered {
            self.outbox.push(outgoing);
        } else {
            self.queued_sends.push(outgoing);
        }
        sequence
    }

    pub(super) fn send_message(&mut self, dest: &ChannelId, message: &str, payload: Payload) {
        let missing = missing_policy(dest);
        self.send_packet(dest, Opcode::message(message), payload, None, false, missing);
    }

    pub(super) fn request(
        &mut self,
        dest: &ChannelId,
        message: &str,
        payload: Payload,
        purpose: RequestPurpose,
    ) -> RequestKey {
        let key = self.requests.next_key();
        let missing = missing_policy(dest);
        let sequence = self.send_packet(
            dest,
            Opcode::message(message),
            payload,
            Some(key.id()),
            true,
            missing,
        );
        self.requests.insert(
            key,
            PendingRequest {
                dest: dest.clone(),
                sequence,
                deadline: self.now.saturating_add(self.request_timeout_ms),
                purpose,
            },
        );
        key
    }

    pub(super) fn respond(&mut self, handle: ResponseHandle, result: Result<Value, ErrorCode>) {
        let (opcode, payload) = match result {
            Ok(value) => (Opcode::Ack, Payload::from(value)),
            Err(code) => (Opcode::Err, Payload::Json(Value::from(code.as_str()))),
        };
        self.send_packet(
            &handle.to,
            opcode,
            payload,
            Some(handle.request_id),
            false,
            MissingPolicy::Drop,
        );
    }

    pub(super) fn send_unlock(&mut self) {
        self.send_packet(
            &ChannelId::master(),
            Opcode::message(messages::MASTER_UNLOCK),
            Payload::Empty,
            None,
            false,
            MissingPolicy::Drop,
        );
    }

    /// A push could not be delivered because `dest` no longer exists
    pub(super) fn peer_missing(&mut self, dest: &ChannelId) {
        if self.subscribers.remove(dest).is_some() {
            debug!("{} dropped subscriber {}: it no longer exists", self.id, dest);
        }
    }

    // Data

    pub(super) fn data_at(&self, key: &DataKey) -> Option<&Value> {
        get_path(&self.data[key.root().as_str()], key.path())
    }

    /// Applies one change. Public changes reach subscribers whose filter
    /// includes the top-level key, immediately or when the open batch ends.
    pub(super) fn write_data(&mut self, key: &DataKey, value: Option<Value>) {
        let mut path = Vec::with_capacity(key.path().len() + 1);
        path.push(key.root().as_str().to_string());
        path.extend(key.path().iter().cloned());
        set_path(&mut self.data, &path, value.clone());

        self.changed_keys.push(key.clone());
        if key.is_public() {
            let op = DataOp {
                key: key.relative(),
                value,
            };
            if self.batch_depth > 0 {
                self.batch.push(op);
            } else {
                self.broadcast_ops(&[op]);
            }
        }
        self.mark_dirty();
    }

    pub(super) fn begin_batch(&mut self) {
        self.batch_depth += 1;
    }

    pub(super) fn end_batch(&mut self) {
        if self.batch_depth == 0 {
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth == 0 && !self.batch.is_empty() {
            let ops = std::mem::take(&mut self.batch);
            self.broadcast_ops(&ops);
        }
    }

    fn broadcast_ops(&mut self, ops: &[DataOp]) {
        let pushes: Vec<(ChannelId, Vec<DataOp>)> = self
            .subscribers
            .iter()
            .filter_map(|(subscriber, filter)| {
                let visible: Vec<DataOp> = ops
                    .iter()
                    .filter(|op| filter.includes(op.top_level()))
                    .cloned()
                    .collect();
                (!visible.is_empty()).then(|| (subscriber.clone(), visible))
            })
            .collect();
        for (subscriber, visible) in pushes {
            let payload = Payload::Json(encode_apply_payload(&visible));
            self.send_packet(
                &subscriber,
                Opcode::message(messages::APPLY_CHANNEL_DATA),
                payload,
                None,
                false,
                MissingPolicy::Drop,
            );
        }
    }

    pub(super) fn take_changed_keys(&mut self) -> Vec<DataKey> {
        std::mem::take(&mut self.changed_keys)
    }

    fn mark_dirty(&mut self) {
        if self.options.persistence == Persistence::Persisted && self.dirty_since.is_none() {
            self.dirty_since = Some(self.now);
        }
    }

    pub(super) fn is_dirty(&self) -> bool {
        self.dirty_since.is_some() || self.commit_in_flight
    }

    /// Hands dirty data to the server for writing once it has sat for
    /// `commit_delay_ms`, or right away when `force` is set. One commit is
    /// in flight at a time.
    pub(super) fn commit(&mut self, force: bool) {
        let Some(since) = self.dirty_since else {
            return;
        };
        if self.commit_in_flight {
            return;
        }
        if !force && self.now.saturating_sub(since) < self.config.commit_delay_ms {
            return;
        }
        self.dirty_since = None;
        self.commit_in_flight = true;
        let value = self.data.clone();
        self.effects.push(WorkerEffect::Persist { value });
    }

    pub(super) fn commit_done(&mut self, retry: bool) {
        self.commit_in_flight = false;
        if retry {
            warn!("commit for {} timed out; it will be written again", self.id);
            self.mark_dirty();
        }
    }

    // Lifecycle

    /// Whether nothing would be lost or left hanging by destroying this
    /// worker now
    pub(super) fn destroy_eligible(&self) -> bool {
        let lock_request = self
            .lifecycle
            .lock_key()
            .filter(|key| self.requests.contains(*key))
            .map_or(0, |_| 1);
        self.options.auto_destroy
            && self.registered
            && self.lifecycle.is_live()
            && !self.lifecycle.shutdown_requested()
            && self.subscribers.is_empty()
            && self.inbound.buffered() == 0
            && self.requests.len() == lock_request
            && self.searches.is_empty()
            && !self.is_dirty()
            && self.queued_sends.is_empty()
            && self.now.saturating_sub(self.last_activity) >= self.config.destroy_idle_ms
    }
}

fn missing_policy(dest: &ChannelId) -> MissingPolicy {
    if dest.kind() == BROADCAST_CHANNEL_TYPE {
        MissingPolicy::Drop
    } else {
        MissingPolicy::Autocreate
    }
}

fn initial_data(state: Option<Value>) -> Value {
    let mut data = json!({ "public": {}, "private": {} });
    let Some(Value::Object(mut loaded)) = state else {
        return data;
    };
    for root in [DataRoot::Public, DataRoot::Private] {
        if let Some(Value::Object(map)) = loaded.remove(root.as_str()) {
            data[root.as_str()] = Value::Object(map);
        }
    }
    data
}
