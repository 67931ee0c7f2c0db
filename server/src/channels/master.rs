//! The singleton `master.master` channel.
//!
//! Whichever server registers it first is the master; if its server goes
//! away, the next send to it autocreates it somewhere else. It places
//! channels of `Placement::Master` types on the least-loaded server and
//! hands out the lock auto-destroying channels take before unregistering.
//! Creations and the lock exclude each other: no lock is granted while a
//! creation is in flight, and creations requested while the lock is held
//! wait for its release.

use std::collections::{HashMap, VecDeque};

use log::{debug, info, warn};
use serde_json::{json, Value};

use actorfabric_shared::{
    messages, packet::Payload, ChannelId, ErrorCode, ServerTime, MASTER_CHANNEL_TYPE,
};

use crate::{
    registry::{ChannelType, RegistryError},
    server::LoadReport,
    worker::{ChannelLogic, Inbound, Reply, RequestKey, ResponseHandle, WorkerContext},
};

#[derive(Clone, Debug)]
pub struct MasterConfig {
    /// A lock not released within this long is taken back
    pub lock_lease_ms: u64,
    /// Load reports older than this are not used for placement
    pub load_freshness_ms: u64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            lock_lease_ms: 10_000,
            load_freshness_ms: 30_000,
        }
    }
}

struct LockGrant {
    holder: ChannelId,
    expires_at: ServerTime,
}

struct PendingCreate {
    channel: ChannelId,
    target: ChannelId,
}

pub(crate) struct MasterLogic {
    config: MasterConfig,
    loads: HashMap<ChannelId, (LoadReport, ServerTime)>,
    creating: HashMap<ChannelId, Vec<ResponseHandle>>,
    create_requests: HashMap<RequestKey, PendingCreate>,
    deferred_creates: VecDeque<(ChannelId, ResponseHandle)>,
    lock: Option<LockGrant>,
    lock_waiters: VecDeque<ResponseHandle>,
}

impl MasterLogic {
    fn new(config: MasterConfig) -> Self {
        Self {
            config,
            loads: HashMap::new(),
            creating: HashMap::new(),
            create_requests: HashMap::new(),
            deferred_creates: VecDeque::new(),
            lock: None,
            lock_waiters: VecDeque::new(),
        }
    }

    // Handlers

    fn create_channel(&mut self, ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        let Some(handle) = inbound.response_handle() else {
            return Reply::Err(ErrorCode::BadPayload);
        };
        let Some(channel) = inbound.payload.str_field("channel") else {
            return Reply::Err(ErrorCode::BadPayload);
        };
        let Ok(id) = ChannelId::parse(channel) else {
            return Reply::Err(ErrorCode::InvalidChannelId);
        };
        self.enqueue_create(ctx, id, handle);
        Reply::Deferred
    }

    fn master_lock(&mut self, ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        let Some(handle) = inbound.response_handle() else {
            return Reply::Err(ErrorCode::BadPayload);
        };
        let expires_at = ctx.server_time().saturating_add(self.config.lock_lease_ms);
        if let Some(grant) = self
            .lock
            .as_mut()
            .filter(|grant| grant.holder == inbound.source)
        {
            grant.expires_at = expires_at;
            return Reply::Ack;
        }
        if self.lock.is_none() && self.creating.is_empty() {
            self.lock = Some(LockGrant {
                holder: inbound.source.clone(),
                expires_at,
            });
            return Reply::Ack;
        }
        self.lock_waiters.push_back(handle);
        Reply::Deferred
    }

    fn master_unlock(&mut self, ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        let holds_lock = self
            .lock
            .as_ref()
            .is_some_and(|grant| grant.holder == inbound.source);
        if holds_lock {
            self.lock = None;
        } else {
            // a waiter that gave up
            self.lock_waiters
                .retain(|waiter| waiter.requester() != &inbound.source);
        }
        self.resume(ctx);
        Reply::Ack
    }

    fn load_report(&mut self, ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        let Ok(report) = serde_json::from_value::<LoadReport>(inbound.payload.to_json()) else {
            return Reply::Err(ErrorCode::BadPayload);
        };
        self.loads
            .insert(inbound.source.clone(), (report, ctx.server_time()));
        Reply::Ack
    }

    // Coordination

    fn enqueue_create(
        &mut self,
        ctx: &mut WorkerContext<'_>,
        id: ChannelId,
        handle: ResponseHandle,
    ) {
        if let Some(waiters) = self.creating.get_mut(&id) {
            waiters.push(handle);
            return;
        }
        if self.lock.is_some() {
            self.deferred_creates.push_back((id, handle));
            return;
        }
        let target = self
            .pick_server(ctx.server_time())
            .unwrap_or_else(|| handle.requester().clone());
        debug!("placing {} on {}", id, target);
        let payload = Payload::from(json!({ "channel": id.to_string() }));
        let key = ctx.request(&target, messages::CREATE_WORKER, payload);
        self.create_requests.insert(
            key,
            PendingCreate {
                channel: id.clone(),
                target,
            },
        );
        self.creating.insert(id, vec![handle]);
    }

    /// Least-loaded server with a fresh report
    fn pick_server(&self, now: ServerTime) -> Option<ChannelId> {
        self.loads
            .iter()
            .filter(|(_, (_, at))| now.saturating_sub(*at) <= self.config.load_freshness_ms)
            .min_by(|(a_id, (a, _)), (b_id, (b, _))| {
                a.channels.cmp(&b.channels).then_with(|| a_id.cmp(b_id))
            })
            .map(|(id, _)| id.clone())
    }

    fn resume(&mut self, ctx: &mut WorkerContext<'_>) {
        if self.lock.is_some() {
            return;
        }
        while let Some((id, handle)) = self.deferred_creates.pop_front() {
            self.enqueue_create(ctx, id, handle);
        }
        self.pump_lock(ctx);
    }

    fn pump_lock(&mut self, ctx: &mut WorkerContext<'_>) {
        if self.lock.is_some() || !self.creating.is_empty() {
            return;
        }
        let Some(waiter) = self.lock_waiters.pop_front() else {
            return;
        };
        self.lock = Some(LockGrant {
            holder: waiter.requester().clone(),
            expires_at: ctx.server_time().saturating_add(self.config.lock_lease_ms),
        });
        ctx.respond(waiter, Ok(Value::Null));
    }
}

impl ChannelLogic for MasterLogic {
    fn on_create(&mut self, ctx: &mut WorkerContext<'_>) {
        info!("{} elected", ctx.channel_id());
        ctx.send(
            &ChannelId::server_broadcast(),
            messages::REPORT_LOAD,
            Payload::Empty,
        );
    }

    fn on_tick(&mut self, ctx: &mut WorkerContext<'_>) {
        let now = ctx.server_time();
        let expired = self
            .lock
            .as_ref()
            .filter(|grant| grant.expires_at <= now)
            .map(|grant| grant.holder.clone());
        if let Some(holder) = expired {
            warn!("master lock held by {} expired", holder);
            self.lock = None;
            self.resume(ctx);
        }
    }

    fn on_response(
        &mut self,
        ctx: &mut WorkerContext<'_>,
        key: RequestKey,
        result: Result<Value, ErrorCode>,
    ) {
        let Some(pending) = self.create_requests.remove(&key) else {
            return;
        };
        let waiters = self.creating.remove(&pending.channel).unwrap_or_default();
        let outcome = match result {
            Ok(_) | Err(ErrorCode::AlreadyExists) => Ok(Value::Null),
            Err(code) => {
                warn!(
                    "creating {} on {} failed: {}",
                    pending.channel, pending.target, code
                );
                if code.is_transient() {
                    self.loads.remove(&pending.target);
                }
                Err(code)
            }
        };
        for waiter in waiters {
            ctx.respond(waiter, outcome.clone());
        }
        self.pump_lock(ctx);
    }
}

pub(crate) fn channel_type(
    config: MasterConfig,
) -> Result<ChannelType<MasterLogic>, RegistryError> {
    Ok(
        ChannelType::new(MASTER_CHANNEL_TYPE, move |_| MasterLogic::new(config.clone()))
            .autocreate()
            .subid_pattern("^master$")?
            .volatile()
            .auto_destroy(false)
            .handler(messages::CREATE_CHANNEL, MasterLogic::create_channel)
            .handler(messages::MASTER_LOCK, MasterLogic::master_lock)
            .handler(messages::MASTER_UNLOCK, MasterLogic::master_unlock)
            .handler(messages::LOAD_REPORT, MasterLogic::load_report),
    )
}
