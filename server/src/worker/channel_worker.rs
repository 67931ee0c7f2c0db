use std::{any::Any, sync::Arc};

use log::{debug, error, info, trace, warn};
use serde_json::Value;

use actorfabric_shared::{
    messages,
    packet::{Opcode, Packet, Payload},
    ChannelId, ErrorCode, FieldFilter, RequestId,
};

use crate::shield::ShieldError;

use super::{
    channel_data::ChannelDataUpdate,
    handlers::{HandlerTable, Inbound, Lookup, Reply},
    requests::{RequestKey, RequestPurpose},
    system_message::SystemMessage,
    worker_core::{Clock, MissingPolicy, WorkerCore, WorkerEffect},
    ChannelLogic, WorkerContext,
};

/// Object-safe face of a worker, as held by the channel server
pub(crate) trait AnyWorker {
    fn core(&self) -> &WorkerCore;
    fn core_mut(&mut self) -> &mut WorkerCore;
    /// Runs `on_create` and releases anything it sent
    fn create(&mut self, clock: Clock);
    /// Feeds one packet through sequencing. Only live workers take packets;
    /// the server re-routes the rest to the channel's next incarnation.
    fn receive(&mut self, clock: Clock, addressed: ChannelId, packet: Packet);
    fn tick(&mut self, clock: Clock);
    /// A request this worker sent could not be delivered
    fn fail_request(&mut self, clock: Clock, request_id: RequestId, code: ErrorCode);
    fn peer_missing(&mut self, dest: &ChannelId);
    /// The receiver is gone from the exchange; wind down
    fn finalize(&mut self, clock: Clock);
    fn commit_finished(&mut self, clock: Clock, result: Result<(), ShieldError>);
    fn search_finished(
        &mut self,
        clock: Clock,
        key: RequestKey,
        result: Result<Vec<(String, Value)>, ErrorCode>,
    );
    fn with_logic(
        &mut self,
        clock: Clock,
        f: &mut dyn FnMut(&mut dyn Any, &mut WorkerContext<'_>),
    );
}

pub(crate) struct ChannelWorker<L: ChannelLogic> {
    core: WorkerCore,
    logic: L,
    handlers: Arc<HandlerTable<L>>,
}

impl<L: ChannelLogic> ChannelWorker<L> {
    pub fn new(core: WorkerCore, logic: L, handlers: Arc<HandlerTable<L>>) -> Self {
        Self {
            core,
            logic,
            handlers,
        }
    }

    fn dispatch(&mut self, addressed: ChannelId, packet: Packet) {
        if packet.is_response() {
            self.handle_response(packet);
            return;
        }
        let Opcode::Message(message) = packet.opcode else {
            return;
        };
        self.core.last_activity = self.core.now;
        let inbound = Inbound {
            source: packet.source,
            addressed,
            identity: packet.identity,
            message,
            request_id: packet.request_id,
            payload: packet.payload,
        };

        let reply = match SystemMessage::parse(&inbound.message, &inbound.payload) {
            Some(Ok(system)) => self.handle_system(system, &inbound),
            Some(Err(code)) => Reply::Err(code),
            None => self.handle_user(&inbound),
        };

        match (inbound.response_handle(), reply.into_result()) {
            (Some(handle), Some(result)) => self.core.respond(handle, result),
            (None, Some(Err(code))) => debug!(
                "{} from {} to {} failed: {}",
                inbound.message, inbound.source, self.core.id, code
            ),
            _ => {}
        }
    }

    fn handle_user(&mut self, inbound: &Inbound) -> Reply {
        let mut ctx = WorkerContext::new(&mut self.core);
        match self.handlers.lookup(&inbound.source, &inbound.message) {
            Lookup::Handler(handler) => handler(&mut self.logic, &mut ctx, inbound),
            Lookup::NotAllowed => {
                warn!(
                    "{} may not send {} to {}",
                    inbound.source, inbound.message, ctx.channel_id()
                );
                Reply::Err(ErrorCode::NotAllowed)
            }
            Lookup::Missing => self.logic.on_unhandled(&mut ctx, inbound),
        }
    }

    fn handle_system(&mut self, system: SystemMessage, inbound: &Inbound) -> Reply {
        match system {
            SystemMessage::Subscribe { fields } => self.accept_subscriber(inbound, fields),
            SystemMessage::Unsubscribe => {
                if self.core.subscribers.remove(&inbound.source).is_none() {
                    return Reply::Err(ErrorCode::NotSubscribed);
                }
                let mut ctx = WorkerContext::new(&mut self.core);
                self.logic.on_unsubscribe(&mut ctx, &inbound.source);
                Reply::Ack
            }
            SystemMessage::ChannelData { fields } => Reply::Ok(fields.snapshot(self.core.public())),
            SystemMessage::SetChannelData { key, value } => {
                if !self.logic.allow_remote_write(inbound, &key) {
                    return Reply::Err(ErrorCode::NotAllowed);
                }
                self.core.write_data(&key, value);
                Reply::Ack
            }
            SystemMessage::SetChannelDataIf {
                key,
                value,
                expected,
            } => {
                if !self.logic.allow_remote_write(inbound, &key) {
                    return Reply::Err(ErrorCode::NotAllowed);
                }
                if self.core.data_at(&key) != expected.as_ref() {
                    return Reply::Err(ErrorCode::Mismatch);
                }
                self.core.write_data(&key, value);
                Reply::Ack
            }
            SystemMessage::ApplyChannelData(ops) => {
                let Some(mirror) = self.core.subscriptions.get_mut(&inbound.source) else {
                    trace!(
                        "{} ignoring data from {}: not subscribed",
                        self.core.id,
                        inbound.source
                    );
                    return Reply::Ack;
                };
                for op in &ops {
                    op.apply_to(mirror);
                }
                let mut ctx = WorkerContext::new(&mut self.core);
                self.logic
                    .on_channel_data(&mut ctx, &inbound.source, &ChannelDataUpdate::Ops(ops));
                Reply::Ack
            }
        }
    }

    fn accept_subscriber(&mut self, inbound: &Inbound, fields: FieldFilter) -> Reply {
        if self.core.options.require_login && inbound.user_id().is_none() {
            return Reply::Err(ErrorCode::LoginRequired);
        }
        if self.core.subscribers.contains_key(&inbound.source) {
            return Reply::Err(ErrorCode::AlreadySubscribed);
        }
        let mut ctx = WorkerContext::new(&mut self.core);
        if let Err(code) = self.logic.on_subscribe(&mut ctx, inbound, &fields) {
            return Reply::Err(code);
        }
        let snapshot = fields.snapshot(self.core.public());
        self.core.subscribers.insert(inbound.source.clone(), fields);
        Reply::Ok(snapshot)
    }

    fn handle_response(&mut self, packet: Packet) {
        let Some(request_id) = packet.request_id else {
            return;
        };
        let Some((key, pending)) = self.core.requests.take_response(&packet.source, request_id)
        else {
            debug!(
                "{} got an unmatched response {} from {}",
                self.core.id, request_id, packet.source
            );
            return;
        };
        self.core.outbound.acknowledge(&pending.dest, pending.sequence);
        let result = match packet.opcode {
            Opcode::Err => Err(packet
                .payload
                .json()
                .and_then(Value::as_str)
                .and_then(|code| code.parse().ok())
                .unwrap_or(ErrorCode::BadPayload)),
            _ => Ok(packet.payload.to_json()),
        };
        self.resolve(key, pending.purpose, result);
    }

    fn resolve(
        &mut self,
        key: RequestKey,
        purpose: RequestPurpose,
        result: Result<Value, ErrorCode>,
    ) {
        if let RequestPurpose::MasterLock = purpose {
            self.lock_resolved(key, result);
            return;
        }
        self.core.last_activity = self.core.now;
        if let (RequestPurpose::Subscribe(dest), Ok(snapshot)) = (&purpose, &result) {
            self.core.subscriptions.insert(dest.clone(), snapshot.clone());
            let mut ctx = WorkerContext::new(&mut self.core);
            let update = ChannelDataUpdate::Snapshot(snapshot.clone());
            self.logic.on_channel_data(&mut ctx, dest, &update);
        }
        let mut ctx = WorkerContext::new(&mut self.core);
        self.logic.on_response(&mut ctx, key, result);
    }

    fn lock_resolved(&mut self, key: RequestKey, result: Result<Value, ErrorCode>) {
        if self.core.lifecycle.lock_key() != Some(key) {
            return;
        }
        match result {
            Ok(_) if self.core.destroy_eligible() => {
                info!("{} is idle; destroying", self.core.id);
                self.core.lifecycle.start_unregistering(true);
                self.core.push_effect(WorkerEffect::Unregister);
            }
            Ok(_) => {
                debug!("{} became busy while locking; staying", self.core.id);
                self.core.lifecycle.abort();
                self.core.send_unlock();
            }
            Err(code) => {
                warn!("{} could not take the master lock: {}", self.core.id, code);
                let retry_at = self.core.now.saturating_add(self.core.config.destroy_idle_ms);
                self.core.lifecycle.lock_failed(retry_at);
                self.core.send_unlock();
            }
        }
    }

    fn notify_data_changed(&mut self) {
        let keys = self.core.take_changed_keys();
        if keys.is_empty() {
            return;
        }
        let mut ctx = WorkerContext::new(&mut self.core);
        self.logic.on_data_changed(&mut ctx, &keys);
        self.core.take_changed_keys();
    }

    /// Common tail of every entry point
    fn settle(&mut self) {
        self.notify_data_changed();
        if self.core.lifecycle.shutdown_requested() && self.core.lifecycle.is_live() {
            info!("{} shutting down", self.core.id);
            self.core.lifecycle.start_unregistering(false);
            self.core.push_effect(WorkerEffect::Unregister);
        }
    }

    fn try_lock(&mut self) {
        if !self.core.lifecycle.may_try_lock(self.core.now) || !self.core.destroy_eligible() {
            return;
        }
        debug!("{} idle; asking for the master lock", self.core.id);
        let key = self.core.request(
            &ChannelId::master(),
            messages::MASTER_LOCK,
            Payload::Empty,
            RequestPurpose::MasterLock,
        );
        self.core.lifecycle.start_locking(key);
    }

    fn try_finish(&mut self) {
        if !self.core.lifecycle.is_finalizing() || self.core.is_dirty() {
            return;
        }
        if self.core.lifecycle.holds_lock() {
            self.core.send_unlock();
        }
        self.core.lifecycle.finish();
        self.core.push_effect(WorkerEffect::Destroyed);
    }
}

impl<L: ChannelLogic> AnyWorker for ChannelWorker<L> {
    fn core(&self) -> &WorkerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut WorkerCore {
        &mut self.core
    }

    fn create(&mut self, clock: Clock) {
        self.core.set_clock(clock);
        let mut ctx = WorkerContext::new(&mut self.core);
        self.logic.on_create(&mut ctx);
        self.core.mark_registered();
        self.settle();
    }

    fn receive(&mut self, clock: Clock, addressed: ChannelId, packet: Packet) {
        if !self.core.lifecycle.is_live() {
            return;
        }
        self.core.set_clock(clock);
        let source = packet.source.clone();
        let ready = self.core.inbound.receive(
            &source,
            &addressed.clone(),
            packet.sequence,
            packet.new_generation,
            (addressed, packet),
            clock.now,
            clock.ping_count,
        );
        for (addressed, packet) in ready {
            self.dispatch(addressed, packet);
        }
        self.settle();
    }

    fn tick(&mut self, clock: Clock) {
        self.core.set_clock(clock);
        if !self.core.lifecycle.is_live() {
            return;
        }

        let released = self
            .core
            .inbound
            .poll_recovery(clock.ping_count, self.core.config.recovery_pings);
        for (addressed, packet) in released {
            self.dispatch(addressed, packet);
        }

        for (key, pending) in self.core.requests.take_expired(clock.now) {
            debug!("{} request to {} timed out", self.core.id, pending.dest);
            self.resolve(key, pending.purpose, Err(ErrorCode::Timeout));
        }

        let forget_ms = self.core.config.forget_index_ms;
        self.core.outbound.forget_stale(clock.now, forget_ms);
        self.core.inbound.forget_stale(clock.now, forget_ms.saturating_mul(2));

        let mut ctx = WorkerContext::new(&mut self.core);
        self.logic.on_tick(&mut ctx);
        self.settle();

        self.core.commit(false);
        self.try_lock();
    }

    fn fail_request(&mut self, clock: Clock, request_id: RequestId, code: ErrorCode) {
        self.core.set_clock(clock);
        if let Some((key, pending)) = self.core.requests.take_id(request_id) {
            self.resolve(key, pending.purpose, Err(code));
            self.settle();
        }
    }

    fn peer_missing(&mut self, dest: &ChannelId) {
        self.core.peer_missing(dest);
    }

    fn finalize(&mut self, clock: Clock) {
        self.core.set_clock(clock);
        self.core.lifecycle.start_finalizing();

        for (key, pending) in self.core.requests.drain() {
            match pending.purpose {
                RequestPurpose::MasterLock => self.core.lifecycle.adopt_lock(),
                purpose => self.resolve(key, purpose, Err(ErrorCode::Shutdown)),
            }
        }
        let searches: Vec<RequestKey> = self.core.searches.drain().collect();
        for key in searches {
            let mut ctx = WorkerContext::new(&mut self.core);
            self.logic.on_search(&mut ctx, key, Err(ErrorCode::Shutdown));
        }

        let stranded = self.core.inbound.buffered();
        if stranded > 0 {
            warn!(
                "{} destroyed with {} out-of-order packets still held",
                self.core.id, stranded
            );
        }

        let subscriptions: Vec<ChannelId> =
            self.core.subscriptions.drain().map(|(id, _)| id).collect();
        for dest in subscriptions {
            self.core.send_packet(
                &dest,
                Opcode::message(messages::UNSUBSCRIBE),
                Payload::Empty,
                None,
                false,
                MissingPolicy::Drop,
            );
        }

        let mut ctx = WorkerContext::new(&mut self.core);
        self.logic.on_destroy(&mut ctx);
        self.notify_data_changed();

        self.core.commit(true);
        self.try_finish();
    }

    fn commit_finished(&mut self, clock: Clock, result: Result<(), ShieldError>) {
        self.core.set_clock(clock);
        let finalizing = self.core.lifecycle.is_finalizing();
        match result {
            Ok(()) => self.core.commit_done(false),
            Err(ShieldError::Timeout) => self.core.commit_done(!finalizing),
            Err(error) => {
                self.core.commit_done(false);
                error!("abandoning commit for {}: {}", self.core.id, error);
                self.core.push_effect(WorkerEffect::StoreFailure {
                    reason: error.to_string(),
                });
            }
        }
        if finalizing {
            self.core.commit(true);
            self.try_finish();
        }
    }

    fn search_finished(
        &mut self,
        clock: Clock,
        key: RequestKey,
        result: Result<Vec<(String, Value)>, ErrorCode>,
    ) {
        self.core.set_clock(clock);
        if !self.core.searches.remove(&key) {
            return;
        }
        self.core.last_activity = self.core.now;
        let mut ctx = WorkerContext::new(&mut self.core);
        self.logic.on_search(&mut ctx, key, result);
        self.settle();
    }

    fn with_logic(
        &mut self,
        clock: Clock,
        f: &mut dyn FnMut(&mut dyn Any, &mut WorkerContext<'_>),
    ) {
        self.core.set_clock(clock);
        let mut ctx = WorkerContext::new(&mut self.core);
        f(&mut self.logic, &mut ctx);
        self.settle();
    }
}
