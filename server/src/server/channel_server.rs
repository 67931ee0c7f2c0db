use std::{
    collections::{HashMap, HashSet, VecDeque},
    mem,
};

use log::{debug, info, trace, warn};
use serde_json::Value;

use actorfabric_shared::{
    exchange::{Exchange, ExchangeError},
    packet::{Opcode, Packet, PacketError},
    store::{MetadataStore, StoreReply},
    ChannelId, ErrorCode, PingCount, ServerTime, BROADCAST_CHANNEL_TYPE, CLIENT_CHANNEL_TYPE,
    SERVER_CHANNEL_TYPE,
};

use super::{LoadStats, ServerConfig};
use crate::{
    channels::{master, server_channel, server_channel::ServerChannelLogic},
    client::{client_worker, ClientConnection},
    error::FabricServerError,
    events::ServerEvents,
    registry::{ChannelOptions, ChannelTypeRegistry, Persistence, Placement},
    shield::{DataStoreShield, ShieldCompletion, ShieldError, ShieldMetrics, ShieldTicket},
    worker::{
        AnyWorker, ChannelLogic, Clock, MissingPolicy, Outgoing, RequestKey, ResponseHandle,
        WorkerContext, WorkerCore, WorkerEffect, WorkerInit,
    },
};

enum Route {
    /// Registered on the exchange; packets wait here until the worker exists
    Creating(LocalCreation),
    Worker(Box<dyn AnyWorker>),
}

#[derive(Default)]
struct LocalCreation {
    queued: Vec<(ChannelId, Packet)>,
    /// `create_worker` requests to answer once the worker is up
    waiters: Vec<ResponseHandle>,
}

/// Packets held for a destination that is missing or being created
#[derive(Default)]
struct PendingDelivery {
    queue: Vec<Outgoing>,
    attempts: u32,
    retry_at: Option<ServerTime>,
    awaiting_creation: bool,
    /// The destination was just created, so every source starts a new
    /// sequence generation with it
    fresh_target: bool,
}

enum StoreWaiter {
    Load(ChannelId),
    Commit(ChannelId),
    Search(ChannelId, RequestKey),
}

/// A server hosting channel workers on an exchange. Sans-IO: the host calls
/// `tick` on an interval and drains `receive` for events.
pub struct ChannelServer {
    // Config
    config: ServerConfig,
    server_id: ChannelId,
    registry: ChannelTypeRegistry,
    // Io
    exchange: Box<dyn Exchange>,
    shield: DataStoreShield,
    // Channels
    routes: HashMap<ChannelId, Route>,
    /// Channels asked of the master and not yet resolved
    creating_remote: HashSet<ChannelId>,
    /// Local creations waiting for a finalizing incarnation to finish
    recreate: HashMap<ChannelId, Vec<ResponseHandle>>,
    deliveries: HashMap<ChannelId, PendingDelivery>,
    store_waiters: HashMap<ShieldTicket, StoreWaiter>,
    outgoing: VecDeque<Outgoing>,
    effects: VecDeque<(ChannelId, WorkerEffect)>,
    // Events
    events: ServerEvents,
    load: LoadStats,
    // Time
    server_time: ServerTime,
    ping_count: PingCount,
    next_ping_at: ServerTime,
    next_load_report_at: ServerTime,
    rng: fastrand::Rng,
    bootstrapped: bool,
    shutting_down: bool,
}

impl ChannelServer {
    pub fn new(
        config: ServerConfig,
        mut registry: ChannelTypeRegistry,
        exchange: Box<dyn Exchange>,
        store: Box<dyn MetadataStore>,
    ) -> Result<Self, FabricServerError> {
        config.validate()?;
        let server_id = ChannelId::new(SERVER_CHANNEL_TYPE, &config.server_id)?;
        registry.insert_builtin(server_channel::channel_type())?;
        registry.insert_builtin(master::channel_type(config.master.clone())?)?;

        let rng = match config.rng_seed {
            Some(seed) => fastrand::Rng::with_seed(seed),
            None => fastrand::Rng::new(),
        };
        let shield = DataStoreShield::new(store, config.shield.clone());

        Ok(Self {
            config,
            server_id,
            registry,
            exchange,
            shield,
            routes: HashMap::new(),
            creating_remote: HashSet::new(),
            recreate: HashMap::new(),
            deliveries: HashMap::new(),
            store_waiters: HashMap::new(),
            outgoing: VecDeque::new(),
            effects: VecDeque::new(),
            events: ServerEvents::new(),
            load: LoadStats::default(),
            server_time: 0,
            ping_count: 0,
            next_ping_at: 0,
            next_load_report_at: 0,
            rng,
            bootstrapped: false,
            shutting_down: false,
        })
    }

    /// Registers this server on the exchange, starts its `server.*` channel
    /// and stands for master election
    pub fn bootstrap(&mut self) -> Result<(), FabricServerError> {
        if self.bootstrapped {
            return Ok(());
        }
        match self.exchange.register(&self.server_id) {
            Ok(()) => {}
            Err(ExchangeError::AlreadyExists(_)) => {
                return Err(FabricServerError::DuplicateServer(self.server_id.clone()));
            }
            Err(error) => return Err(error.into()),
        }
        self.exchange.subscribe(&ChannelId::server_broadcast())?;

        let init = self.worker_init(None);
        let worker = self.registry.build(&self.server_id, init).map_err(|code| {
            FabricServerError::CreationFailed {
                channel: self.server_id.clone(),
                code,
            }
        })?;
        let id = self.server_id.clone();
        self.install(id, worker);
        self.bootstrapped = true;
        info!("{} bootstrapped", self.server_id);

        // the first server to register master.master wins the election
        self.start_local_creation(ChannelId::master(), Vec::new());
        self.pump();
        Ok(())
    }

    /// Creates `id` on this server. The outcome arrives as a `CreateEvent`
    /// or an `ErrorEvent`.
    pub fn create_channel(&mut self, id: &ChannelId) -> Result<(), FabricServerError> {
        if !self.bootstrapped {
            return Err(FabricServerError::NotBootstrapped);
        }
        if self.routes.contains_key(id) {
            return Err(FabricServerError::ChannelExists(id.clone()));
        }
        self.registry
            .validate(id)
            .map_err(|code| FabricServerError::CreationFailed {
                channel: id.clone(),
                code,
            })?;
        self.start_local_creation(id.clone(), Vec::new());
        self.pump();
        Ok(())
    }

    /// Starts a `client.<subid>` channel speaking JSON over `connection`
    pub fn connect_client(
        &mut self,
        subid: &str,
        connection: Box<dyn ClientConnection>,
    ) -> Result<ChannelId, FabricServerError> {
        if !self.bootstrapped {
            return Err(FabricServerError::NotBootstrapped);
        }
        let id = ChannelId::new(CLIENT_CHANNEL_TYPE, subid)?;
        if self.routes.contains_key(&id) {
            return Err(FabricServerError::ChannelExists(id));
        }
        match self.exchange.register(&id) {
            Ok(()) => {}
            Err(ExchangeError::AlreadyExists(_)) => {
                return Err(FabricServerError::ChannelExists(id));
            }
            Err(error) => return Err(error.into()),
        }
        let options = ChannelOptions {
            persistence: Persistence::Volatile,
            auto_destroy: false,
            require_login: false,
        };
        let core = WorkerCore::new(id.clone(), options, self.worker_init(None));
        self.install(id.clone(), client_worker(core, connection));
        self.pump();
        Ok(id)
    }

    /// Advances logical time by `dt_ms` and does one round of work
    pub fn tick(&mut self, dt_ms: u64) {
        if !self.bootstrapped {
            return;
        }
        self.server_time = self.server_time.saturating_add(dt_ms);
        let now = self.server_time;

        if now >= self.next_ping_at {
            match Packet::ping(self.server_id.clone()).to_bytes() {
                Ok(ping) => {
                    if let Err(error) = self.exchange.publish(&self.server_id, &ping) {
                        trace!("ping not sent: {}", error);
                    }
                }
                Err(error) => warn!("ping not encoded: {}", error),
            }
            self.next_ping_at = now.saturating_add(self.config.ping_interval_ms);
        }

        for _ in 0..self.config.max_packets_per_tick {
            let Some(delivery) = self.exchange.receive() else {
                break;
            };
            match Packet::from_bytes(&delivery.payload) {
                Ok(packet) => self.route_packet(delivery.addressed, packet),
                Err(error) => warn!(
                    "dropping undecodable packet for {}: {}",
                    delivery.addressed, error
                ),
            }
            self.pump();
        }

        for completion in self.shield.poll(now) {
            self.store_completed(completion);
        }
        self.pump();

        for id in self.worker_ids() {
            self.with_worker(&id, |worker, clock| worker.tick(clock));
            self.pump();
        }

        self.retry_deliveries();
        self.pump();

        if now >= self.next_load_report_at && !self.shutting_down {
            self.send_load_report();
            self.next_load_report_at = now.saturating_add(self.config.load_report_interval_ms);
            self.pump();
        }
    }

    /// Takes everything that happened since the last call
    pub fn receive(&mut self) -> ServerEvents {
        mem::replace(&mut self.events, ServerEvents::new())
    }

    /// Destroys every channel on this server. Keep ticking until
    /// `is_shut_down` so pending commits can finish.
    pub fn shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!("{} shutting down", self.server_id);
        self.shutting_down = true;
        self.exchange.unsubscribe(&ChannelId::server_broadcast());

        let pending: Vec<(ChannelId, PendingDelivery)> = self.deliveries.drain().collect();
        for (dest, delivery) in pending {
            self.fail_queue(&dest, delivery.queue, ErrorCode::Shutdown);
        }
        for id in self.worker_ids() {
            self.with_worker(&id, |worker, clock| {
                worker.with_logic(clock, &mut |_, ctx| ctx.request_shutdown())
            });
        }
        self.pump();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutting_down && self.routes.is_empty() && self.shield.is_idle()
    }

    /// Runs `f` against the logic of a live channel of type `L` on this
    /// server. `None` if there is no such channel.
    pub fn with_channel<L: ChannelLogic, R>(
        &mut self,
        id: &ChannelId,
        f: impl FnOnce(&mut L, &mut WorkerContext<'_>) -> R,
    ) -> Option<R> {
        let result = self.with_logic_of(id, f);
        self.pump();
        result
    }

    // Accessors

    pub fn server_id(&self) -> &ChannelId {
        &self.server_id
    }

    pub fn server_time(&self) -> ServerTime {
        self.server_time
    }

    /// Pings that made the round trip through the exchange
    pub fn ping_count(&self) -> PingCount {
        self.ping_count
    }

    /// Whether a live worker for `id` runs on this server
    pub fn has_channel(&self, id: &ChannelId) -> bool {
        matches!(self.routes.get(id), Some(Route::Worker(worker)) if worker.core().is_live())
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.worker_ids()
    }

    /// The `{"public": .., "private": ..}` document of a channel on this server
    pub fn channel_data(&self, id: &ChannelId) -> Option<Value> {
        match self.routes.get(id) {
            Some(Route::Worker(worker)) => Some(worker.core().data().clone()),
            _ => None,
        }
    }

    pub fn subscriber_count(&self, id: &ChannelId) -> Option<usize> {
        match self.routes.get(id) {
            Some(Route::Worker(worker)) => Some(worker.core().subscriber_count()),
            _ => None,
        }
    }

    /// Out-of-order packets a channel is holding for a sequence gap
    pub fn buffered_packets(&self, id: &ChannelId) -> Option<usize> {
        match self.routes.get(id) {
            Some(Route::Worker(worker)) => Some(worker.core().buffered_packets()),
            _ => None,
        }
    }

    pub fn load(&self) -> LoadStats {
        let mut stats = self.load.clone();
        stats.recoveries += self
            .routes
            .values()
            .filter_map(|route| match route {
                Route::Worker(worker) => Some(worker.core().recoveries()),
                Route::Creating(_) => None,
            })
            .sum::<u64>();
        stats
    }

    pub fn shield_metrics(&self) -> &ShieldMetrics {
        self.shield.metrics()
    }

    // Workers

    fn clock(&self) -> Clock {
        Clock {
            now: self.server_time,
            ping_count: self.ping_count,
        }
    }

    fn worker_init(&mut self, state: Option<Value>) -> WorkerInit {
        WorkerInit {
            config: self.config.worker.clone(),
            request_timeout_ms: self.config.request_timeout_ms,
            seed: self.rng.u64(..),
            state,
            now: self.server_time,
        }
    }

    fn worker_ids(&self) -> Vec<ChannelId> {
        let mut ids: Vec<ChannelId> = self
            .routes
            .iter()
            .filter(|(_, route)| matches!(route, Route::Worker(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Runs `f` on the worker for `id` and collects what it produced
    fn with_worker(&mut self, id: &ChannelId, f: impl FnOnce(&mut dyn AnyWorker, Clock)) -> bool {
        let clock = self.clock();
        let Some(Route::Worker(worker)) = self.routes.get_mut(id) else {
            return false;
        };
        f(worker.as_mut(), clock);
        self.collect(id);
        true
    }

    fn with_logic_of<L: ChannelLogic, R>(
        &mut self,
        id: &ChannelId,
        f: impl FnOnce(&mut L, &mut WorkerContext<'_>) -> R,
    ) -> Option<R> {
        let mut f = Some(f);
        let mut result = None;
        self.with_worker(id, |worker, clock| {
            worker.with_logic(clock, &mut |logic, ctx| {
                if let (Some(logic), Some(f)) = (logic.downcast_mut::<L>(), f.take()) {
                    result = Some(f(logic, ctx));
                }
            })
        });
        result
    }

    fn collect(&mut self, id: &ChannelId) {
        let Some(Route::Worker(worker)) = self.routes.get_mut(id) else {
            return;
        };
        let outbox = worker.core_mut().take_outbox();
        let effects = worker.core_mut().take_effects();
        self.outgoing.extend(outbox);
        self.effects
            .extend(effects.into_iter().map(|effect| (id.clone(), effect)));
    }

    /// Runs `on_create` and makes the worker reachable
    fn install(&mut self, id: ChannelId, mut worker: Box<dyn AnyWorker>) {
        worker.create(self.clock());
        self.routes.insert(id.clone(), Route::Worker(worker));
        self.collect(&id);
        self.load.channels += 1;
        self.load.creates += 1;
        debug!("{} created on {}", id, self.server_id);
        self.events.push_creation(&id);
    }

    /// Answers a `create_worker` request through this server's channel
    fn respond_waiters(&mut self, waiters: Vec<ResponseHandle>, result: Result<(), ErrorCode>) {
        if waiters.is_empty() {
            return;
        }
        let server_id = self.server_id.clone();
        let result = result.map(|()| Value::Null);
        self.with_worker(&server_id, |worker, clock| {
            let mut waiters = waiters.into_iter();
            worker.with_logic(clock, &mut |_, ctx| {
                for waiter in waiters.by_ref() {
                    ctx.respond(waiter, result.clone());
                }
            })
        });
    }

    /// Publishes queued packets and applies worker effects until both queues
    /// are empty
    fn pump(&mut self) {
        loop {
            if let Some(outgoing) = self.outgoing.pop_front() {
                self.deliver(outgoing);
                continue;
            }
            if let Some((id, effect)) = self.effects.pop_front() {
                self.apply_effect(id, effect);
                continue;
            }
            break;
        }
    }

    fn apply_effect(&mut self, id: ChannelId, effect: WorkerEffect) {
        match effect {
            WorkerEffect::Persist { value } => {
                let ticket = self.shield.set(&id.storage_key(), value, self.server_time);
                self.store_waiters.insert(ticket, StoreWaiter::Commit(id));
            }
            WorkerEffect::Unregister => {
                self.exchange.unregister(&id);
                self.with_worker(&id, |worker, clock| worker.finalize(clock));
            }
            WorkerEffect::Destroyed => self.destroyed(id),
            WorkerEffect::CreateLocal { id, waiter } => {
                self.start_local_creation(id, waiter.into_iter().collect());
            }
            WorkerEffect::CreationResolved { id, result } => self.creation_resolved(&id, result),
            WorkerEffect::ReportLoad => self.send_load_report(),
            WorkerEffect::StoreFailure { reason } => {
                self.events
                    .push_error(FabricServerError::StoreUnavailable { channel: id, reason });
            }
            WorkerEffect::Search { key, prefix } => {
                let ticket = self.shield.search(&prefix, self.server_time);
                self.store_waiters.insert(ticket, StoreWaiter::Search(id, key));
            }
        }
    }

    fn destroyed(&mut self, id: ChannelId) {
        if let Some(Route::Worker(worker)) = self.routes.remove(&id) {
            self.load.recoveries += worker.core().recoveries();
        }
        self.load.channels = self.load.channels.saturating_sub(1);
        self.load.destroys += 1;
        debug!("{} destroyed on {}", id, self.server_id);
        self.events.push_destruction(&id);

        let waiters = self.recreate.remove(&id);
        if self.shutting_down {
            self.respond_waiters(waiters.unwrap_or_default(), Err(ErrorCode::Shutdown));
            return;
        }
        if let Some(waiters) = waiters {
            self.start_local_creation(id, waiters);
        } else if self.deliveries.contains_key(&id) {
            // packets bounced off the old incarnation
            match self.registry.autocreate_plan(&id) {
                Ok(placement) => self.request_creation(&id, placement),
                Err(code) => {
                    if let Some(pending) = self.deliveries.remove(&id) {
                        self.fail_queue(&id, pending.queue, code);
                    }
                }
            }
        }
    }

    fn send_load_report(&mut self) {
        let report = self.load().report();
        let server_id = self.server_id.clone();
        self.with_logic_of(&server_id, |_: &mut ServerChannelLogic, ctx| {
            ServerChannelLogic::send_load_report(ctx, &report)
        });
    }

    // Routing

    fn route_packet(&mut self, addressed: ChannelId, packet: Packet) {
        if packet.opcode == Opcode::Ping {
            if packet.source == self.server_id {
                self.ping_count += 1;
            }
            return;
        }
        self.load.messages_in += 1;

        // broadcasts this server subscribed to go to its own channel
        let target = if addressed == ChannelId::server_broadcast() {
            self.server_id.clone()
        } else {
            addressed.clone()
        };
        let clock = self.clock();
        match self.routes.get_mut(&target) {
            Some(Route::Creating(creation)) => creation.queued.push((addressed, packet)),
            Some(Route::Worker(worker)) if worker.core().is_live() => {
                worker.receive(clock, addressed, packet);
                self.collect(&target);
            }
            _ => self.bounce(addressed, packet),
        }
    }

    /// A packet reached a channel that is gone or going; hand it to the
    /// channel's next incarnation
    fn bounce(&mut self, addressed: ChannelId, packet: Packet) {
        if packet.is_response() || addressed.kind() == BROADCAST_CHANNEL_TYPE {
            debug!("dropping packet from {} for departed {}", packet.source, addressed);
            return;
        }
        self.load.bounced += 1;
        let outgoing = Outgoing {
            dest: addressed,
            packet,
            missing: MissingPolicy::Autocreate,
        };
        if let Some(pending) = self.deliveries.get_mut(&outgoing.dest) {
            pending.queue.push(outgoing);
            return;
        }
        self.on_missing(outgoing);
    }

    fn deliver(&mut self, outgoing: Outgoing) {
        if let Some(pending) = self.deliveries.get_mut(&outgoing.dest) {
            pending.queue.push(outgoing);
            return;
        }
        let bytes = match outgoing.packet.to_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                self.reject_unencodable(outgoing, error);
                return;
            }
        };
        match self.exchange.publish(&outgoing.dest, &bytes) {
            Ok(()) => self.load.messages_out += 1,
            Err(ExchangeError::NotFound(_)) => self.on_missing(outgoing),
            Err(error) => {
                warn!("publishing to {} failed: {}", outgoing.dest, error);
                let dest = outgoing.dest.clone();
                let pending = PendingDelivery {
                    queue: vec![outgoing],
                    ..PendingDelivery::default()
                };
                self.retry_later(&dest, pending, ErrorCode::NotFound);
            }
        }
    }

    fn on_missing(&mut self, outgoing: Outgoing) {
        match outgoing.missing {
            MissingPolicy::Drop => {
                trace!("{} is gone; dropping", outgoing.dest);
                let source = outgoing.packet.source.clone();
                self.with_worker(&source, |worker, _| worker.peer_missing(&outgoing.dest));
            }
            MissingPolicy::Autocreate => {
                let dest = outgoing.dest.clone();
                match self.registry.autocreate_plan(&dest) {
                    Err(code) => self.fail_queue(&dest, vec![outgoing], code),
                    Ok(placement) => {
                        let pending = PendingDelivery {
                            queue: vec![outgoing],
                            awaiting_creation: true,
                            ..PendingDelivery::default()
                        };
                        self.deliveries.insert(dest.clone(), pending);
                        self.request_creation(&dest, placement);
                    }
                }
            }
        }
    }

    /// Re-publishes everything queued for `dest`, in order
    fn flush_delivery(&mut self, dest: &ChannelId) {
        let Some(mut pending) = self.deliveries.remove(dest) else {
            return;
        };
        if pending.fresh_target {
            let mut seen = HashSet::new();
            for outgoing in pending.queue.iter_mut() {
                if seen.insert(outgoing.packet.source.clone()) {
                    outgoing.packet.new_generation = true;
                }
            }
            pending.fresh_target = false;
        }

        let mut queue = mem::take(&mut pending.queue).into_iter();
        while let Some(outgoing) = queue.next() {
            let bytes = match outgoing.packet.to_bytes() {
                Ok(bytes) => bytes,
                Err(error) => {
                    self.reject_unencodable(outgoing, error);
                    continue;
                }
            };
            match self.exchange.publish(dest, &bytes) {
                Ok(()) => self.load.messages_out += 1,
                Err(error) => {
                    pending.queue.push(outgoing);
                    pending.queue.extend(queue);
                    self.redeliver_failed(dest, pending, error);
                    return;
                }
            }
        }
    }

    /// Drops a packet too large to frame; a request fails back to its sender
    fn reject_unencodable(&mut self, outgoing: Outgoing, error: PacketError) {
        warn!(
            "dropping packet from {} to {}: {}",
            outgoing.packet.source, outgoing.dest, error
        );
        self.load.deliveries_failed += 1;
        let request_id = outgoing.packet.request_id.filter(|_| outgoing.packet.is_request());
        if let Some(request_id) = request_id {
            self.with_worker(&outgoing.packet.source, |worker, clock| {
                worker.fail_request(clock, request_id, ErrorCode::NotAllowed)
            });
        }
    }

    fn redeliver_failed(
        &mut self,
        dest: &ChannelId,
        mut pending: PendingDelivery,
        error: ExchangeError,
    ) {
        let ExchangeError::NotFound(_) = error else {
            warn!("publishing to {} failed: {}", dest, error);
            self.retry_later(dest, pending, ErrorCode::NotFound);
            return;
        };
        pending.attempts += 1;
        if pending.attempts >= self.config.send_retry.max_attempts {
            self.fail_queue(dest, pending.queue, ErrorCode::NotFound);
            return;
        }
        self.load.sends_retried += 1;
        match self.registry.autocreate_plan(dest) {
            Ok(placement) => {
                pending.awaiting_creation = true;
                pending.retry_at = None;
                self.deliveries.insert(dest.clone(), pending);
                self.request_creation(dest, placement);
            }
            Err(code) => self.fail_queue(dest, pending.queue, code),
        }
    }

    /// Schedules another attempt after the configured backoff, or gives up
    fn retry_later(&mut self, dest: &ChannelId, mut pending: PendingDelivery, code: ErrorCode) {
        pending.attempts += 1;
        if pending.attempts >= self.config.send_retry.max_attempts {
            self.fail_queue(dest, pending.queue, code);
            return;
        }
        self.load.sends_retried += 1;
        let delay = self.config.send_retry.backoff(pending.attempts);
        pending.awaiting_creation = false;
        pending.retry_at = Some(self.server_time.saturating_add(delay));
        self.deliveries.insert(dest.clone(), pending);
    }

    fn retry_deliveries(&mut self) {
        let now = self.server_time;
        let mut due: Vec<ChannelId> = self
            .deliveries
            .iter()
            .filter(|(_, pending)| {
                !pending.awaiting_creation && pending.retry_at.is_some_and(|at| at <= now)
            })
            .map(|(dest, _)| dest.clone())
            .collect();
        due.sort();
        for dest in due {
            self.flush_delivery(&dest);
        }
    }

    /// Gives up on `queue`: requests fail back to their local senders and
    /// everything else is dropped
    fn fail_queue(&mut self, dest: &ChannelId, queue: Vec<Outgoing>, code: ErrorCode) {
        if queue.is_empty() {
            return;
        }
        self.load.deliveries_failed += queue.len() as u64;
        let mut reported = false;
        for outgoing in queue {
            let source = outgoing.packet.source.clone();
            match (outgoing.packet.request_id, outgoing.packet.is_request()) {
                (Some(request_id), true) => {
                    self.with_worker(&source, |worker, clock| {
                        worker.fail_request(clock, request_id, code)
                    });
                }
                _ if outgoing.missing == MissingPolicy::Drop => {
                    self.with_worker(&source, |worker, _| worker.peer_missing(dest));
                }
                _ => debug!("dropping packet from {} to {}: {}", source, dest, code),
            }
            if outgoing.missing == MissingPolicy::Autocreate && !reported {
                reported = true;
                if code != ErrorCode::Shutdown {
                    warn!("giving up delivery to {}: {}", dest, code);
                }
                self.events.push_error(FabricServerError::DeliveryFailed {
                    dest: dest.clone(),
                    code,
                });
            }
        }
    }

    // Creation

    fn request_creation(&mut self, dest: &ChannelId, placement: Placement) {
        if self.shutting_down {
            self.creation_resolved(dest, Err(ErrorCode::Shutdown));
            return;
        }
        match self.routes.get(dest) {
            Some(Route::Creating(_)) => return,
            // recreated once the old incarnation is destroyed
            Some(Route::Worker(worker)) if !worker.core().is_live() => return,
            Some(Route::Worker(_)) => {
                self.creation_resolved(dest, Ok(()));
                return;
            }
            None => {}
        }
        match placement {
            Placement::Local => self.start_local_creation(dest.clone(), Vec::new()),
            Placement::Master => {
                if !self.creating_remote.insert(dest.clone()) {
                    return;
                }
                debug!("asking the master to create {}", dest);
                let server_id = self.server_id.clone();
                self.with_logic_of(&server_id, |logic: &mut ServerChannelLogic, ctx| {
                    logic.request_create(ctx, dest)
                });
            }
        }
    }

    /// Registers `id` on the exchange and starts loading its state. Packets
    /// for it queue in the route until the worker exists.
    fn start_local_creation(&mut self, id: ChannelId, waiters: Vec<ResponseHandle>) {
        if self.shutting_down {
            self.respond_waiters(waiters, Err(ErrorCode::Shutdown));
            return;
        }
        match self.routes.get_mut(&id) {
            Some(Route::Creating(creation)) => {
                creation.waiters.extend(waiters);
                return;
            }
            Some(Route::Worker(worker)) if worker.core().is_live() => {
                self.respond_waiters(waiters, Ok(()));
                self.creation_resolved(&id, Ok(()));
                return;
            }
            Some(Route::Worker(_)) => {
                self.recreate.entry(id).or_default().extend(waiters);
                return;
            }
            None => {}
        }

        if let Err(code) = self.registry.validate(&id) {
            self.creation_failed(&id, waiters, code);
            return;
        }
        match self.exchange.register(&id) {
            Ok(()) => {}
            Err(ExchangeError::AlreadyExists(_)) => {
                debug!("{} already exists elsewhere", id);
                self.respond_waiters(waiters, Err(ErrorCode::AlreadyExists));
                self.creation_resolved(&id, Err(ErrorCode::AlreadyExists));
                return;
            }
            Err(error) => {
                warn!("registering {} failed: {}", id, error);
                self.creation_failed(&id, waiters, ErrorCode::NotFound);
                return;
            }
        }

        self.routes.insert(
            id.clone(),
            Route::Creating(LocalCreation {
                queued: Vec::new(),
                waiters,
            }),
        );
        let persisted = self
            .registry
            .options(id.kind())
            .is_some_and(|options| options.persistence == Persistence::Persisted);
        if persisted {
            let ticket = self.shield.get(&id.storage_key(), self.server_time);
            self.store_waiters.insert(ticket, StoreWaiter::Load(id));
        } else {
            self.finish_local_creation(&id, None);
        }
    }

    fn finish_local_creation(&mut self, id: &ChannelId, state: Option<Value>) {
        let Some(Route::Creating(creation)) = self.routes.remove(id) else {
            return;
        };
        if self.shutting_down {
            self.exchange.unregister(id);
            self.respond_waiters(creation.waiters, Err(ErrorCode::Shutdown));
            return;
        }
        let init = self.worker_init(state);
        let worker = match self.registry.build(id, init) {
            Ok(worker) => worker,
            Err(code) => {
                self.exchange.unregister(id);
                for (_, packet) in creation.queued {
                    debug!("dropping packet from {} for {}", packet.source, id);
                }
                self.creation_failed(id, creation.waiters, code);
                return;
            }
        };
        self.install(id.clone(), worker);
        for (addressed, packet) in creation.queued {
            self.route_packet(addressed, packet);
        }
        self.respond_waiters(creation.waiters, Ok(()));
        self.creation_resolved(id, Ok(()));
    }

    /// Persisted state could not be loaded; back off and try again later
    fn creation_load_failed(&mut self, id: &ChannelId, reason: String) {
        let Some(Route::Creating(creation)) = self.routes.remove(id) else {
            return;
        };
        self.exchange.unregister(id);
        warn!("loading {} failed: {}", id, reason);
        self.events.push_error(FabricServerError::StoreUnavailable {
            channel: id.clone(),
            reason,
        });
        self.respond_waiters(creation.waiters, Err(ErrorCode::Store));

        let pending = self.deliveries.entry(id.clone()).or_default();
        pending.awaiting_creation = true;
        for (addressed, packet) in creation.queued {
            if packet.is_response() {
                continue;
            }
            pending.queue.push(Outgoing {
                dest: addressed,
                packet,
                missing: MissingPolicy::Autocreate,
            });
        }
        self.creation_resolved(id, Err(ErrorCode::Store));
    }

    fn creation_failed(&mut self, id: &ChannelId, waiters: Vec<ResponseHandle>, code: ErrorCode) {
        warn!("creating {} failed: {}", id, code);
        self.events.push_error(FabricServerError::CreationFailed {
            channel: id.clone(),
            code,
        });
        self.respond_waiters(waiters, Err(code));
        self.creation_resolved(id, Err(code));
    }

    /// A creation this server waited on finished, here or elsewhere
    fn creation_resolved(&mut self, id: &ChannelId, result: Result<(), ErrorCode>) {
        self.creating_remote.remove(id);
        let Some(mut pending) = self.deliveries.remove(id) else {
            return;
        };
        pending.awaiting_creation = false;
        match result {
            Ok(()) | Err(ErrorCode::AlreadyExists) => {
                pending.fresh_target = true;
                self.deliveries.insert(id.clone(), pending);
                self.flush_delivery(id);
            }
            Err(code) if code.is_transient() && !self.shutting_down => {
                self.retry_later(id, pending, code)
            }
            Err(code) => self.fail_queue(id, pending.queue, code),
        }
    }

    // Store

    fn store_completed(&mut self, completion: ShieldCompletion) {
        let Some(waiter) = self.store_waiters.remove(&completion.ticket) else {
            return;
        };
        match (waiter, completion.result) {
            (StoreWaiter::Load(id), Ok(StoreReply::Value(state))) => {
                self.finish_local_creation(&id, state)
            }
            (StoreWaiter::Load(id), Ok(reply)) => {
                warn!("unexpected store reply loading {}: {:?}", id, reply);
                self.finish_local_creation(&id, None)
            }
            (StoreWaiter::Load(id), Err(error)) => {
                self.creation_load_failed(&id, error.to_string())
            }
            (StoreWaiter::Commit(id), result) => {
                self.with_worker(&id, |worker, clock| {
                    worker.commit_finished(clock, result.map(|_| ()))
                });
            }
            (StoreWaiter::Search(id, key), result) => {
                let result = match result {
                    Ok(StoreReply::Matches(matches)) => Ok(matches),
                    Ok(reply) => {
                        warn!("unexpected store reply searching for {}: {:?}", id, reply);
                        Err(ErrorCode::Store)
                    }
                    Err(ShieldError::Timeout) => Err(ErrorCode::Timeout),
                    Err(error) => {
                        warn!("search for {} failed: {}", id, error);
                        Err(ErrorCode::Store)
                    }
                };
                self.with_worker(&id, |worker, clock| {
                    worker.search_finished(clock, key, result)
                });
            }
        }
    }
}
