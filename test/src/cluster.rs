use actorfabric_server::{
    shared::{
        exchange::{Exchange, LocalExchangeHub},
        store::MemoryStoreHub,
        ChannelId,
    },
    ChannelLogic, ChannelServer, CreateEvent, DestroyEvent, ErrorEvent, FabricServerError,
    ServerConfig, WorkerContext,
};
use log::LevelFilter;

use crate::{test_registry, Recorder};

/// Logical milliseconds per cluster tick
pub const TICK_MS: u64 = 10;

pub fn init_logging() {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .is_test(true)
        .try_init()
        .ok();
}

pub fn id(s: &str) -> ChannelId {
    ChannelId::parse(s).expect("valid channel id")
}

/// Several servers sharing one exchange and one store, ticked in lockstep
pub struct TestCluster {
    pub exchange: LocalExchangeHub,
    pub store: MemoryStoreHub,
    pub servers: Vec<ChannelServer>,
    pub created: Vec<(usize, ChannelId)>,
    pub destroyed: Vec<(usize, ChannelId)>,
    pub errors: Vec<(usize, FabricServerError)>,
}

impl TestCluster {
    pub fn new(servers: usize) -> Self {
        Self::with_config(servers, |_| {})
    }

    pub fn with_config(servers: usize, tweak: impl Fn(&mut ServerConfig)) -> Self {
        init_logging();
        let mut cluster = Self {
            exchange: LocalExchangeHub::new(),
            store: MemoryStoreHub::new(),
            servers: Vec::new(),
            created: Vec::new(),
            destroyed: Vec::new(),
            errors: Vec::new(),
        };
        for index in 0..servers {
            let mut config = Self::config_for(index);
            tweak(&mut config);
            let exchange = Box::new(cluster.exchange.connect());
            cluster.spawn(config, exchange);
        }
        cluster.drain_events();
        cluster
    }

    /// Joins one more server, talking to the hub through `exchange`.
    /// Returns its index.
    pub fn add_server(&mut self, exchange: Box<dyn Exchange>) -> usize {
        let config = Self::config_for(self.servers.len());
        self.spawn(config, exchange);
        self.drain_events();
        self.servers.len() - 1
    }

    fn config_for(index: usize) -> ServerConfig {
        ServerConfig {
            server_id: index.to_string(),
            rng_seed: Some(index as u64 + 1),
            ..ServerConfig::default()
        }
    }

    fn spawn(&mut self, config: ServerConfig, exchange: Box<dyn Exchange>) {
        let mut server = ChannelServer::new(
            config,
            test_registry(),
            exchange,
            Box::new(self.store.connect()),
        )
        .expect("server config");
        server.bootstrap().expect("bootstrap");
        self.servers.push(server);
    }

    pub fn tick(&mut self) {
        for server in self.servers.iter_mut() {
            server.tick(TICK_MS);
        }
        self.drain_events();
    }

    pub fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.tick();
        }
    }

    /// Ticks until `done` holds, at most `max_ticks` times
    pub fn run_until(&mut self, max_ticks: usize, mut done: impl FnMut(&mut Self) -> bool) -> bool {
        for _ in 0..max_ticks {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    /// Creates `channel` on `server` and lets the creation finish
    pub fn create(&mut self, server: usize, channel: &str) -> ChannelId {
        let channel = id(channel);
        self.servers[server]
            .create_channel(&channel)
            .expect("create channel");
        let host = channel.clone();
        let created = self.run_until(20, |cluster| cluster.host_of(&host).is_some());
        assert!(created, "{} was not created", channel);
        channel
    }

    pub fn host_of(&self, channel: &ChannelId) -> Option<usize> {
        self.servers
            .iter()
            .position(|server| server.has_channel(channel))
    }

    pub fn with_channel<L: ChannelLogic, R>(
        &mut self,
        channel: &ChannelId,
        f: impl FnOnce(&mut L, &mut WorkerContext<'_>) -> R,
    ) -> Option<R> {
        let host = self.host_of(channel)?;
        let result = self.servers[host].with_channel(channel, f);
        self.drain_events();
        result
    }

    pub fn recorder<R>(
        &mut self,
        channel: &ChannelId,
        f: impl FnOnce(&mut Recorder, &mut WorkerContext<'_>) -> R,
    ) -> Option<R> {
        self.with_channel(channel, f)
    }

    pub fn creations_of(&self, channel: &ChannelId) -> usize {
        self.created.iter().filter(|(_, id)| id == channel).count()
    }

    pub fn destructions_of(&self, channel: &ChannelId) -> usize {
        self.destroyed.iter().filter(|(_, id)| id == channel).count()
    }

    fn drain_events(&mut self) {
        for (index, server) in self.servers.iter_mut().enumerate() {
            let mut events = server.receive();
            self.created
                .extend(events.read::<CreateEvent>().map(|id| (index, id)));
            self.destroyed
                .extend(events.read::<DestroyEvent>().map(|id| (index, id)));
            self.errors
                .extend(events.read::<ErrorEvent>().map(|error| (index, error)));
        }
    }
}
