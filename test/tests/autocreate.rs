use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use actorfabric_server::shared::{
    exchange::{Exchange, ExchangeDelivery, ExchangeError, LocalExchange},
    packet::Payload,
    ChannelId, ErrorCode,
};
use actorfabric_test::{id, TestCluster};
use serde_json::{json, Value};

/// An endpoint whose next `stale` lookups of `target` report it missing,
/// as if they ran just before another server registered it
struct StaleLookup {
    inner: LocalExchange,
    target: ChannelId,
    stale: Arc<AtomicU32>,
}

impl Exchange for StaleLookup {
    fn register(&mut self, id: &ChannelId) -> Result<(), ExchangeError> {
        self.inner.register(id)
    }

    fn unregister(&mut self, id: &ChannelId) {
        self.inner.unregister(id)
    }

    fn subscribe(&mut self, id: &ChannelId) -> Result<(), ExchangeError> {
        self.inner.subscribe(id)
    }

    fn unsubscribe(&mut self, id: &ChannelId) {
        self.inner.unsubscribe(id)
    }

    fn publish(&mut self, dest: &ChannelId, payload: &[u8]) -> Result<(), ExchangeError> {
        let stale = dest == &self.target
            && self
                .stale
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
        if stale {
            return Err(ExchangeError::NotFound(dest.clone()));
        }
        self.inner.publish(dest, payload)
    }

    fn receive(&mut self) -> Option<ExchangeDelivery> {
        self.inner.receive()
    }
}

#[test]
fn fifty_senders_cause_exactly_one_creation() {
    let mut cluster = TestCluster::new(2);
    let senders: Vec<ChannelId> = (0..50)
        .map(|index| cluster.create(index % 2, &format!("sender.{}", index)))
        .collect();
    let world = id("world.7");

    for (index, sender) in senders.iter().enumerate() {
        let payload = Payload::from(json!({ "from": index }));
        cluster
            .recorder(sender, |_, ctx| ctx.send(&world, "note", payload))
            .unwrap();
    }
    let delivered = cluster.run_until(500, |cluster| {
        cluster
            .recorder(&world, |r, _| r.notes().len())
            .unwrap_or(0)
            == 50
    });
    cluster.run(20);

    assert!(delivered, "not every message reached world.7");
    assert_eq!(cluster.creations_of(&world), 1);
    let sources: HashSet<ChannelId> = cluster
        .recorder(&world, |r, _| {
            r.received.iter().map(|received| received.source.clone()).collect()
        })
        .unwrap();
    assert_eq!(sources.len(), 50);
    assert_eq!(cluster.recorder(&world, |r, _| r.notes().len()), Some(50));
}

#[test]
fn a_server_losing_the_register_race_delivers_to_the_winner() {
    let mut cluster = TestCluster::new(2);
    let target = id("user.77");
    let stale = Arc::new(AtomicU32::new(1));
    let endpoint = StaleLookup {
        inner: cluster.exchange.connect(),
        target: target.clone(),
        stale: stale.clone(),
    };
    let racer = cluster.add_server(Box::new(endpoint));

    let early = cluster.create(1, "sender.early");
    cluster
        .recorder(&early, |_, ctx| ctx.send(&target, "note", Payload::from(json!(0))))
        .unwrap();
    let created = cluster.run_until(50, |cluster| {
        cluster.recorder(&target, |r, _| r.notes().len()).unwrap_or(0) == 1
    });
    assert!(created);
    assert_eq!(cluster.host_of(&target), Some(1));

    let late = cluster.create(racer, "sender.late");
    let racer_creates = cluster.servers[racer].load().creates;
    for note in 1..=30 {
        cluster
            .recorder(&late, |_, ctx| ctx.send(&target, "note", Payload::from(json!(note))))
            .unwrap();
    }
    let delivered = cluster.run_until(200, |cluster| {
        cluster.recorder(&target, |r, _| r.notes().len()).unwrap_or(0) == 31
    });

    assert!(delivered, "queued notes were lost after the lost race");
    assert_eq!(stale.load(Ordering::SeqCst), 0);
    assert_eq!(cluster.creations_of(&target), 1);
    assert_eq!(cluster.host_of(&target), Some(1));
    assert_eq!(cluster.servers[racer].load().creates, racer_creates);
    let expected: Vec<Value> = (0..=30).map(|note| json!(note)).collect();
    assert_eq!(cluster.recorder(&target, |r, _| r.notes()), Some(expected));
}

#[test]
fn subids_failing_the_pattern_are_never_created() {
    let mut cluster = TestCluster::new(1);
    let sender = cluster.create(0, "sender.a");
    let bad = id("world.seven");

    cluster
        .recorder(&sender, |_, ctx| ctx.request(&bad, "note", Payload::Empty))
        .unwrap();
    cluster.run(20);

    let responses = cluster.recorder(&sender, |r, _| r.responses.clone()).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].1, Err(ErrorCode::InvalidChannelId));
    assert_eq!(cluster.creations_of(&bad), 0);
}

#[test]
fn types_without_autocreate_fail_requests_with_not_found() {
    let mut cluster = TestCluster::new(1);
    let sender = cluster.create(0, "sender.a");

    cluster
        .recorder(&sender, |_, ctx| ctx.request(&id("watcher.z"), "note", Payload::Empty))
        .unwrap();
    cluster.run(20);

    let responses = cluster.recorder(&sender, |r, _| r.responses.clone()).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].1, Err(ErrorCode::NotFound));
}

#[test]
fn the_first_server_is_master_and_a_survivor_takes_over() {
    let mut cluster = TestCluster::new(2);
    assert_eq!(cluster.host_of(&ChannelId::master()), Some(0));
    assert!(cluster.errors.is_empty(), "{:?}", cluster.errors);

    cluster.servers[0].shutdown();
    let stopped = cluster.run_until(100, |cluster| cluster.servers[0].is_shut_down());
    assert!(stopped);

    let sender = cluster.create(1, "sender.a");
    let world = id("world.11");
    cluster
        .recorder(&sender, |_, ctx| ctx.send(&world, "note", Payload::from(json!(1))))
        .unwrap();
    let delivered = cluster.run_until(300, |cluster| {
        cluster.recorder(&world, |r, _| r.notes().len()).unwrap_or(0) == 1
    });

    assert!(delivered);
    assert_eq!(cluster.host_of(&ChannelId::master()), Some(1));
    assert_eq!(cluster.host_of(&world), Some(1));
}

#[test]
fn duplicate_server_ids_are_refused() {
    use actorfabric_server::{ChannelServer, FabricServerError, ServerConfig};
    use actorfabric_test::test_registry;

    let cluster = TestCluster::new(1);
    let mut twin = ChannelServer::new(
        ServerConfig::default(),
        test_registry(),
        Box::new(cluster.exchange.connect()),
        Box::new(cluster.store.connect()),
    )
    .unwrap();
    assert!(matches!(
        twin.bootstrap(),
        Err(FabricServerError::DuplicateServer(_))
    ));
}
