use actorfabric_server::shared::{messages, packet::Payload, ChannelId, FieldFilter};
use actorfabric_test::{id, TestCluster};
use serde_json::json;

fn quick_destroy() -> TestCluster {
    TestCluster::with_config(2, |config| {
        config.worker.destroy_idle_ms = 500;
        config.worker.max_noack_ms = 100;
        config.worker.forget_index_ms = 1_000;
        config.worker.commit_delay_ms = 50;
    })
}

#[test]
fn idle_channels_persist_then_destroy_and_come_back() {
    let mut cluster = quick_destroy();
    let sender = cluster.create(0, "sender.a");
    let world = id("world.5");

    let payload = Payload::from(json!({ "key": "public.score", "value": 7 }));
    cluster
        .recorder(&sender, |_, ctx| ctx.request(&world, "store", payload))
        .unwrap();
    let destroyed = cluster.run_until(400, |cluster| cluster.destructions_of(&world) == 1);
    assert!(destroyed, "world.5 never went away");
    assert_eq!(cluster.host_of(&world), None);
    assert_eq!(
        cluster.store.get("world/5"),
        Some(json!({"public": {"score": 7}, "private": {}}))
    );
    assert!(!cluster.exchange.is_registered(&world));

    cluster
        .recorder(&sender, |_, ctx| ctx.send(&world, "note", Payload::from(json!("again"))))
        .unwrap();
    let delivered = cluster.run_until(200, |cluster| {
        cluster.recorder(&world, |r, _| r.notes().len()).unwrap_or(0) == 1
    });
    assert!(delivered);
    assert_eq!(cluster.creations_of(&world), 2);
    assert_eq!(
        cluster.recorder(&world, |r, _| r.created_with.clone()).unwrap(),
        Some(json!({"score": 7}))
    );
}

#[test]
fn subscribers_keep_a_channel_alive() {
    let mut cluster = quick_destroy();
    let watcher = cluster.create(1, "watcher.a");
    let world = id("world.6");

    cluster
        .recorder(&watcher, |_, ctx| ctx.subscribe_to(&world, FieldFilter::All))
        .unwrap()
        .unwrap();
    cluster.run(200);
    assert_eq!(cluster.destructions_of(&world), 0);
    assert!(cluster.host_of(&world).is_some());

    cluster
        .recorder(&watcher, |_, ctx| ctx.unsubscribe_from(&world))
        .unwrap()
        .unwrap();
    let destroyed = cluster.run_until(400, |cluster| cluster.destructions_of(&world) == 1);
    assert!(destroyed);
}

#[test]
fn a_message_during_the_lock_wait_keeps_the_channel() {
    let mut cluster = quick_destroy();
    let holder = cluster.create(0, "sender.h");
    let world = cluster.create(0, "world.13");

    cluster
        .recorder(&holder, |_, ctx| {
            ctx.request(&ChannelId::master(), messages::MASTER_LOCK, Payload::Empty)
        })
        .unwrap();
    let locked = cluster.run_until(20, |cluster| {
        cluster.recorder(&holder, |r, _| r.responses.len()).unwrap_or(0) == 1
    });
    assert!(locked);

    // idle past destroy_idle_ms, now queued behind the held lock
    cluster.run(80);
    assert_eq!(cluster.destructions_of(&world), 0);

    cluster
        .recorder(&holder, |_, ctx| ctx.send(&world, "note", Payload::from(json!(1))))
        .unwrap();
    cluster.run(5);
    cluster
        .recorder(&holder, |_, ctx| {
            ctx.send(&ChannelId::master(), messages::MASTER_UNLOCK, Payload::Empty)
        })
        .unwrap();
    cluster.run(20);

    assert_eq!(cluster.destructions_of(&world), 0);
    assert_eq!(
        cluster.recorder(&world, |r, _| r.notes()),
        Some(vec![json!(1)])
    );

    // the lock went back to the master, so the next idle spell ends normally
    let destroyed = cluster.run_until(400, |cluster| cluster.destructions_of(&world) == 1);
    assert!(destroyed);
}

#[test]
fn requested_shutdown_skips_the_idle_wait() {
    let mut cluster = TestCluster::new(1);
    let user = cluster.create(0, "user.3");

    cluster
        .recorder(&user, |_, ctx| ctx.request_shutdown())
        .unwrap();
    cluster.run(5);

    assert_eq!(cluster.destructions_of(&user), 1);
    assert!(!cluster.exchange.is_registered(&user));
}

#[test]
fn server_shutdown_destroys_everything() {
    let mut cluster = TestCluster::new(1);
    cluster.create(0, "sender.a");
    cluster.create(0, "world.1");

    cluster.servers[0].shutdown();
    let stopped = cluster.run_until(100, |cluster| cluster.servers[0].is_shut_down());

    assert!(stopped);
    assert!(cluster.servers[0].channel_ids().is_empty());
    assert!(!cluster.exchange.is_registered(&id("server.0")));
    assert_eq!(cluster.servers[0].load().channels, 0);
}
