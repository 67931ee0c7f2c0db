use actorfabric_server::{
    shared::{packet::Payload, ErrorCode},
    FabricServerError,
};
use actorfabric_test::{id, TestCluster};
use serde_json::json;

#[test]
fn rapid_writes_coalesce_and_never_overlap() {
    let mut cluster = TestCluster::with_config(1, |config| config.worker.commit_delay_ms = 20);
    cluster.store.set_latency(35);
    let sender = cluster.create(0, "sender.a");
    let world = cluster.create(0, "world.8");

    for round in 0..20 {
        let payload = Payload::from(json!({ "key": "public.score", "value": round }));
        cluster
            .recorder(&sender, |_, ctx| ctx.send(&world, "store", payload))
            .unwrap();
        cluster.tick();
    }
    let settled = cluster.run_until(200, |cluster| {
        cluster.store.get("world/8").map(|doc| doc["public"]["score"].clone()) == Some(json!(19))
    });

    assert!(settled);
    assert_eq!(cluster.store.max_concurrent_writes("world/8"), 1);
    let writes = cluster.store.writes_for("world/8");
    assert!(writes.len() < 20, "{} writes were not coalesced", writes.len());
}

#[test]
fn persisted_state_is_loaded_on_creation() {
    let mut cluster = TestCluster::new(1);
    cluster.store.insert(
        "world/4",
        json!({"public": {"name": "Ares"}, "private": {"seed": 4}}),
    );
    let world = cluster.create(0, "world.4");

    assert_eq!(
        cluster.servers[0].channel_data(&world),
        Some(json!({"public": {"name": "Ares"}, "private": {"seed": 4}}))
    );
}

#[test]
fn store_outages_surface_as_error_events() {
    let mut cluster = TestCluster::with_config(1, |config| {
        config.worker.commit_delay_ms = 10;
        config.shield.max_retries = 1;
        config.shield.backoff_base_ms = 10;
    });
    let world = cluster.create(0, "world.12");

    cluster.store.fail_next(10);
    cluster
        .recorder(&world, |_, ctx| ctx.set_channel_data("public.a", Some(json!(1))))
        .unwrap()
        .unwrap();
    cluster.run(50);

    assert!(cluster.errors.iter().any(|(_, error)| matches!(
        error,
        FabricServerError::StoreUnavailable { channel, .. } if channel == &world
    )));
    assert!(cluster.servers[0].shield_metrics().errors > 0);
    assert!(cluster.servers[0].has_channel(&id("world.12")));
}

#[test]
fn store_search_returns_documents_under_a_prefix() {
    let mut cluster = TestCluster::new(1);
    cluster.store.insert("world/1", json!({"public": {"name": "Ares"}}));
    cluster.store.insert("world/2", json!({"public": {"name": "Eos"}}));
    cluster.store.insert("user/9", json!({"public": {}}));
    let sender = cluster.create(0, "sender.a");

    let key = cluster
        .recorder(&sender, |_, ctx| ctx.search_store("world/"))
        .unwrap();
    let answered = cluster.run_until(50, |cluster| {
        cluster
            .recorder(&sender, |recorder, _| !recorder.searches.is_empty())
            .unwrap_or(false)
    });
    assert!(answered);

    let searches = cluster
        .recorder(&sender, |recorder, _| recorder.searches.clone())
        .unwrap();
    assert_eq!(searches.len(), 1);
    assert_eq!(searches[0].0, key);
    let mut keys: Vec<String> = searches[0]
        .1
        .as_ref()
        .unwrap()
        .iter()
        .map(|(key, _)| key.clone())
        .collect();
    keys.sort();
    assert_eq!(keys, vec!["world/1".to_string(), "world/2".to_string()]);
}

#[test]
fn oversized_message_names_fail_the_request() {
    let mut cluster = TestCluster::new(1);
    let sender = cluster.create(0, "sender.a");
    let world = cluster.create(0, "world.3");
    let name = "n".repeat(70_000);

    let key = cluster
        .recorder(&sender, |_, ctx| ctx.request(&world, &name, Payload::Empty))
        .unwrap();
    cluster.run(10);

    let responses = cluster
        .recorder(&sender, |recorder, _| recorder.responses.clone())
        .unwrap();
    assert_eq!(responses, vec![(key, Err(ErrorCode::NotAllowed))]);
    let received = cluster
        .recorder(&world, |recorder, _| recorder.received.len())
        .unwrap();
    assert_eq!(received, 0);
}
