use actorfabric_server::{
    shared::{packet::Payload, ErrorCode, FieldFilter},
    ChannelDataUpdate, DataOp,
};
use actorfabric_test::TestCluster;
use serde_json::json;

fn display_name_only() -> FieldFilter {
    FieldFilter::from_field_list(Some(&["public.display_name".to_string()])).unwrap()
}

#[test]
fn filtered_and_unfiltered_subscribers_see_the_same_push() {
    let mut cluster = TestCluster::new(1);
    let user = cluster.create(0, "user.42");
    let filtered = cluster.create(0, "watcher.a");
    let unfiltered = cluster.create(0, "watcher.b");

    cluster
        .recorder(&filtered, |_, ctx| ctx.subscribe_to(&user, display_name_only()))
        .unwrap()
        .unwrap();
    cluster
        .recorder(&unfiltered, |_, ctx| ctx.subscribe_to(&user, FieldFilter::All))
        .unwrap()
        .unwrap();
    let subscribed = cluster.run_until(50, |cluster| {
        cluster.servers[0].subscriber_count(&user) == Some(2)
    });
    assert!(subscribed);
    cluster.run(5);

    cluster
        .recorder(&user, |_, ctx| {
            ctx.set_channel_data("public.display_name", Some(json!("Nova")))
        })
        .unwrap()
        .unwrap();
    cluster.run(10);

    let expected = vec![ChannelDataUpdate::Ops(vec![DataOp::new(
        "display_name",
        Some(json!("Nova")),
    )])];
    let filtered_ops = cluster.recorder(&filtered, |r, _| r.ops(&user)).unwrap();
    let unfiltered_ops = cluster.recorder(&unfiltered, |r, _| r.ops(&user)).unwrap();
    assert_eq!(filtered_ops, expected);
    assert_eq!(unfiltered_ops, expected);

    // a field outside the filter only reaches the unfiltered subscriber
    cluster
        .recorder(&user, |_, ctx| ctx.set_channel_data("public.level", Some(json!(3))))
        .unwrap()
        .unwrap();
    cluster.run(10);

    assert_eq!(cluster.recorder(&filtered, |r, _| r.ops(&user)).unwrap().len(), 1);
    assert_eq!(cluster.recorder(&unfiltered, |r, _| r.ops(&user)).unwrap().len(), 2);
    assert_eq!(
        cluster
            .recorder(&filtered, |_, ctx| ctx.subscribed_data(&user).cloned())
            .unwrap(),
        Some(json!({"display_name": "Nova"}))
    );
    assert_eq!(
        cluster
            .recorder(&unfiltered, |_, ctx| ctx.subscribed_data(&user).cloned())
            .unwrap(),
        Some(json!({"display_name": "Nova", "level": 3}))
    );
}

#[test]
fn batched_writes_arrive_as_one_push() {
    let mut cluster = TestCluster::new(1);
    let user = cluster.create(0, "user.7");
    let watcher = cluster.create(0, "watcher.a");
    cluster
        .recorder(&watcher, |_, ctx| ctx.subscribe_to(&user, FieldFilter::All))
        .unwrap()
        .unwrap();
    cluster.run(10);

    cluster
        .recorder(&user, |_, ctx| {
            ctx.set_channel_data_multiple(vec![
                ("public.x", Some(json!(1))),
                ("public.y", Some(json!(2))),
                ("private.secret", Some(json!("hidden"))),
            ])
        })
        .unwrap()
        .unwrap();
    cluster.run(10);

    let ops = cluster.recorder(&watcher, |r, _| r.ops(&user)).unwrap();
    assert_eq!(
        ops,
        vec![ChannelDataUpdate::Ops(vec![
            DataOp::new("x", Some(json!(1))),
            DataOp::new("y", Some(json!(2))),
        ])]
    );
}

#[test]
fn concurrent_compare_and_set_has_one_winner() {
    let mut cluster = TestCluster::new(2);
    let world = cluster.create(0, "world.3");
    let racer_a = cluster.create(0, "sender.a");
    let racer_b = cluster.create(1, "sender.b");

    for (racer, value) in [(&racer_a, "a"), (&racer_b, "b")] {
        let payload = Payload::from(json!({ "key": "public.owner", "value": value }));
        cluster
            .recorder(racer, |_, ctx| ctx.request(&world, "set_channel_data_if", payload))
            .unwrap();
    }
    let answered = cluster.run_until(100, |cluster| {
        let a = cluster.recorder(&racer_a, |r, _| r.responses.len()).unwrap();
        let b = cluster.recorder(&racer_b, |r, _| r.responses.len()).unwrap();
        a == 1 && b == 1
    });
    assert!(answered);

    let a = cluster.recorder(&racer_a, |r, _| r.responses[0].1.clone()).unwrap();
    let b = cluster.recorder(&racer_b, |r, _| r.responses[0].1.clone()).unwrap();
    let winner = match (&a, &b) {
        (Ok(_), Err(ErrorCode::Mismatch)) => "a",
        (Err(ErrorCode::Mismatch), Ok(_)) => "b",
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    let data = cluster.servers[cluster.host_of(&world).unwrap()]
        .channel_data(&world)
        .unwrap();
    assert_eq!(data["public"]["owner"], json!(winner));
}

#[test]
fn remote_writes_reject_keys_outside_public_and_private() {
    let mut cluster = TestCluster::new(1);
    let user = cluster.create(0, "user.9");
    let sender = cluster.create(0, "sender.a");

    let payload = Payload::from(json!({ "key": "nonsense", "value": 1 }));
    cluster
        .recorder(&sender, |_, ctx| ctx.request(&user, "set_channel_data", payload))
        .unwrap();
    cluster.run(10);

    let responses = cluster.recorder(&sender, |r, _| r.responses.clone()).unwrap();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].1, Err(ErrorCode::InvalidDataKey));
}
