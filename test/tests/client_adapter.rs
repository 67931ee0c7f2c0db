use actorfabric_server::{
    shared::{packet::Payload, ErrorCode},
    ClientPush, DataOp,
};
use actorfabric_test::{id, TestCluster, TestConnection};
use serde_json::{json, Value};

fn response(connection: &TestConnection, resp_id: u32) -> Option<(Option<ErrorCode>, Value)> {
    connection.pushes().into_iter().find_map(|push| match push {
        ClientPush::Response {
            resp_id: id,
            err,
            data,
        } if id == resp_id => Some((err, data)),
        _ => None,
    })
}

fn connect(cluster: &mut TestCluster, subid: &str) -> TestConnection {
    let connection = TestConnection::new();
    cluster.servers[0]
        .connect_client(subid, Box::new(connection.clone()))
        .expect("connect client");
    connection
}

#[test]
fn subscriptions_stream_channel_data_to_the_user() {
    let mut cluster = TestCluster::new(2);
    let connection = connect(&mut cluster, "c1");
    let writer = cluster.create(1, "sender.w");

    connection.user_send(json!({"type": "subscribe", "resp_id": 1, "channel": "world.9"}));
    let subscribed = cluster.run_until(200, |_| response(&connection, 1).is_some());
    assert!(subscribed);
    assert_eq!(response(&connection, 1), Some((None, json!({}))));

    let world = id("world.9");
    let payload = Payload::from(json!({ "key": "public.title", "value": "hi" }));
    cluster
        .recorder(&writer, |_, ctx| ctx.send(&world, "store", payload))
        .unwrap();
    cluster.run(20);

    let applied: Vec<ClientPush> = connection
        .pushes()
        .into_iter()
        .filter(|push| matches!(push, ClientPush::ApplyChannelData { .. }))
        .collect();
    assert_eq!(
        applied,
        vec![ClientPush::ApplyChannelData {
            channel: world,
            ops: vec![DataOp::new("title", Some(json!("hi")))],
        }]
    );
}

#[test]
fn users_reach_only_client_handlers() {
    let mut cluster = TestCluster::new(1);
    let connection = connect(&mut cluster, "c2");
    cluster.create(0, "world.10");

    connection.user_send(json!({
        "type": "channel_msg", "resp_id": 2, "channel": "world.10", "msg": "echo", "data": {"x": 1},
    }));
    connection.user_send(json!({
        "type": "channel_msg", "resp_id": 3, "channel": "world.10", "msg": "store",
        "data": {"key": "public.x", "value": 1},
    }));
    connection.user_send(json!({
        "type": "set_channel_data", "resp_id": 4, "channel": "world.10", "key": "public.x", "value": 1,
    }));
    cluster.run(20);

    assert_eq!(response(&connection, 2), Some((None, json!({"x": 1}))));
    assert_eq!(
        response(&connection, 3),
        Some((Some(ErrorCode::NotAllowed), Value::Null))
    );
    assert_eq!(
        response(&connection, 4),
        Some((Some(ErrorCode::NotAllowed), Value::Null))
    );
}

#[test]
fn login_gates_subscriptions() {
    let mut cluster = TestCluster::new(1);
    let connection = connect(&mut cluster, "c3");

    connection.user_send(json!({"type": "subscribe", "resp_id": 1, "channel": "room.1"}));
    cluster.run_until(100, |_| response(&connection, 1).is_some());
    assert_eq!(
        response(&connection, 1),
        Some((Some(ErrorCode::LoginRequired), Value::Null))
    );

    connection.user_send(json!({"type": "login", "resp_id": 2, "user_id": "u1", "display_name": "Nova"}));
    connection.user_send(json!({"type": "subscribe", "resp_id": 3, "channel": "room.1"}));
    cluster.run_until(100, |_| response(&connection, 3).is_some());

    assert_eq!(response(&connection, 2), Some((None, Value::Null)));
    assert_eq!(response(&connection, 3), Some((None, json!({}))));
    assert_eq!(cluster.servers[0].subscriber_count(&id("room.1")), Some(1));
}

#[test]
fn disconnecting_destroys_the_client_channel() {
    let mut cluster = TestCluster::new(1);
    let connection = connect(&mut cluster, "c4");
    let client = id("client.c4");
    connection.user_send(json!({"type": "subscribe", "resp_id": 1, "channel": "user.5"}));
    cluster.run(20);
    assert_eq!(cluster.servers[0].subscriber_count(&id("user.5")), Some(1));

    connection.disconnect();
    cluster.run(10);

    assert_eq!(cluster.destructions_of(&client), 1);
    assert_eq!(cluster.servers[0].subscriber_count(&id("user.5")), Some(0));
}
