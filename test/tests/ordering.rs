use actorfabric_server::shared::{exchange::LinkConditionerConfig, packet::Payload};
use actorfabric_test::{id, TestCluster};
use proptest::prelude::*;
use serde_json::{json, Value};

fn send_notes(cluster: &mut TestCluster, from: &str, to: &str, notes: impl Iterator<Item = u64>) {
    let sender = id(from);
    let dest = id(to);
    for note in notes {
        cluster
            .recorder(&sender, |_, ctx| {
                ctx.send(&dest, "note", Payload::from(json!(note)))
            })
            .expect("sender exists");
    }
}

fn notes_at(cluster: &mut TestCluster, channel: &str) -> Vec<Value> {
    cluster
        .recorder(&id(channel), |recorder, _| recorder.notes())
        .unwrap_or_default()
}

#[test]
fn messages_arrive_in_send_order() {
    let mut cluster = TestCluster::new(2);
    cluster.create(0, "sender.a");

    send_notes(&mut cluster, "sender.a", "world.1", 0..100);
    let delivered = cluster.run_until(300, |cluster| notes_at(cluster, "world.1").len() == 100);

    assert!(delivered);
    let expected: Vec<Value> = (0..100).map(|note| json!(note)).collect();
    assert_eq!(notes_at(&mut cluster, "world.1"), expected);
}

#[test]
fn lost_packets_do_not_stall_the_link() {
    let mut cluster = TestCluster::new(1);
    cluster.create(0, "sender.a");
    cluster.create(0, "world.2");

    cluster
        .exchange
        .set_conditioner(Some(LinkConditionerConfig::new(0.2, 0.0, 0.0).with_seed(7)));
    send_notes(&mut cluster, "sender.a", "world.2", 0..50);
    cluster.run(100);

    cluster.exchange.set_conditioner(None);
    send_notes(&mut cluster, "sender.a", "world.2", std::iter::once(999));
    let delivered = cluster.run_until(300, |cluster| {
        notes_at(cluster, "world.2").last() == Some(&json!(999))
    });
    assert!(delivered, "the link never recovered from the gap");

    let notes: Vec<u64> = notes_at(&mut cluster, "world.2")
        .iter()
        .filter_map(Value::as_u64)
        .collect();
    assert!(
        notes.windows(2).all(|pair| pair[0] < pair[1]),
        "notes out of order or duplicated: {:?}",
        notes
    );
    assert_eq!(cluster.servers[0].buffered_packets(&id("world.2")), Some(0));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Reordering and duplication at the exchange never change what the
    /// receiver sees
    #[test]
    fn prop_shuffled_links_deliver_exactly_once_in_order(
        seed in 0u64..10_000,
        duplicate_chance in 0.0f32..0.3,
        reorder_chance in 0.0f32..0.5,
        count in 1u64..40,
    ) {
        let mut cluster = TestCluster::new(1);
        cluster.create(0, "sender.a");
        cluster.create(0, "world.3");
        cluster.exchange.set_conditioner(Some(
            LinkConditionerConfig::new(0.0, duplicate_chance, reorder_chance).with_seed(seed),
        ));

        send_notes(&mut cluster, "sender.a", "world.3", 0..count);
        let delivered = cluster.run_until(400, |cluster| {
            notes_at(cluster, "world.3").len() as u64 >= count
        });
        cluster.run(10);

        prop_assert!(delivered);
        let expected: Vec<Value> = (0..count).map(|note| json!(note)).collect();
        prop_assert_eq!(notes_at(&mut cluster, "world.3"), expected);
    }
}
