use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};

use crate::{ChannelServer, ServerEvents};

/// Ticks `server` every `tick_ms` of wall time and hands each batch of events
/// to `on_events` until it returns false.
///
/// Logical time advances by exactly `tick_ms` per tick, so a stalled runtime
/// slows the fabric down rather than making its timers fire in a burst.
pub async fn run(
    server: &mut ChannelServer,
    tick_ms: u64,
    mut on_events: impl FnMut(&mut ChannelServer, ServerEvents) -> bool,
) {
    let mut ticker = interval(Duration::from_millis(tick_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        server.tick(tick_ms);
        let events = server.receive();
        if !on_events(server, events) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use actorfabric_shared::{exchange::LocalExchangeHub, store::MemoryStoreHub, ChannelId};

    use super::run;
    use crate::{ChannelServer, ChannelTypeRegistry, CreateEvent, ServerConfig};

    #[tokio::test]
    async fn runs_until_the_callback_stops_it() {
        let exchange = LocalExchangeHub::new();
        let store = MemoryStoreHub::new();
        let mut server = ChannelServer::new(
            ServerConfig::default(),
            ChannelTypeRegistry::new(),
            Box::new(exchange.connect()),
            Box::new(store.connect()),
        )
        .unwrap();
        server.bootstrap().unwrap();
        let mut created = server.receive().read::<CreateEvent>().collect::<Vec<_>>();

        let mut ticks = 0;
        run(&mut server, 1, |_, mut events| {
            created.extend(events.read::<CreateEvent>());
            ticks += 1;
            ticks < 5
        })
        .await;

        assert_eq!(ticks, 5);
        assert_eq!(server.server_time(), 5);
        assert!(created.contains(&ChannelId::master()));
    }
}
