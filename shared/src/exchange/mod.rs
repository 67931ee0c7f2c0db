mod error;
pub use error::ExchangeError;

cfg_if! {
    if #[cfg(feature = "local_backends")] {
        mod link_conditioner;
        mod local_exchange;

        pub use link_conditioner::LinkConditionerConfig;
        pub use local_exchange::{LocalExchange, LocalExchangeHub};
    }
}

use crate::ChannelId;

/// A packet pulled off an Exchange endpoint, tagged with the id it was
/// published to (a registered channel id, or a broadcast id this endpoint
/// subscribed to)
pub struct ExchangeDelivery {
    pub addressed: ChannelId,
    pub payload: Box<[u8]>,
}

/// At-most-once pub/sub transport keyed by channel id.
///
/// Delivery between unrelated links is unordered; ordering is rebuilt on top
/// of this by per-link sequence numbers. Implementations are polled: the
/// owning server drains `receive()` once per tick.
pub trait Exchange {
    /// Installs this endpoint as the exclusive receiver for `id`
    fn register(&mut self, id: &ChannelId) -> Result<(), ExchangeError>;

    /// Removes this endpoint's exclusive registration for `id`, if it holds it
    fn unregister(&mut self, id: &ChannelId);

    /// Adds this endpoint to the broadcast fan-out for `id`
    fn subscribe(&mut self, id: &ChannelId) -> Result<(), ExchangeError>;

    fn unsubscribe(&mut self, id: &ChannelId);

    /// Delivers to the registered receiver for `dest`, or to every
    /// subscriber if none is registered. Fails with `NotFound` if neither
    /// exists.
    fn publish(&mut self, dest: &ChannelId, payload: &[u8]) -> Result<(), ExchangeError>;

    fn receive(&mut self) -> Option<ExchangeDelivery>;
}
