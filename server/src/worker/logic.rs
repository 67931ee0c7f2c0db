use serde_json::Value;

use actorfabric_shared::{ChannelId, DataKey, ErrorCode, FieldFilter};

use super::{ChannelDataUpdate, Inbound, Reply, RequestKey, WorkerContext};

/// Behavior of one channel type. Named messages go through the type's
/// `HandlerTable`; everything else arrives through these hooks, all of which
/// have defaults.
pub trait ChannelLogic: 'static {
    /// Runs before the channel's receiver is live; anything sent here goes
    /// out once it is
    fn on_create(&mut self, _ctx: &mut WorkerContext<'_>) {}

    fn on_tick(&mut self, _ctx: &mut WorkerContext<'_>) {}

    /// Resolution of a request made with `WorkerContext::request`,
    /// `subscribe_to` or `unsubscribe_from`
    fn on_response(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        _key: RequestKey,
        _result: Result<Value, ErrorCode>,
    ) {
    }

    /// Matches for a `WorkerContext::search_store`, as `(storage key,
    /// document)` pairs
    fn on_search(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        _key: RequestKey,
        _result: Result<Vec<(String, Value)>, ErrorCode>,
    ) {
    }

    /// A message with no handler in the table
    fn on_unhandled(&mut self, _ctx: &mut WorkerContext<'_>, _inbound: &Inbound) -> Reply {
        Reply::Err(ErrorCode::UnknownMessage)
    }

    /// Veto or react to a new subscriber before it is added
    fn on_subscribe(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        _inbound: &Inbound,
        _fields: &FieldFilter,
    ) -> Result<(), ErrorCode> {
        Ok(())
    }

    fn on_unsubscribe(&mut self, _ctx: &mut WorkerContext<'_>, _subscriber: &ChannelId) {}

    /// Data from a channel this one subscribed to; the mirror has already
    /// been updated
    fn on_channel_data(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        _source: &ChannelId,
        _update: &ChannelDataUpdate,
    ) {
    }

    /// Whether a `set_channel_data` message from another channel may write
    /// `key`. Client channels are refused unless overridden.
    fn allow_remote_write(&self, inbound: &Inbound, _key: &DataKey) -> bool {
        !inbound.is_from_client()
    }

    /// Called after a message or hook changed data, with the keys touched.
    /// Changes made here do not call it again.
    fn on_data_changed(&mut self, _ctx: &mut WorkerContext<'_>, _keys: &[DataKey]) {}

    /// The channel is going away; outstanding requests have already failed
    /// with `ERR_SHUTDOWN`
    fn on_destroy(&mut self, _ctx: &mut WorkerContext<'_>) {}
}
