use serde_json::Value;

use actorfabric_shared::{
    messages, packet::Payload, ChannelId, DataKey, ErrorCode, FieldFilter, PingCount, ServerTime,
};

use super::{
    handlers::ResponseHandle,
    requests::{RequestKey, RequestPurpose},
    worker_core::{WorkerCore, WorkerEffect},
};

/// Everything a channel's logic may do to its own worker while handling a
/// message or a hook
pub struct WorkerContext<'a> {
    core: &'a mut WorkerCore,
}

impl<'a> WorkerContext<'a> {
    pub(crate) fn new(core: &'a mut WorkerCore) -> Self {
        Self { core }
    }

    pub fn channel_id(&self) -> &ChannelId {
        &self.core.id
    }

    /// Logical milliseconds since the server started
    pub fn server_time(&self) -> ServerTime {
        self.core.now
    }

    pub fn ping_count(&self) -> PingCount {
        self.core.ping_count
    }

    pub fn public(&self) -> &Value {
        self.core.public()
    }

    pub fn private(&self) -> &Value {
        &self.core.data["private"]
    }

    // Channel data

    /// Reads `public.*` or `private.*` at a dotted path
    pub fn get_channel_data(&self, key: &str) -> Result<Option<&Value>, ErrorCode> {
        let key = parse_key(key)?;
        Ok(self.core.data_at(&key))
    }

    /// Sets `key` to `value`, or deletes it when `value` is `None`
    pub fn set_channel_data(&mut self, key: &str, value: Option<Value>) -> Result<(), ErrorCode> {
        let key = parse_key(key)?;
        self.core.write_data(&key, value);
        Ok(())
    }

    /// Compare-and-set: applies only if the current value equals `expected`
    /// (`None` meaning the key is absent)
    pub fn set_channel_data_if(
        &mut self,
        key: &str,
        value: Option<Value>,
        expected: Option<&Value>,
    ) -> Result<(), ErrorCode> {
        let key = parse_key(key)?;
        if self.core.data_at(&key) != expected {
            return Err(ErrorCode::Mismatch);
        }
        self.core.write_data(&key, value);
        Ok(())
    }

    /// Applies several changes as one broadcast and one commit. Nothing is
    /// applied if any key is invalid.
    pub fn set_channel_data_multiple(
        &mut self,
        changes: Vec<(&str, Option<Value>)>,
    ) -> Result<(), ErrorCode> {
        let parsed = changes
            .into_iter()
            .map(|(key, value)| parse_key(key).map(|key| (key, value)))
            .collect::<Result<Vec<_>, _>>()?;
        self.core.begin_batch();
        for (key, value) in parsed {
            self.core.write_data(&key, value);
        }
        self.core.end_batch();
        Ok(())
    }

    /// Holds public changes back from subscribers until the matching
    /// `end_batch`. Batches nest.
    pub fn begin_batch(&mut self) {
        self.core.begin_batch();
    }

    pub fn end_batch(&mut self) {
        self.core.end_batch();
    }

    // Messaging

    /// Fire-and-forget message; created on demand if `dest` allows autocreate
    pub fn send(&mut self, dest: &ChannelId, message: &str, payload: Payload) {
        self.core.last_activity = self.core.now;
        self.core.send_message(dest, message, payload);
    }

    /// Message expecting a response, delivered later to
    /// `ChannelLogic::on_response` with the returned key
    pub fn request(&mut self, dest: &ChannelId, message: &str, payload: Payload) -> RequestKey {
        self.core.last_activity = self.core.now;
        self.core.request(dest, message, payload, RequestPurpose::User)
    }

    /// Answers a request whose handler returned `Reply::Deferred`
    pub fn respond(&mut self, handle: ResponseHandle, result: Result<Value, ErrorCode>) {
        self.core.respond(handle, result);
    }

    // Subscriptions

    /// Subscribes this channel to `dest`'s public data. The snapshot arrives
    /// through `on_channel_data` before `on_response` sees the same key.
    pub fn subscribe_to(
        &mut self,
        dest: &ChannelId,
        fields: FieldFilter,
    ) -> Result<RequestKey, ErrorCode> {
        if self.core.subscriptions.contains_key(dest) {
            return Err(ErrorCode::AlreadySubscribed);
        }
        let payload = match fields.to_field_list() {
            Some(fields) => Payload::Json(serde_json::json!({ "fields": fields })),
            None => Payload::Empty,
        };
        self.core.last_activity = self.core.now;
        Ok(self.core.request(
            dest,
            messages::SUBSCRIBE,
            payload,
            RequestPurpose::Subscribe(dest.clone()),
        ))
    }

    pub fn unsubscribe_from(&mut self, dest: &ChannelId) -> Option<RequestKey> {
        self.core.subscriptions.remove(dest)?;
        self.core.last_activity = self.core.now;
        Some(self.core.request(
            dest,
            messages::UNSUBSCRIBE,
            Payload::Empty,
            RequestPurpose::User,
        ))
    }

    /// Mirror of a subscribed channel's public data
    pub fn subscribed_data(&self, dest: &ChannelId) -> Option<&Value> {
        self.core.subscriptions.get(dest)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &ChannelId> {
        self.core.subscriptions.keys()
    }

    pub fn subscriber_count(&self) -> usize {
        self.core.subscriber_count()
    }

    pub fn is_subscriber(&self, id: &ChannelId) -> bool {
        self.core.subscribers.contains_key(id)
    }

    // Identity

    /// Metadata attached to every packet this channel sends
    pub fn identity(&self) -> Option<&Value> {
        self.core.identity.as_ref()
    }

    pub fn set_identity(&mut self, identity: Option<Value>) {
        self.core.identity = identity;
    }

    /// Destroys this channel without waiting for it to go idle
    pub fn request_shutdown(&mut self) {
        self.core.lifecycle.request_shutdown();
    }

    /// Reads every stored channel document whose storage key starts with
    /// `prefix` (`user/` for all `user.*` channels). The matches arrive in
    /// `ChannelLogic::on_search` with the returned key.
    pub fn search_store(&mut self, prefix: &str) -> RequestKey {
        let key = self.core.requests.next_key();
        self.core.searches.insert(key);
        self.core.push_effect(WorkerEffect::Search {
            key,
            prefix: prefix.to_string(),
        });
        key
    }

    pub fn rng(&mut self) -> &mut fastrand::Rng {
        &mut self.core.rng
    }

    pub(crate) fn push_effect(&mut self, effect: WorkerEffect) {
        self.core.push_effect(effect);
    }
}

fn parse_key(key: &str) -> Result<DataKey, ErrorCode> {
    DataKey::parse(key).map_err(|_| ErrorCode::InvalidDataKey)
}
