use actorfabric_server::{
    shared::{ChannelId, ErrorCode},
    ChannelDataUpdate, ChannelLogic, ChannelType, ChannelTypeRegistry, Inbound, Placement, Reply,
    RequestKey, WorkerContext,
};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub source: ChannelId,
    pub message: String,
    pub payload: Value,
}

/// Remembers everything that happens to it, for assertions
#[derive(Default)]
pub struct Recorder {
    pub received: Vec<Received>,
    pub responses: Vec<(RequestKey, Result<Value, ErrorCode>)>,
    pub updates: Vec<(ChannelId, ChannelDataUpdate)>,
    pub searches: Vec<(RequestKey, Result<Vec<(String, Value)>, ErrorCode>)>,
    pub subscribers_seen: Vec<ChannelId>,
    /// Public data as loaded when the channel was created
    pub created_with: Option<Value>,
}

impl Recorder {
    fn note(&mut self, _ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        self.received.push(Received {
            source: inbound.source.clone(),
            message: inbound.message.clone(),
            payload: inbound.payload.to_json(),
        });
        Reply::Ack
    }

    fn echo(&mut self, _ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        Reply::Ok(inbound.payload.to_json())
    }

    /// Writes `{"key", "value"}` into this channel's own data
    fn store(&mut self, ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        let Some(key) = inbound.payload.str_field("key") else {
            return Reply::Err(ErrorCode::BadPayload);
        };
        let value = inbound.payload.json().and_then(|json| json.get("value")).cloned();
        ctx.set_channel_data(key, value).into()
    }

    pub fn notes(&self) -> Vec<Value> {
        self.received
            .iter()
            .filter(|received| received.message == "note")
            .map(|received| received.payload.clone())
            .collect()
    }

    pub fn ops(&self, source: &ChannelId) -> Vec<ChannelDataUpdate> {
        self.updates
            .iter()
            .filter(|(from, update)| from == source && matches!(update, ChannelDataUpdate::Ops(_)))
            .map(|(_, update)| update.clone())
            .collect()
    }
}

impl ChannelLogic for Recorder {
    fn on_create(&mut self, ctx: &mut WorkerContext<'_>) {
        self.created_with = Some(ctx.public().clone());
    }

    fn on_response(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        key: RequestKey,
        result: Result<Value, ErrorCode>,
    ) {
        self.responses.push((key, result));
    }

    fn on_search(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        key: RequestKey,
        result: Result<Vec<(String, Value)>, ErrorCode>,
    ) {
        self.searches.push((key, result));
    }

    fn on_unhandled(&mut self, ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        self.note(ctx, inbound)
    }

    fn on_subscribe(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        inbound: &Inbound,
        _fields: &actorfabric_server::shared::FieldFilter,
    ) -> Result<(), ErrorCode> {
        self.subscribers_seen.push(inbound.source.clone());
        Ok(())
    }

    fn on_channel_data(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        source: &ChannelId,
        update: &ChannelDataUpdate,
    ) {
        self.updates.push((source.clone(), update.clone()));
    }
}

/// Types every test cluster knows:
/// - `sender`, `watcher`: created explicitly, never auto-destroyed
/// - `world`: persisted, autocreated by the master for numeric subids
/// - `user`: volatile, autocreated locally
/// - `room`: subscribers must be logged in
pub fn test_registry() -> ChannelTypeRegistry {
    let mut registry = ChannelTypeRegistry::new();
    for name in ["sender", "watcher"] {
        registry
            .register(
                ChannelType::new(name, |_| Recorder::default())
                    .auto_destroy(false)
                    .handler("note", Recorder::note),
            )
            .expect("register");
    }
    let world = ChannelType::new("world", |_| Recorder::default())
        .autocreate()
        .subid_pattern("^[0-9]+$")
        .expect("pattern")
        .placement(Placement::Master)
        .persisted()
        .handler("note", Recorder::note)
        .handler("store", Recorder::store)
        .client_handler("echo", Recorder::echo);
    registry.register(world).expect("register");
    registry
        .register(
            ChannelType::new("user", |_| Recorder::default())
                .autocreate()
                .handler("note", Recorder::note)
                .handler("store", Recorder::store),
        )
        .expect("register");
    registry
        .register(
            ChannelType::new("room", |_| Recorder::default())
                .autocreate()
                .require_login()
                .auto_destroy(false)
                .client_handler("note", Recorder::note),
        )
        .expect("register");
    registry
}
