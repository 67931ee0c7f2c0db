use std::collections::HashMap;

use serde_json::{json, Value};

use actorfabric_shared::{
    messages, packet::Payload, ChannelId, ErrorCode, MASTER_CHANNEL_TYPE, SERVER_CHANNEL_TYPE,
};

use crate::{
    registry::ChannelType,
    server::LoadReport,
    worker::{ChannelLogic, Inbound, Reply, RequestKey, WorkerContext, WorkerEffect},
};

/// Logic of `server.<server_id>`: the server's own address on the exchange.
/// Creates channels the master places here and asks the master to place
/// channels elsewhere.
#[derive(Default)]
pub(crate) struct ServerChannelLogic {
    pending_creates: HashMap<RequestKey, ChannelId>,
}

impl ServerChannelLogic {
    fn create_worker(&mut self, ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        let Some(channel) = inbound.payload.str_field("channel") else {
            return Reply::Err(ErrorCode::BadPayload);
        };
        let Ok(id) = ChannelId::parse(channel) else {
            return Reply::Err(ErrorCode::InvalidChannelId);
        };
        let waiter = inbound.response_handle();
        let deferred = waiter.is_some();
        ctx.push_effect(WorkerEffect::CreateLocal { id, waiter });
        if deferred {
            Reply::Deferred
        } else {
            Reply::Ack
        }
    }

    fn report_load(&mut self, ctx: &mut WorkerContext<'_>, _inbound: &Inbound) -> Reply {
        ctx.push_effect(WorkerEffect::ReportLoad);
        Reply::Ack
    }

    /// Asks the master to create `id` wherever it sees fit
    pub fn request_create(&mut self, ctx: &mut WorkerContext<'_>, id: &ChannelId) {
        let payload = Payload::from(json!({ "channel": id.to_string() }));
        let key = ctx.request(&ChannelId::master(), messages::CREATE_CHANNEL, payload);
        self.pending_creates.insert(key, id.clone());
    }

    pub fn send_load_report(ctx: &mut WorkerContext<'_>, report: &LoadReport) {
        let payload = Payload::from(serde_json::to_value(report).unwrap_or_default());
        ctx.send(&ChannelId::master(), messages::LOAD_REPORT, payload);
    }
}

impl ChannelLogic for ServerChannelLogic {
    fn on_response(
        &mut self,
        ctx: &mut WorkerContext<'_>,
        key: RequestKey,
        result: Result<Value, ErrorCode>,
    ) {
        if let Some(id) = self.pending_creates.remove(&key) {
            ctx.push_effect(WorkerEffect::CreationResolved {
                id,
                result: result.map(|_| ()),
            });
        }
    }
}

pub(crate) fn channel_type() -> ChannelType<ServerChannelLogic> {
    ChannelType::new(SERVER_CHANNEL_TYPE, |_| ServerChannelLogic::default())
        .volatile()
        .auto_destroy(false)
        .handler(messages::CREATE_WORKER, ServerChannelLogic::create_worker)
        .filter(
            MASTER_CHANNEL_TYPE,
            messages::REPORT_LOAD,
            ServerChannelLogic::report_load,
        )
}
