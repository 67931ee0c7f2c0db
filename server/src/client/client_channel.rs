use std::{collections::HashMap, sync::Arc};

use log::{debug, warn};
use serde_json::{json, Value};

use actorfabric_shared::{messages, packet::Payload, ChannelId, ErrorCode, FieldFilter};

use super::{ClientConnection, ClientPush, ClientRequest};
use crate::worker::{
    AnyWorker, ChannelDataUpdate, ChannelLogic, ChannelWorker, HandlerTable, Inbound, Reply,
    RequestKey, WorkerContext, WorkerCore,
};

/// Logic of a `client.*` channel: one per end-user connection, translating
/// its frames into channel messages and mirroring pushes back out
pub(crate) struct ClientChannelLogic {
    connection: Box<dyn ClientConnection>,
    /// Requests made on the user's behalf, by the user's `resp_id`
    pending: HashMap<RequestKey, u32>,
}

impl ClientChannelLogic {
    fn new(connection: Box<dyn ClientConnection>) -> Self {
        Self {
            connection,
            pending: HashMap::new(),
        }
    }

    fn push(&mut self, push: &ClientPush) {
        match serde_json::to_string(push) {
            Ok(frame) => self.connection.send(frame),
            Err(error) => warn!("could not encode client push: {}", error),
        }
    }

    fn respond(&mut self, resp_id: u32, result: Result<Value, ErrorCode>) {
        let push = match result {
            Ok(data) => ClientPush::Response {
                resp_id,
                err: None,
                data,
            },
            Err(code) => ClientPush::Response {
                resp_id,
                err: Some(code),
                data: Value::Null,
            },
        };
        self.push(&push);
    }

    fn handle_frame(&mut self, ctx: &mut WorkerContext<'_>, frame: &str) {
        let request = match serde_json::from_str::<ClientRequest>(frame) {
            Ok(request) => request,
            Err(error) => {
                debug!("{} sent an unreadable frame: {}", ctx.channel_id(), error);
                return;
            }
        };

        match request {
            ClientRequest::Subscribe {
                resp_id,
                channel,
                fields,
            } => {
                let started = parse_channel(&channel).and_then(|dest| {
                    let fields = FieldFilter::from_field_list(fields.as_deref())
                        .map_err(|_| ErrorCode::InvalidDataKey)?;
                    ctx.subscribe_to(&dest, fields)
                });
                self.track(resp_id, started);
            }
            ClientRequest::Unsubscribe { resp_id, channel } => {
                let started = parse_channel(&channel).and_then(|dest| {
                    ctx.unsubscribe_from(&dest).ok_or(ErrorCode::NotSubscribed)
                });
                self.track(resp_id, started);
            }
            ClientRequest::ChannelMsg {
                resp_id,
                channel,
                msg,
                data,
            } => {
                let dest = match parse_channel(&channel) {
                    Ok(dest) => dest,
                    Err(code) => {
                        if let Some(resp_id) = resp_id {
                            self.respond(resp_id, Err(code));
                        }
                        return;
                    }
                };
                match resp_id {
                    Some(resp_id) => {
                        let key = ctx.request(&dest, &msg, Payload::from(data));
                        self.pending.insert(key, resp_id);
                    }
                    None => ctx.send(&dest, &msg, Payload::from(data)),
                }
            }
            ClientRequest::SetChannelData {
                resp_id,
                channel,
                key,
                value,
            } => {
                let started = parse_channel(&channel).map(|dest| {
                    let mut payload = json!({ "key": key });
                    if let Some(value) = value {
                        payload["value"] = value;
                    }
                    ctx.request(&dest, messages::SET_CHANNEL_DATA, Payload::Json(payload))
                });
                self.track(resp_id, started);
            }
            ClientRequest::Login {
                resp_id,
                user_id,
                display_name,
            } => {
                ctx.set_identity(Some(json!({
                    "user_id": user_id,
                    "display_name": display_name,
                })));
                self.respond(resp_id, Ok(Value::Null));
            }
            ClientRequest::Logout { resp_id } => {
                ctx.set_identity(None);
                self.respond(resp_id, Ok(Value::Null));
            }
        }
    }

    fn track(&mut self, resp_id: u32, started: Result<RequestKey, ErrorCode>) {
        match started {
            Ok(key) => {
                self.pending.insert(key, resp_id);
            }
            Err(code) => self.respond(resp_id, Err(code)),
        }
    }
}

fn parse_channel(channel: &str) -> Result<ChannelId, ErrorCode> {
    ChannelId::parse(channel).map_err(|_| ErrorCode::InvalidChannelId)
}

impl ChannelLogic for ClientChannelLogic {
    fn on_tick(&mut self, ctx: &mut WorkerContext<'_>) {
        while let Some(frame) = self.connection.receive() {
            self.handle_frame(ctx, &frame);
        }
        if !self.connection.is_connected() {
            debug!("{} disconnected", ctx.channel_id());
            ctx.request_shutdown();
        }
    }

    fn on_response(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        key: RequestKey,
        result: Result<Value, ErrorCode>,
    ) {
        if let Some(resp_id) = self.pending.remove(&key) {
            self.respond(resp_id, result);
        }
    }

    fn on_unhandled(&mut self, _ctx: &mut WorkerContext<'_>, inbound: &Inbound) -> Reply {
        self.push(&ClientPush::Message {
            channel: inbound.source.clone(),
            msg: inbound.message.clone(),
            data: inbound.payload.to_json(),
        });
        Reply::Ack
    }

    fn on_channel_data(
        &mut self,
        _ctx: &mut WorkerContext<'_>,
        source: &ChannelId,
        update: &ChannelDataUpdate,
    ) {
        // snapshots reach the user as the subscribe response
        if let ChannelDataUpdate::Ops(ops) = update {
            self.push(&ClientPush::ApplyChannelData {
                channel: source.clone(),
                ops: ops.clone(),
            });
        }
    }
}

pub(crate) fn client_worker(
    core: WorkerCore,
    connection: Box<dyn ClientConnection>,
) -> Box<dyn AnyWorker> {
    Box::new(ChannelWorker::new(
        core,
        ClientChannelLogic::new(connection),
        Arc::new(HandlerTable::new()),
    ))
}
