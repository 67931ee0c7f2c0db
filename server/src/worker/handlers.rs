use std::collections::{HashMap, HashSet};

use serde_json::Value;

use actorfabric_shared::{packet::Payload, ChannelId, ErrorCode, RequestId};

use super::WorkerContext;

/// A named message as seen by a handler
#[derive(Debug, Clone)]
pub struct Inbound {
    pub source: ChannelId,
    /// The id the packet was published to; differs from the receiving
    /// channel's own id for broadcasts
    pub addressed: ChannelId,
    pub identity: Option<Value>,
    pub message: String,
    pub request_id: Option<RequestId>,
    pub payload: Payload,
}

impl Inbound {
    /// Where to send the answer, if the sender asked for one
    pub fn response_handle(&self) -> Option<ResponseHandle> {
        self.request_id.map(|request_id| ResponseHandle {
            to: self.source.clone(),
            request_id,
        })
    }

    pub fn is_from_client(&self) -> bool {
        self.source.is_client()
    }

    /// `user_id` from the sender's identity metadata, present once logged in
    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref()?.get("user_id")?.as_str()
    }

    pub fn display_name(&self) -> Option<&str> {
        self.identity.as_ref()?.get("display_name")?.as_str()
    }
}

/// Lets a handler answer a request after returning `Reply::Deferred`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseHandle {
    pub(crate) to: ChannelId,
    pub(crate) request_id: RequestId,
}

impl ResponseHandle {
    pub fn requester(&self) -> &ChannelId {
        &self.to
    }
}

/// What a handler wants sent back to the requester
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Value),
    /// Success with no data
    Ack,
    Err(ErrorCode),
    /// The handler kept the `ResponseHandle` and will respond later
    Deferred,
}

impl Reply {
    pub(crate) fn into_result(self) -> Option<Result<Value, ErrorCode>> {
        match self {
            Reply::Ok(value) => Some(Ok(value)),
            Reply::Ack => Some(Ok(Value::Null)),
            Reply::Err(code) => Some(Err(code)),
            Reply::Deferred => None,
        }
    }
}

impl From<Result<Value, ErrorCode>> for Reply {
    fn from(result: Result<Value, ErrorCode>) -> Self {
        match result {
            Ok(value) => Reply::Ok(value),
            Err(code) => Reply::Err(code),
        }
    }
}

impl From<Result<(), ErrorCode>> for Reply {
    fn from(result: Result<(), ErrorCode>) -> Self {
        match result {
            Ok(()) => Reply::Ack,
            Err(code) => Reply::Err(code),
        }
    }
}

pub type HandlerFn<L> = fn(&mut L, &mut WorkerContext<'_>, &Inbound) -> Reply;

pub(crate) enum Lookup<L> {
    Handler(HandlerFn<L>),
    NotAllowed,
    Missing,
}

/// Message name -> handler, built once per channel type at registration
pub struct HandlerTable<L> {
    handlers: HashMap<String, HandlerFn<L>>,
    client_allowed: HashSet<String>,
    /// Handlers for broadcasts, keyed by (sender type, message)
    filters: HashMap<(String, String), HandlerFn<L>>,
}

impl<L> Default for HandlerTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> HandlerTable<L> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            client_allowed: HashSet::new(),
            filters: HashMap::new(),
        }
    }

    pub fn insert(&mut self, message: &str, handler: HandlerFn<L>) {
        self.handlers.insert(message.to_string(), handler);
    }

    /// Inserts a handler that `client.*` channels may also invoke
    pub fn insert_client(&mut self, message: &str, handler: HandlerFn<L>) {
        self.insert(message, handler);
        self.client_allowed.insert(message.to_string());
    }

    pub fn insert_filter(&mut self, source_type: &str, message: &str, handler: HandlerFn<L>) {
        self.filters
            .insert((source_type.to_string(), message.to_string()), handler);
    }

    pub fn contains(&self, message: &str) -> bool {
        self.handlers.contains_key(message)
    }

    pub(crate) fn lookup(&self, source: &ChannelId, message: &str) -> Lookup<L> {
        if let Some(handler) = self
            .filters
            .get(&(source.kind().to_string(), message.to_string()))
        {
            return Lookup::Handler(*handler);
        }
        if source.is_client() && !self.client_allowed.contains(message) {
            return Lookup::NotAllowed;
        }
        match self.handlers.get(message) {
            Some(handler) => Lookup::Handler(*handler),
            None => Lookup::Missing,
        }
    }
}

#[cfg(test)]
mod tests {
    use actorfabric_shared::ChannelId;

    use super::{HandlerTable, Inbound, Lookup, Reply};
    use crate::worker::WorkerContext;

    struct Lobby;

    fn greet(_: &mut Lobby, _: &mut WorkerContext<'_>, _: &Inbound) -> Reply {
        Reply::Ack
    }

    fn id(s: &str) -> ChannelId {
        ChannelId::parse(s).unwrap()
    }

    #[test]
    fn clients_only_reach_client_handlers() {
        let mut table = HandlerTable::<Lobby>::new();
        table.insert("kick", greet);
        table.insert_client("chat", greet);

        assert!(matches!(table.lookup(&id("user.1"), "kick"), Lookup::Handler(_)));
        assert!(matches!(table.lookup(&id("client.a"), "kick"), Lookup::NotAllowed));
        assert!(matches!(table.lookup(&id("client.a"), "chat"), Lookup::Handler(_)));
        assert!(matches!(table.lookup(&id("user.1"), "dance"), Lookup::Missing));
    }

    #[test]
    fn filters_win_for_matching_sender_type() {
        let mut table = HandlerTable::<Lobby>::new();
        table.insert_filter("master", "report_load", greet);
        assert!(matches!(
            table.lookup(&id("master.master"), "report_load"),
            Lookup::Handler(_)
        ));
        assert!(matches!(
            table.lookup(&id("user.1"), "report_load"),
            Lookup::Missing
        ));
    }
}
