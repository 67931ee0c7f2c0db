use std::{collections::HashMap, sync::Arc};

use regex::Regex;
use thiserror::Error;

use actorfabric_shared::{
    ChannelId, ErrorCode, BROADCAST_CHANNEL_TYPE, CLIENT_CHANNEL_TYPE, MASTER_CHANNEL_TYPE,
    SERVER_CHANNEL_TYPE,
};

use crate::worker::{
    AnyWorker, ChannelLogic, ChannelWorker, HandlerFn, HandlerTable, WorkerCore, WorkerInit,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// `server`, `client`, `master` and `broadcast` belong to the fabric
    #[error("Channel type `{0}` is reserved")]
    ReservedName(String),
    #[error("Channel type `{0}` is already registered")]
    DuplicateType(String),
    #[error("Invalid subid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Where an autocreated channel of a type is created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// On the server that first tried to send to it
    Local,
    /// Wherever the master decides, serialized against auto-destroy locks
    Master,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Data is loaded on creation and written back through the shield
    Persisted,
    Volatile,
}

/// Per-type policy every worker of the type carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOptions {
    pub persistence: Persistence,
    /// Destroy the worker once it has been idle for `destroy_idle_ms`
    pub auto_destroy: bool,
    /// Subscribers must carry a `user_id` in their identity
    pub require_login: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            persistence: Persistence::Volatile,
            auto_destroy: true,
            require_login: false,
        }
    }
}

/// Describes one channel type: how to construct its logic, its handlers,
/// and its creation and lifetime policy.
///
/// ```ignore
/// let lobby = ChannelType::new("lobby", |_| Lobby::default())
///     .autocreate()
///     .subid_pattern("^[0-9]+$")?
///     .persisted()
///     .client_handler("chat", Lobby::chat);
/// registry.register(lobby)?;
/// ```
pub struct ChannelType<L: ChannelLogic> {
    name: String,
    make: Box<dyn Fn(&ChannelId) -> L>,
    autocreate: bool,
    subid_pattern: Option<Regex>,
    placement: Placement,
    options: ChannelOptions,
    handlers: HandlerTable<L>,
}

impl<L: ChannelLogic> ChannelType<L> {
    pub fn new(name: &str, make: impl Fn(&ChannelId) -> L + 'static) -> Self {
        Self {
            name: name.to_string(),
            make: Box::new(make),
            autocreate: false,
            subid_pattern: None,
            placement: Placement::Local,
            options: ChannelOptions::default(),
            handlers: HandlerTable::new(),
        }
    }

    /// Create channels of this type on the first message sent to them
    pub fn autocreate(mut self) -> Self {
        self.autocreate = true;
        self
    }

    /// Subids must match `pattern`, both for autocreate and explicit creation
    pub fn subid_pattern(mut self, pattern: &str) -> Result<Self, RegistryError> {
        let regex = Regex::new(pattern).map_err(|error| RegistryError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: error.to_string(),
        })?;
        self.subid_pattern = Some(regex);
        Ok(self)
    }

    pub fn placement(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    pub fn persisted(mut self) -> Self {
        self.options.persistence = Persistence::Persisted;
        self
    }

    pub fn volatile(mut self) -> Self {
        self.options.persistence = Persistence::Volatile;
        self
    }

    pub fn auto_destroy(mut self, enabled: bool) -> Self {
        self.options.auto_destroy = enabled;
        self
    }

    pub fn require_login(mut self) -> Self {
        self.options.require_login = true;
        self
    }

    pub fn handler(mut self, message: &str, handler: HandlerFn<L>) -> Self {
        self.handlers.insert(message, handler);
        self
    }

    /// A handler `client.*` channels may invoke as well
    pub fn client_handler(mut self, message: &str, handler: HandlerFn<L>) -> Self {
        self.handlers.insert_client(message, handler);
        self
    }

    /// A handler for `message` when it comes from a channel of `source_type`,
    /// typically over a broadcast
    pub fn filter(mut self, source_type: &str, message: &str, handler: HandlerFn<L>) -> Self {
        self.handlers.insert_filter(source_type, message, handler);
        self
    }
}

pub(crate) trait ChannelFactory {
    fn build(&self, core: WorkerCore) -> Box<dyn AnyWorker>;
}

struct TypeFactory<L: ChannelLogic> {
    make: Box<dyn Fn(&ChannelId) -> L>,
    handlers: Arc<HandlerTable<L>>,
}

impl<L: ChannelLogic> ChannelFactory for TypeFactory<L> {
    fn build(&self, core: WorkerCore) -> Box<dyn AnyWorker> {
        let logic = (self.make)(core.id());
        Box::new(ChannelWorker::new(core, logic, self.handlers.clone()))
    }
}

struct TypeEntry {
    autocreate: bool,
    subid_pattern: Option<Regex>,
    placement: Placement,
    options: ChannelOptions,
    factory: Box<dyn ChannelFactory>,
}

/// Type name -> constructor table consulted whenever a channel is created
#[derive(Default)]
pub struct ChannelTypeRegistry {
    types: HashMap<String, TypeEntry>,
}

const RESERVED: [&str; 4] = [
    SERVER_CHANNEL_TYPE,
    CLIENT_CHANNEL_TYPE,
    MASTER_CHANNEL_TYPE,
    BROADCAST_CHANNEL_TYPE,
];

impl ChannelTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<L: ChannelLogic>(&mut self, kind: ChannelType<L>) -> Result<(), RegistryError> {
        if RESERVED.contains(&kind.name.as_str()) {
            return Err(RegistryError::ReservedName(kind.name));
        }
        self.insert_builtin(kind)
    }

    pub(crate) fn insert_builtin<L: ChannelLogic>(
        &mut self,
        kind: ChannelType<L>,
    ) -> Result<(), RegistryError> {
        if self.types.contains_key(&kind.name) {
            return Err(RegistryError::DuplicateType(kind.name));
        }
        let entry = TypeEntry {
            autocreate: kind.autocreate,
            subid_pattern: kind.subid_pattern,
            placement: kind.placement,
            options: kind.options,
            factory: Box::new(TypeFactory {
                make: kind.make,
                handlers: Arc::new(kind.handlers),
            }),
        };
        self.types.insert(kind.name, entry);
        Ok(())
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.types.contains_key(kind)
    }

    /// Whether `id` names a registered type with a subid its pattern accepts
    pub fn validate(&self, id: &ChannelId) -> Result<(), ErrorCode> {
        let entry = self.types.get(id.kind()).ok_or(ErrorCode::NotFound)?;
        match &entry.subid_pattern {
            Some(pattern) if !pattern.is_match(id.subid()) => Err(ErrorCode::InvalidChannelId),
            _ => Ok(()),
        }
    }

    /// How `id` should be created after a send found it missing
    pub fn autocreate_plan(&self, id: &ChannelId) -> Result<Placement, ErrorCode> {
        self.validate(id)?;
        match self.types.get(id.kind()) {
            Some(entry) if entry.autocreate => Ok(entry.placement),
            _ => Err(ErrorCode::NotFound),
        }
    }

    pub fn options(&self, kind: &str) -> Option<&ChannelOptions> {
        self.types.get(kind).map(|entry| &entry.options)
    }

    pub(crate) fn build(
        &self,
        id: &ChannelId,
        init: WorkerInit,
    ) -> Result<Box<dyn AnyWorker>, ErrorCode> {
        self.validate(id)?;
        let entry = self.types.get(id.kind()).ok_or(ErrorCode::NotFound)?;
        let core = WorkerCore::new(id.clone(), entry.options.clone(), init);
        Ok(entry.factory.build(core))
    }
}
