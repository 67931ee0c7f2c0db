use std::{mem, vec::IntoIter};

use actorfabric_shared::ChannelId;

use crate::FabricServerError;

/// Everything that happened on a server since the last `receive()`
pub struct ServerEvents {
    creations: Vec<ChannelId>,
    destructions: Vec<ChannelId>,
    errors: Vec<FabricServerError>,

    empty: bool,
}

impl Default for ServerEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerEvents {
    pub(crate) fn new() -> Self {
        Self {
            creations: Vec::new(),
            destructions: Vec::new(),
            errors: Vec::new(),

            empty: true,
        }
    }

    // Public

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn read<V: ServerEvent>(&mut self) -> V::Iter {
        V::iter(self)
    }

    pub fn has<V: ServerEvent>(&self) -> bool {
        V::has(self)
    }

    // Crate-public

    pub(crate) fn push_creation(&mut self, id: &ChannelId) {
        self.creations.push(id.clone());
        self.empty = false;
    }

    pub(crate) fn push_destruction(&mut self, id: &ChannelId) {
        self.destructions.push(id.clone());
        self.empty = false;
    }

    pub(crate) fn push_error(&mut self, error: FabricServerError) {
        self.errors.push(error);
        self.empty = false;
    }
}

// Event Trait
pub trait ServerEvent {
    type Iter;

    fn iter(events: &mut ServerEvents) -> Self::Iter;

    fn has(events: &ServerEvents) -> bool;
}

// CreateEvent
pub struct CreateEvent;
impl ServerEvent for CreateEvent {
    type Iter = IntoIter<ChannelId>;

    fn iter(events: &mut ServerEvents) -> Self::Iter {
        let list = mem::take(&mut events.creations);
        IntoIterator::into_iter(list)
    }

    fn has(events: &ServerEvents) -> bool {
        !events.creations.is_empty()
    }
}

// DestroyEvent
pub struct DestroyEvent;
impl ServerEvent for DestroyEvent {
    type Iter = IntoIter<ChannelId>;

    fn iter(events: &mut ServerEvents) -> Self::Iter {
        let list = mem::take(&mut events.destructions);
        IntoIterator::into_iter(list)
    }

    fn has(events: &ServerEvents) -> bool {
        !events.destructions.is_empty()
    }
}

// ErrorEvent
pub struct ErrorEvent;
impl ServerEvent for ErrorEvent {
    type Iter = IntoIter<FabricServerError>;

    fn iter(events: &mut ServerEvents) -> Self::Iter {
        let list = mem::take(&mut events.errors);
        IntoIterator::into_iter(list)
    }

    fn has(events: &ServerEvents) -> bool {
        !events.errors.is_empty()
    }
}
