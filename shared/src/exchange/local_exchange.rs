use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, trace};

use crate::ChannelId;

use super::{Exchange, ExchangeDelivery, ExchangeError, LinkConditionerConfig};

type EndpointId = usize;

struct HubState {
    receivers: HashMap<ChannelId, EndpointId>,
    subscribers: HashMap<ChannelId, Vec<EndpointId>>,
    inboxes: Vec<VecDeque<(ChannelId, Box<[u8]>)>>,
    conditioner: Option<(LinkConditionerConfig, fastrand::Rng)>,
}

impl HubState {
    fn enqueue(&mut self, endpoint: EndpointId, dest: &ChannelId, payload: &[u8]) {
        let Some((config, rng)) = self.conditioner.as_mut() else {
            self.inboxes[endpoint].push_back((dest.clone(), payload.into()));
            return;
        };

        if rng.f32() < config.drop_chance {
            trace!("link conditioner dropped packet for {}", dest);
            return;
        }
        let copies = if rng.f32() < config.duplicate_chance { 2 } else { 1 };
        for _ in 0..copies {
            let inbox = &mut self.inboxes[endpoint];
            let depth = config.reorder_depth.min(inbox.len());
            let position = if depth > 0 && rng.f32() < config.reorder_chance {
                inbox.len() - rng.usize(1..=depth)
            } else {
                inbox.len()
            };
            inbox.insert(position, (dest.clone(), payload.into()));
        }
    }
}

/// The shared in-memory "broker" every `LocalExchange` endpoint talks to.
/// Clone it to hand to each server in a single-process cluster.
#[derive(Clone)]
pub struct LocalExchangeHub {
    state: Arc<Mutex<HubState>>,
}

impl Default for LocalExchangeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalExchangeHub {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                receivers: HashMap::new(),
                subscribers: HashMap::new(),
                inboxes: Vec::new(),
                conditioner: None,
            })),
        }
    }

    pub fn with_conditioner(config: LinkConditionerConfig) -> Self {
        let hub = Self::new();
        hub.set_conditioner(Some(config));
        hub
    }

    pub fn set_conditioner(&self, config: Option<LinkConditionerConfig>) {
        self.lock().conditioner = config.map(|config| {
            let rng = fastrand::Rng::with_seed(config.seed);
            (config, rng)
        });
    }

    /// Opens a new endpoint with its own inbox
    pub fn connect(&self) -> LocalExchange {
        let mut state = self.lock();
        state.inboxes.push(VecDeque::new());
        LocalExchange {
            hub: self.clone(),
            endpoint: state.inboxes.len() - 1,
        }
    }

    pub fn is_registered(&self, id: &ChannelId) -> bool {
        self.lock().receivers.contains_key(id)
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        // a panicked holder cannot leave the maps half-updated
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One server's connection to a `LocalExchangeHub`
pub struct LocalExchange {
    hub: LocalExchangeHub,
    endpoint: EndpointId,
}

impl Exchange for LocalExchange {
    fn register(&mut self, id: &ChannelId) -> Result<(), ExchangeError> {
        let mut state = self.hub.lock();
        if state.receivers.contains_key(id) {
            return Err(ExchangeError::AlreadyExists(id.clone()));
        }
        debug!("endpoint {} registered {}", self.endpoint, id);
        state.receivers.insert(id.clone(), self.endpoint);
        Ok(())
    }

    fn unregister(&mut self, id: &ChannelId) {
        let mut state = self.hub.lock();
        if state.receivers.get(id) == Some(&self.endpoint) {
            debug!("endpoint {} unregistered {}", self.endpoint, id);
            state.receivers.remove(id);
        }
    }

    fn subscribe(&mut self, id: &ChannelId) -> Result<(), ExchangeError> {
        let mut state = self.hub.lock();
        let list = state.subscribers.entry(id.clone()).or_default();
        if !list.contains(&self.endpoint) {
            list.push(self.endpoint);
        }
        Ok(())
    }

    fn unsubscribe(&mut self, id: &ChannelId) {
        let mut state = self.hub.lock();
        if let Some(list) = state.subscribers.get_mut(id) {
            list.retain(|endpoint| *endpoint != self.endpoint);
            if list.is_empty() {
                state.subscribers.remove(id);
            }
        }
    }

    fn publish(&mut self, dest: &ChannelId, payload: &[u8]) -> Result<(), ExchangeError> {
        let mut state = self.hub.lock();

        if let Some(endpoint) = state.receivers.get(dest).copied() {
            state.enqueue(endpoint, dest, payload);
            return Ok(());
        }

        let endpoints = state.subscribers.get(dest).cloned().unwrap_or_default();
        if endpoints.is_empty() {
            return Err(ExchangeError::NotFound(dest.clone()));
        }
        for endpoint in endpoints {
            state.enqueue(endpoint, dest, payload);
        }
        Ok(())
    }

    fn receive(&mut self) -> Option<ExchangeDelivery> {
        let mut state = self.hub.lock();
        state.inboxes[self.endpoint]
            .pop_front()
            .map(|(addressed, payload)| ExchangeDelivery { addressed, payload })
    }
}
