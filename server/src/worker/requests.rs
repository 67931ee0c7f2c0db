use std::collections::HashMap;

use actorfabric_shared::{
    ChannelId, RequestId, SequenceNumber, ServerTime, BROADCAST_CHANNEL_TYPE,
};

/// Identifies an outstanding request made by a channel; handed back to the
/// channel's logic with the response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestKey(RequestId);

impl RequestKey {
    pub fn id(&self) -> RequestId {
        self.0
    }
}

/// Why the worker itself cares about a response, beyond handing it to logic
#[derive(Debug, Clone)]
pub(crate) enum RequestPurpose {
    User,
    Subscribe(ChannelId),
    MasterLock,
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub dest: ChannelId,
    pub sequence: SequenceNumber,
    pub deadline: ServerTime,
    pub purpose: RequestPurpose,
}

#[derive(Default)]
pub(crate) struct RequestTable {
    next_id: RequestId,
    pending: HashMap<RequestId, PendingRequest>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves the id the next request will carry
    pub fn next_key(&mut self) -> RequestKey {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id != 0 && !self.pending.contains_key(&self.next_id) {
                return RequestKey(self.next_id);
            }
        }
    }

    pub fn insert(&mut self, key: RequestKey, request: PendingRequest) {
        self.pending.insert(key.0, request);
    }

    /// Matches a response to its request. A response from anyone other than
    /// the request's destination is ignored; broadcasts accept any responder.
    pub fn take_response(
        &mut self,
        source: &ChannelId,
        request_id: RequestId,
    ) -> Option<(RequestKey, PendingRequest)> {
        let request = self.pending.get(&request_id)?;
        if &request.dest != source && request.dest.kind() != BROADCAST_CHANNEL_TYPE {
            return None;
        }
        self.pending
            .remove(&request_id)
            .map(|request| (RequestKey(request_id), request))
    }

    pub fn take_id(&mut self, request_id: RequestId) -> Option<(RequestKey, PendingRequest)> {
        self.pending
            .remove(&request_id)
            .map(|request| (RequestKey(request_id), request))
    }

    pub fn take_expired(&mut self, now: ServerTime) -> Vec<(RequestKey, PendingRequest)> {
        let mut expired: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|(_, request)| request.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();
        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|request| (RequestKey(id), request)))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(RequestKey, PendingRequest)> {
        let mut all: Vec<(RequestKey, PendingRequest)> = self
            .pending
            .drain()
            .map(|(id, request)| (RequestKey(id), request))
            .collect();
        all.sort_unstable_by_key(|(key, _)| key.0);
        all
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, key: RequestKey) -> bool {
        self.pending.contains_key(&key.0)
    }
}

#[cfg(test)]
mod tests {
    use actorfabric_shared::ChannelId;

    use super::{PendingRequest, RequestPurpose, RequestTable};

    fn pending(dest: &str, deadline: u64) -> PendingRequest {
        PendingRequest {
            dest: ChannelId::parse(dest).unwrap(),
            sequence: 1,
            deadline,
            purpose: RequestPurpose::User,
        }
    }

    #[test]
    fn responses_must_come_from_the_destination() {
        let mut table = RequestTable::new();
        let key = table.next_key();
        table.insert(key, pending("user.1", 100));

        let imposter = ChannelId::parse("user.2").unwrap();
        assert!(table.take_response(&imposter, key.id()).is_none());
        let owner = ChannelId::parse("user.1").unwrap();
        assert!(table.take_response(&owner, key.id()).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn expiry_takes_only_due_requests() {
        let mut table = RequestTable::new();
        let early = table.next_key();
        table.insert(early, pending("user.1", 100));
        let late = table.next_key();
        table.insert(late, pending("user.1", 200));

        let expired = table.take_expired(150);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, early);
        assert!(table.contains(late));
    }
}
