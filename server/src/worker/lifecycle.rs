use actorfabric_shared::ServerTime;

use super::RequestKey;

/// Where a worker is on its way from registered to destroyed.
///
/// Auto-destroy walks `Registered -> Locking -> Unregistering -> Finalizing
/// -> Destroyed`; the eligibility re-check happens when the lock arrives and
/// may abort back to `Registered`. Forced shutdown skips the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LifecycleState {
    Registered,
    Locking { key: RequestKey },
    Unregistering { holds_lock: bool },
    Finalizing { holds_lock: bool },
    Destroyed,
}

pub(crate) struct Lifecycle {
    state: LifecycleState,
    /// Earliest time another lock attempt may start
    retry_at: ServerTime,
    shutdown_requested: bool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Registered,
            retry_at: 0,
            shutdown_requested: false,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.state == LifecycleState::Registered
    }

    /// Still running handlers for inbound packets
    pub fn is_live(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Registered | LifecycleState::Locking { .. }
        )
    }

    pub fn is_finalizing(&self) -> bool {
        matches!(self.state, LifecycleState::Finalizing { .. })
    }

    pub fn lock_key(&self) -> Option<RequestKey> {
        match self.state {
            LifecycleState::Locking { key } => Some(key),
            _ => None,
        }
    }

    pub fn holds_lock(&self) -> bool {
        matches!(
            self.state,
            LifecycleState::Unregistering { holds_lock: true }
                | LifecycleState::Finalizing { holds_lock: true }
        )
    }

    pub fn may_try_lock(&self, now: ServerTime) -> bool {
        self.is_registered() && now >= self.retry_at
    }

    pub fn start_locking(&mut self, key: RequestKey) {
        self.state = LifecycleState::Locking { key };
    }

    /// The lock request failed or timed out
    pub fn lock_failed(&mut self, retry_at: ServerTime) {
        self.state = LifecycleState::Registered;
        self.retry_at = retry_at;
    }

    /// The re-check after locking found the worker busy again
    pub fn abort(&mut self) {
        self.state = LifecycleState::Registered;
    }

    pub fn start_unregistering(&mut self, holds_lock: bool) {
        self.state = LifecycleState::Unregistering { holds_lock };
    }

    pub fn start_finalizing(&mut self) {
        let holds_lock = self.holds_lock();
        self.state = LifecycleState::Finalizing { holds_lock };
    }

    /// A lock grant raced with a forced shutdown; the lock must still be
    /// released on the way out
    pub fn adopt_lock(&mut self) {
        if let LifecycleState::Finalizing { .. } = self.state {
            self.state = LifecycleState::Finalizing { holds_lock: true };
        }
    }

    pub fn finish(&mut self) {
        self.state = LifecycleState::Destroyed;
    }

    pub fn request_shutdown(&mut self) {
        self.shutdown_requested = true;
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }
}
