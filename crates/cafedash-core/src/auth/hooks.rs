//! Session notification surface for the UI layer.
//!
//! Subscribers are told when a session ends without the user asking for it
//! (a refresh that failed, or a session whose tokens all ran out). An
//! explicit logout never notifies: the caller already knows.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a session ended involuntarily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The refresh endpoint rejected the refresh token.
    RefreshRejected,
    /// The refresh request never got a usable response (transport error or timeout).
    RefreshFailed,
    /// Both stored tokens were already expired.
    TokensExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionExpiredEvent {
    pub reason: ExpiryReason,
    pub at: DateTime<Utc>,
}

impl SessionExpiredEvent {
    pub fn new(reason: ExpiryReason) -> Self {
        Self {
            reason,
            at: Utc::now(),
        }
    }
}

/// Handle returned by [`SessionPolicyHooks::on_session_expired`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&SessionExpiredEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    callbacks: Vec<(SubscriptionId, Callback)>,
}

/// Fan-out of session-expired notifications. Clone is cheap; clones share
/// the same subscriber list.
#[derive(Clone, Default)]
pub struct SessionPolicyHooks {
    registry: Arc<Mutex<Registry>>,
}

impl SessionPolicyHooks {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a callback for involuntary transitions to unauthenticated.
    pub fn on_session_expired<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&SessionExpiredEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry();
        let id = SubscriptionId(registry.next_id);
        registry.next_id += 1;
        registry.callbacks.push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut registry = self.registry();
        let before = registry.callbacks.len();
        registry.callbacks.retain(|(existing, _)| *existing != id);
        registry.callbacks.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry().callbacks.len()
    }

    /// Invoke every callback once, in registration order.
    pub(crate) fn notify_session_expired(&self, event: &SessionExpiredEvent) {
        // Callbacks run outside the lock so they may (un)subscribe.
        let callbacks: Vec<Callback> = self
            .registry()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        tracing::debug!(
            reason = ?event.reason,
            subscribers = callbacks.len(),
            "Notifying session expiry"
        );
        for callback in callbacks {
            callback(event);
        }
    }
}
