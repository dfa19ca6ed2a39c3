//! OAuth state management for CSRF protection.
//!
//! Every authorization redirect carries a random state value that maps back
//! to the user and provider which started it. States are single-use and
//! expire.

use crate::credentials::Provider;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct StateEntry {
    pub provider: Provider,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// OAuth state manager with automatic expiration
#[derive(Clone)]
pub struct StateManager {
    states: Arc<Mutex<HashMap<String, StateEntry>>>,
    expiry_duration: Duration,
}

impl StateManager {
    pub fn new(expiry_seconds: i64) -> Self {
        Self {
            states: Arc::new(Mutex::new(HashMap::new())),
            expiry_duration: Duration::seconds(expiry_seconds),
        }
    }

    // The map holds no invariants a panicking writer could break
    fn states(&self) -> MutexGuard<'_, HashMap<String, StateEntry>> {
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Generates and stores a new state value (UUID v4).
    pub fn create_state(&self, provider: Provider, user_id: &str) -> String {
        let state = Uuid::new_v4().to_string();

        // Store with timestamp
        self.states().insert(
            state.clone(),
            StateEntry {
                provider,
                user_id: user_id.to_string(),
                created_at: Utc::now(),
            },
        );
        state
    }

    /// Removes the state and returns its entry if it has not expired.
    pub fn validate_and_consume(&self, state: &str) -> Option<StateEntry> {
        // Remove state (single-use)
        let entry = self.states().remove(state)?;

        // Check expiration
        if Utc::now() - entry.created_at > self.expiry_duration {
            return None;
        }
        Some(entry)
    }

    pub fn cleanup_expired(&self) {
        let now = Utc::now();
        let expiry = self.expiry_duration;
        self.states()
            .retain(|_, entry| now - entry.created_at <= expiry);
    }

    pub fn count(&self) -> usize {
        self.states().len()
    }
}

/// Background task to periodically clean up expired states
pub async fn run_state_cleanup(manager: StateManager, interval_seconds: u64) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_seconds));

    loop {
        interval.tick().await;
        manager.cleanup_expired();
        tracing::debug!(remaining = manager.count(), "OAuth state cleanup complete");
    }
}
