use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use tracing::debug;

use crate::SamlError;

/// Outstanding request ids for callers that keep them server side instead of in a session.
///
/// Every id can be consumed once, and only within `ttl` of being issued.
#[derive(Debug)]
pub struct PendingRequests {
    ttl: Duration,
    pending: Mutex<HashMap<String, Instant>>,
}

impl PendingRequests {
    pub fn new(ttl: Duration) -> Self {
        PendingRequests {
            ttl,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, request_id: &str) {
        self.insert_at(request_id, Instant::now());
    }

    /// Removes `request_id`, failing if it was never issued, was already consumed or expired.
    pub fn consume(&self, request_id: &str) -> Result<(), SamlError> {
        self.consume_at(request_id, Instant::now())
    }

    /// Drops every expired entry and returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_at(&self, request_id: &str, now: Instant) {
        let mut pending = self.lock();
        pending.retain(|_, issued| now.duration_since(*issued) < self.ttl);
        pending.insert(request_id.to_string(), now);
    }

    fn consume_at(&self, request_id: &str, now: Instant) -> Result<(), SamlError> {
        let issued = self.lock().remove(request_id);
        match issued {
            Some(issued) if now.duration_since(issued) < self.ttl => Ok(()),
            issued => {
                debug!(request_id, expired = issued.is_some(), "request id is not pending");
                Err(SamlError::Correlation {
                    expected: request_id.to_string(),
                    actual: None,
                })
            }
        }
    }

    fn evict_expired_at(&self, now: Instant) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, issued| now.duration_since(*issued) < self.ttl);
        let evicted = before - pending.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired SAML requests");
        }
        evicted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        // The map stays consistent even if a holder panicked.
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
