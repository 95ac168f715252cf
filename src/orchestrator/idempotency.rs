//! In-process idempotency cache.
//!
//! Successful results are cached under their client-supplied key and
//! replayed verbatim while the TTL holds. The ledger's unique idempotency
//! index is the durable backstop; this cache just makes replays cheap.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::types::ToolResult;

/// TTL-bounded map of idempotency key → cached result.
#[derive(Debug)]
pub struct IdempotencyCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, ToolResult)>>,
}

impl IdempotencyCache {
    /// Create a cache with the given entry TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached result for `key` if it is still fresh. Expired
    /// entries are evicted on the way out.
    pub fn get(&self, key: &str) -> Option<ToolResult> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((stored_at, result)) if stored_at.elapsed() < self.ttl => Some(result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Cache a successful result under `key`. First writer wins: a key
    /// that is already fresh is left untouched so parallel computations
    /// converge on one answer.
    pub fn store(&self, key: &str, result: &ToolResult) {
        let mut entries = self.lock();
        if let Some((stored_at, _)) = entries.get(key) {
            if stored_at.elapsed() < self.ttl {
                return;
            }
        }
        entries.insert(key.to_owned(), (Instant::now(), result.clone()));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, ToolResult)>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
