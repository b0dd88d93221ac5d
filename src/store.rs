//! Usage counters and the nonce replay guard.
//!
//! Counters are keyed by `(endpoint path, human id)`: every wallet a human
//! registers shares one counter per endpoint, and counters for different
//! endpoints are independent. The nonce methods are an optional replay guard —
//! their defaults make a store without nonce support behave as "everything is
//! fresh, recording is a no-op", which keeps the validation path uniform.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::agentbook::HumanId;

/// Storage contract for usage counters and seen nonces.
///
/// Reads and increments must be linearizable per key: two concurrent requests
/// for the same human on the same endpoint must not both observe `N-1` and
/// both increment, or a trial of `N` uses stretches to `N+1`. The free-trial
/// path therefore goes through [`increment_usage_below`](UsageStore::increment_usage_below),
/// which implementations back with a native atomic (the in-memory store holds
/// its lock across check and increment; a Redis-backed store would use a
/// conditional increment script).
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Number of recorded uses for `(endpoint, human)`.
    async fn usage_count(&self, endpoint: &str, human: &HumanId) -> u64;

    /// Atomically adds one use to `(endpoint, human)`.
    async fn increment_usage(&self, endpoint: &str, human: &HumanId);

    /// Atomically increments iff the current count is below `limit`.
    ///
    /// Returns whether the increment happened. The default composes
    /// [`usage_count`](UsageStore::usage_count) and
    /// [`increment_usage`](UsageStore::increment_usage) and is only correct
    /// for stores whose callers serialize per key; override it with a real
    /// check-and-increment everywhere else.
    async fn increment_usage_below(&self, endpoint: &str, human: &HumanId, limit: u64) -> bool {
        if self.usage_count(endpoint, human).await < limit {
            self.increment_usage(endpoint, human).await;
            true
        } else {
            false
        }
    }

    /// Whether `nonce` was already consumed by a verified request.
    async fn has_used_nonce(&self, _nonce: &str) -> bool {
        false
    }

    /// Marks `nonce` as consumed. Recorded nonces must survive for at least
    /// the challenge max-age window.
    async fn record_nonce(&self, _nonce: &str) {}
}

#[derive(Default)]
struct StoreState {
    counters: HashMap<(String, HumanId), u64>,
    nonces: HashSet<String>,
}

/// Process-local reference store.
///
/// A single mutex guards both maps, which gives per-key linearizability for
/// free. Nonces are kept for the process lifetime, comfortably past the
/// required max-age window. Counters do not survive restarts; hosts that need
/// durable quotas bring their own [`UsageStore`].
#[derive(Default)]
pub struct InMemoryUsageStore {
    state: Mutex<StoreState>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn usage_count(&self, endpoint: &str, human: &HumanId) -> u64 {
        let state = self.state.lock().expect("usage store lock poisoned");
        state
            .counters
            .get(&(endpoint.to_string(), *human))
            .copied()
            .unwrap_or(0)
    }

    async fn increment_usage(&self, endpoint: &str, human: &HumanId) {
        let mut state = self.state.lock().expect("usage store lock poisoned");
        *state
            .counters
            .entry((endpoint.to_string(), *human))
            .or_insert(0) += 1;
    }

    async fn increment_usage_below(&self, endpoint: &str, human: &HumanId, limit: u64) -> bool {
        let mut state = self.state.lock().expect("usage store lock poisoned");
        let count = state
            .counters
            .entry((endpoint.to_string(), *human))
            .or_insert(0);
        if *count < limit {
            *count += 1;
            true
        } else {
            false
        }
    }

    async fn has_used_nonce(&self, nonce: &str) -> bool {
        let state = self.state.lock().expect("usage store lock poisoned");
        state.nonces.contains(nonce)
    }

    async fn record_nonce(&self, nonce: &str) {
        let mut state = self.state.lock().expect("usage store lock poisoned");
        state.nonces.insert(nonce.to_string());
    }
}
