//! Per-client rebinding session store.
//!
//! One entry per browser-generated session token, so many victims can
//! share the responder without cross-talk. Strategies read snapshots of
//! this state and the responder advances the timestamps after each
//! query, which is what makes the timing-based strategies work.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::query::HostTarget;

/// How often the expiry task sweeps the store.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Rebinding state of one client session.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Attacker host answered before the rebind.
    pub response_ip: HostTarget,
    /// Target host answered after the rebind.
    pub rebound_ip: HostTarget,
    /// Arrival time of the last fully processed query. `None` until the
    /// first query completes.
    pub last_query_at: Option<Instant>,
    /// Arrival time of the query currently in flight.
    pub current_query_at: Option<Instant>,
    /// Round-robin position: 0 before the first rebind, then 1 and 2.
    pub round_robin_phase: u8,
    /// Window during which follow-up queries answer the rebound host.
    pub rebound_timeout: Duration,
    /// When set, strategies answer the attacker host unconditionally.
    pub cache_flush: bool,
}

/// Field values a new or refreshed session takes from one query.
#[derive(Debug, Clone)]
pub struct SessionSeed {
    pub response_ip: HostTarget,
    pub rebound_ip: HostTarget,
    pub rebound_timeout: Duration,
    pub cache_flush: bool,
    /// Arrival time of the query creating the session.
    pub now: Instant,
}

/// Concurrent map from session token to rebinding state.
///
/// Readers take the lock shared, every mutation takes it exclusive; the
/// lock is never held across an await point.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<FxHashMap<String, SessionState>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the session if absent, otherwise refresh the per-query
    /// fields (hosts and cache-flush flag). Timestamps and the
    /// round-robin phase survive the refresh. Returns whether the
    /// session was created.
    pub fn upsert(&self, id: &str, seed: SessionSeed) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(state) => {
                state.response_ip = seed.response_ip;
                state.rebound_ip = seed.rebound_ip;
                state.cache_flush = seed.cache_flush;
                false
            }
            None => {
                sessions.insert(
                    id.to_string(),
                    SessionState {
                        response_ip: seed.response_ip,
                        rebound_ip: seed.rebound_ip,
                        last_query_at: None,
                        current_query_at: Some(seed.now),
                        round_robin_phase: 0,
                        rebound_timeout: seed.rebound_timeout,
                        cache_flush: seed.cache_flush,
                    },
                );
                true
            }
        }
    }

    /// Copy of the session state, if the session exists.
    pub fn snapshot(&self, id: &str) -> Option<SessionState> {
        self.sessions.read().get(id).cloned()
    }

    /// Mutate one session under exclusive access.
    pub fn update(&self, id: &str, mutate: impl FnOnce(&mut SessionState)) {
        if let Some(state) = self.sessions.write().get_mut(id) {
            mutate(state);
        }
    }

    /// Record `now` as both the current and the last query time. Called
    /// once per query, after the strategy ran, so strategies always see
    /// the previous query's timestamps.
    pub fn touch(&self, id: &str, now: Instant) {
        self.update(id, |state| {
            state.current_query_at = Some(now);
            state.last_query_at = Some(now);
        });
    }

    /// Step the round-robin phase (0→1, 1→2, 2→1) and return the new
    /// phase. Returns `None` for an unknown session.
    pub fn advance_round_robin(&self, id: &str) -> Option<u8> {
        let mut sessions = self.sessions.write();
        let state = sessions.get_mut(id)?;
        state.round_robin_phase = match state.round_robin_phase {
            1 => 2,
            _ => 1,
        };
        Some(state.round_robin_phase)
    }

    /// Drop sessions whose last completed query is older than `ttl`.
    /// Sessions that never completed a query are kept.
    pub fn expire_older_than(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, state| match state.last_query_at {
            Some(last) => last.elapsed() <= ttl,
            None => true,
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

/// Periodic expiry sweep. Runs for process lifetime.
pub async fn run_expiry(store: Arc<SessionStore>, ttl: Duration) {
    let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let expired = store.expire_older_than(ttl);
        if expired > 0 {
            debug!(expired, remaining = store.len(), "expired idle sessions");
        }
    }
}
