//! Rebinding strategies.
//!
//! A strategy decides which host(s) a DNS answer carries, given the
//! session's stored state. The set is closed: every strategy a query
//! can name lives in this enum.

use rand::Rng;

use crate::query::HostTarget;
use crate::session::SessionStore;

/// How answers for a session are chosen across successive queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Always the first host. Not query-selectable: used when the query
    /// name cannot be parsed.
    First,
    /// First host once, then the rebound host while inside the timeout
    /// window.
    FirstThenSecond,
    /// Uniformly random choice between the two hosts.
    Random,
    /// Alternate between the two hosts query by query.
    RoundRobin,
    /// Both hosts in a single answer; the browser picks the live one.
    MultiA,
}

impl Strategy {
    /// Look up a strategy by its query-name token. The `First` fallback
    /// has no public name on purpose.
    pub fn from_name(name: &str) -> Option<Strategy> {
        match name {
            "fromqueryfirstthensecond" => Some(Strategy::FirstThenSecond),
            "fromqueryrandom" => Some(Strategy::Random),
            "fromqueryroundrobin" => Some(Strategy::RoundRobin),
            "fromquerymultia" => Some(Strategy::MultiA),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Strategy::First => "first",
            Strategy::FirstThenSecond => "fromqueryfirstthensecond",
            Strategy::Random => "fromqueryrandom",
            Strategy::RoundRobin => "fromqueryroundrobin",
            Strategy::MultiA => "fromquerymultia",
        }
    }

    /// Produce the ordered answer hosts for one query of `session`.
    ///
    /// Reads a snapshot of the session state; only the round-robin
    /// strategy writes back (its phase step). An unknown session yields
    /// no answers.
    pub fn answers(&self, session: &str, store: &SessionStore) -> Vec<HostTarget> {
        let Some(state) = store.snapshot(session) else {
            return Vec::new();
        };

        match self {
            Strategy::First => vec![state.response_ip],
            Strategy::FirstThenSecond => {
                if state.cache_flush {
                    return vec![state.response_ip];
                }
                // Both timestamps still hold the previous query's
                // arrival here; a fresh session has no last time, which
                // reads as an infinite gap.
                let elapsed = match (state.current_query_at, state.last_query_at) {
                    (Some(current), Some(last)) => current.saturating_duration_since(last),
                    _ => std::time::Duration::MAX,
                };
                if elapsed < state.rebound_timeout {
                    vec![state.rebound_ip]
                } else {
                    vec![state.response_ip]
                }
            }
            Strategy::Random => {
                if state.cache_flush {
                    return vec![state.response_ip];
                }
                if rand::thread_rng().gen::<bool>() {
                    vec![state.response_ip]
                } else {
                    vec![state.rebound_ip]
                }
            }
            Strategy::RoundRobin => {
                if state.cache_flush {
                    return vec![state.response_ip];
                }
                match store.advance_round_robin(session) {
                    Some(2) => vec![state.rebound_ip],
                    Some(_) => vec![state.response_ip],
                    None => vec![state.response_ip],
                }
            }
            Strategy::MultiA => vec![state.response_ip, state.rebound_ip],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionSeed;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    const RESPONSE: HostTarget = HostTarget::Ip(Ipv4Addr::new(1, 2, 3, 4));
    const REBOUND: HostTarget = HostTarget::Ip(Ipv4Addr::new(10, 0, 0, 7));

    fn store_with_session(session: &str) -> SessionStore {
        let store = SessionStore::new();
        store.upsert(
            session,
            SessionSeed {
                response_ip: RESPONSE,
                rebound_ip: REBOUND,
                rebound_timeout: Duration::from_secs(60),
                cache_flush: false,
                now: Instant::now(),
            },
        );
        store
    }

    #[test]
    fn registry_resolves_public_names() {
        assert_eq!(
            Strategy::from_name("fromqueryfirstthensecond"),
            Some(Strategy::FirstThenSecond)
        );
        assert_eq!(Strategy::from_name("fromqueryrandom"), Some(Strategy::Random));
        assert_eq!(Strategy::from_name("fromqueryroundrobin"), Some(Strategy::RoundRobin));
        assert_eq!(Strategy::from_name("fromquerymultia"), Some(Strategy::MultiA));
        assert_eq!(Strategy::from_name(""), None);
        assert_eq!(Strategy::from_name("first"), None);
    }

    #[test]
    fn first_always_answers_response_host() {
        let store = store_with_session("s");

        assert_eq!(Strategy::First.answers("s", &store), vec![RESPONSE]);
    }

    #[test]
    fn first_then_second_starts_with_response_host() {
        let store = store_with_session("s");

        // Fresh session: no completed query yet, gap reads as infinite.
        assert_eq!(Strategy::FirstThenSecond.answers("s", &store), vec![RESPONSE]);
    }

    #[test]
    fn first_then_second_rebinds_inside_window() {
        let store = store_with_session("s");
        store.touch("s", Instant::now());

        assert_eq!(Strategy::FirstThenSecond.answers("s", &store), vec![REBOUND]);
    }

    #[test]
    fn first_then_second_cache_flush_forces_response_host() {
        let store = store_with_session("s");
        store.touch("s", Instant::now());
        store.update("s", |state| state.cache_flush = true);

        assert_eq!(Strategy::FirstThenSecond.answers("s", &store), vec![RESPONSE]);
    }

    #[test]
    fn round_robin_alternates_starting_with_response_host() {
        let store = store_with_session("s");

        let sequence: Vec<Vec<HostTarget>> =
            (0..4).map(|_| Strategy::RoundRobin.answers("s", &store)).collect();

        assert_eq!(
            sequence,
            vec![vec![RESPONSE], vec![REBOUND], vec![RESPONSE], vec![REBOUND]]
        );
    }

    #[test]
    fn round_robin_cache_flush_does_not_advance_phase() {
        let store = store_with_session("s");
        store.update("s", |state| state.cache_flush = true);

        assert_eq!(Strategy::RoundRobin.answers("s", &store), vec![RESPONSE]);
        assert_eq!(store.snapshot("s").unwrap().round_robin_phase, 0);
    }

    #[test]
    fn random_answers_one_of_the_two_hosts() {
        let store = store_with_session("s");

        for _ in 0..32 {
            let answers = Strategy::Random.answers("s", &store);
            assert_eq!(answers.len(), 1);
            assert!(answers[0] == RESPONSE || answers[0] == REBOUND);
        }
    }

    #[test]
    fn multi_a_always_answers_both_hosts_in_order() {
        let store = store_with_session("s");
        store.update("s", |state| state.cache_flush = true);

        assert_eq!(Strategy::MultiA.answers("s", &store), vec![RESPONSE, REBOUND]);
    }

    #[test]
    fn unknown_session_yields_no_answers() {
        let store = SessionStore::new();

        assert!(Strategy::MultiA.answers("ghost", &store).is_empty());
    }
}
