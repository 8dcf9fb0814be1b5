//! Rebind - the server side of a DNS rebinding attack framework.
//!
//! One process answers DNS A queries for an attacker-delegated domain
//! and runs the cooperating HTTP listeners. Query names encode two
//! addresses, a session token and a rebinding strategy; the responder
//! first answers with the attacker host and shortly after with the
//! target, at which point the victim browser treats the target as
//! same-origin with the attacker's scripts.

pub mod config;
pub mod dns;
pub mod firewall;
pub mod http;
pub mod query;
pub mod responder;
pub mod session;
pub mod strategy;
pub mod transport;
