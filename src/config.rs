//! Process-wide configuration.
//!
//! Built once from the command line at startup and shared as an `Arc`;
//! nothing mutates it afterwards, so every task may read it without
//! locking.

use std::path::PathBuf;
use std::time::Duration;

use crate::query::HostTarget;
use crate::strategy::Strategy;

/// Running parameters of the rebinding server.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// UDP/TCP port of the DNS responder.
    pub dns_port: u16,
    /// Ports of the static HTTP listeners started at boot.
    pub http_ports: Vec<u16>,
    /// Attacker host answered when a query name carries none.
    pub response_ip: HostTarget,
    /// Rebind target answered when a query name carries none.
    pub rebound_ip: HostTarget,
    /// Strategy applied when a query names none or an unknown one.
    pub default_strategy: Strategy,
    /// Window during which follow-up queries answer the rebound host.
    pub rebound_timeout: Duration,
    /// Idle time after which a session is swept from the store.
    pub session_ttl: Duration,
    /// Whether the manager may add one HTTP listener at runtime.
    pub allow_dynamic_servers: bool,
    /// Directory of payload files served to victim browsers.
    pub web_root: PathBuf,
}
