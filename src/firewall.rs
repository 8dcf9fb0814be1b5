//! Packet-drop rules for the multi-A rebinding path.
//!
//! When the multi-A strategy hijacks a browser connection, a short-lived
//! iptables rule keeps the browser from re-reaching the attacker HTTP
//! port on its follow-up sockets, so it fails over to the target
//! address. The rule rejects with a TCP reset and is removed after a
//! few seconds.

use std::net::IpAddr;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

/// How long an installed rule stays in place.
const RULE_LIFETIME: Duration = Duration::from_secs(5);
/// Browsers retry from nearby ephemeral ports; the rule covers a small
/// range above the observed source port.
const SOURCE_PORT_SPAN: u16 = 10;

/// One drop rule scoped to a client flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropRule {
    src_ip: IpAddr,
    src_port: u16,
    dst_ip: IpAddr,
    dst_port: u16,
}

impl DropRule {
    pub fn new(src: std::net::SocketAddr, dst: std::net::SocketAddr) -> Self {
        Self {
            src_ip: src.ip(),
            src_port: src.port(),
            dst_ip: dst.ip(),
            dst_port: dst.port(),
        }
    }

    /// iptables arguments for this rule; `action` is `-A` or `-D`.
    fn args(&self, action: &str) -> Vec<String> {
        vec![
            action.to_string(),
            "INPUT".to_string(),
            "-p".to_string(),
            "tcp".to_string(),
            "-s".to_string(),
            self.src_ip.to_string(),
            "--sport".to_string(),
            format!("{}:{}", self.src_port, self.src_port.saturating_add(SOURCE_PORT_SPAN)),
            "-d".to_string(),
            self.dst_ip.to_string(),
            "--dport".to_string(),
            self.dst_port.to_string(),
            "-j".to_string(),
            "REJECT".to_string(),
            "--reject-with".to_string(),
            "tcp-reset".to_string(),
        ]
    }

    pub async fn install(&self) {
        info!(rule = ?self, "installing packet-drop rule");
        run_iptables(self.args("-A")).await;
    }

    pub async fn remove(&self) {
        info!(rule = ?self, "removing packet-drop rule");
        run_iptables(self.args("-D")).await;
    }
}

/// Install `rule` and remove it again after [`RULE_LIFETIME`]. Failures
/// are logged and swallowed: the hijacked connection is already closed,
/// which is a weaker but workable fallback.
pub fn apply_timed(rule: DropRule) {
    tokio::spawn(async move {
        rule.install().await;
        tokio::time::sleep(RULE_LIFETIME).await;
        rule.remove().await;
    });
}

async fn run_iptables(args: Vec<String>) {
    match Command::new("iptables").args(&args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!(%status, ?args, "iptables exited non-zero"),
        Err(e) => warn!(error = %e, ?args, "failed to run iptables"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> DropRule {
        DropRule::new(
            "203.0.113.9:49152".parse().unwrap(),
            "192.0.2.1:8080".parse().unwrap(),
        )
    }

    #[test]
    fn append_arguments_cover_the_source_port_range() {
        let args = rule().args("-A");

        assert_eq!(
            args,
            vec![
                "-A", "INPUT", "-p", "tcp", "-s", "203.0.113.9", "--sport", "49152:49162",
                "-d", "192.0.2.1", "--dport", "8080", "-j", "REJECT", "--reject-with",
                "tcp-reset",
            ]
        );
    }

    #[test]
    fn delete_arguments_mirror_the_append() {
        let append = rule().args("-A");
        let delete = rule().args("-D");

        assert_eq!(append[1..], delete[1..]);
        assert_eq!(delete[0], "-D");
    }

    #[test]
    fn source_port_range_saturates_at_the_top() {
        let rule = DropRule::new(
            "203.0.113.9:65530".parse().unwrap(),
            "192.0.2.1:8080".parse().unwrap(),
        );

        let args = rule.args("-A");

        assert_eq!(args[7], "65530:65535");
    }
}
