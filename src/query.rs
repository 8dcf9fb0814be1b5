//! Rebinding query name parsing.
//!
//! Victim browsers encode the attack parameters in the hostname they
//! resolve: `... s-<ip>-<ip|localhost>-<session>-<strategy>-e.<domain>`.
//! The parser pulls those fields back out of a DNS question name (or an
//! HTTP `Host` header, which carries the same shape).

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use thiserror::Error;

use crate::strategy::Strategy;

/// Start tag delimiting the encoded fields.
const START_TAG: &str = "s-";
/// End tag separating the fields from the real domain suffix.
const END_TAG: &str = "-e.";

/// An answer host: a concrete IPv4 address or the `localhost` token,
/// which is answered as a CNAME so the browser resolves it itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostTarget {
    Ip(Ipv4Addr),
    Localhost,
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostTarget::Ip(ip) => write!(f, "{ip}"),
            HostTarget::Localhost => f.write_str("localhost"),
        }
    }
}

impl FromStr for HostTarget {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("localhost") {
            Ok(HostTarget::Localhost)
        } else {
            s.parse::<Ipv4Addr>().map(HostTarget::Ip)
        }
    }
}

/// Why a query name could not be parsed as a rebinding query.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QnameError {
    #[error("cannot find end tag in query name")]
    NoEndTag,
    #[error("cannot find start tag in query name")]
    NoStartTag,
    #[error("cannot parse domain suffix in query name")]
    BadDomain,
    #[error("expected four dash-separated fields between tags")]
    WrongArity,
    #[error("cannot parse IPv4 address of first host in query name")]
    BadResponseIp,
    #[error("cannot parse IPv4 address of second host in query name")]
    BadReboundIp,
    #[error("empty session token in query name")]
    EmptySession,
}

/// The rebinding parameters carried by one query name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebindQuery {
    /// First host: answered before the rebind. Always a concrete address.
    pub response_ip: Ipv4Addr,
    /// Second host: the rebind target.
    pub rebound_ip: HostTarget,
    /// Opaque browser-generated token. Case is preserved.
    pub session: String,
    /// `None` when the strategy field is empty or names no known
    /// strategy; callers fall back to the configured default.
    pub strategy: Option<Strategy>,
    /// Domain suffix after the end tag, with a leading dot.
    pub domain: String,
    /// Cache-eviction request flag. No current query shape sets this;
    /// the field and its downstream semantics are kept for the day the
    /// encoding grows a fifth field again.
    pub cache_flush: bool,
}

impl RebindQuery {
    /// Parse a query name. Tags are matched case-insensitively; the
    /// session token keeps the case the client sent.
    pub fn parse(qname: &str) -> Result<RebindQuery, QnameError> {
        let lower = qname.to_ascii_lowercase();

        let end = lower.find(END_TAG).ok_or(QnameError::NoEndTag)?;
        let head = &qname[..end];
        let after_end = end + END_TAG.len();

        // The suffix runs to the next end tag, if the name has several.
        let suffix = match lower[after_end..].find(END_TAG) {
            Some(next) => &qname[after_end..after_end + next],
            None => &qname[after_end..],
        };

        let start = lower[..end].find(START_TAG).ok_or(QnameError::NoStartTag)?;
        let after_start = start + START_TAG.len();
        let fields_str = match lower[after_start..end].find(START_TAG) {
            Some(next) => &head[after_start..after_start + next],
            None => &head[after_start..],
        };

        if suffix.len() < 3 || !suffix.contains('.') {
            return Err(QnameError::BadDomain);
        }

        let fields: Vec<&str> = fields_str.split('-').collect();
        if fields.len() != 4 {
            return Err(QnameError::WrongArity);
        }

        let response_ip = fields[0]
            .parse::<Ipv4Addr>()
            .map_err(|_| QnameError::BadResponseIp)?;

        let rebound_ip = fields[1]
            .parse::<HostTarget>()
            .map_err(|_| QnameError::BadReboundIp)?;

        let session = fields[2];
        if session.is_empty() {
            return Err(QnameError::EmptySession);
        }

        let strategy = Strategy::from_name(&fields[3].to_ascii_lowercase());

        Ok(RebindQuery {
            response_ip,
            rebound_ip,
            session: session.to_string(),
            strategy,
            domain: format!(".{suffix}"),
            cache_flush: false,
        })
    }

    /// Format the query name a browser would resolve for these
    /// parameters. Inverse of [`RebindQuery::parse`] on accepted input.
    pub fn qname(&self, domain: &str) -> String {
        let strategy = self.strategy.map(|s| s.name()).unwrap_or("");
        format!(
            "s-{}-{}-{}-{}-e.{}",
            self.response_ip, self.rebound_ip, self.session, strategy, domain
        )
    }
}
