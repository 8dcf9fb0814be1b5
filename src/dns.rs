//! DNS message parsing and construction.
//!
//! Just enough of the wire format for an authoritative-style responder:
//! question decoding and reply encoding for A and CNAME records.
//! Replies never use name compression.

use std::net::Ipv4Addr;

pub const HEADER_LEN: usize = 12;

pub const OPCODE_QUERY: u8 = 0;
pub const RTYPE_A: u16 = 1;
pub const RTYPE_CNAME: u16 = 5;
pub const CLASS_IN: u16 = 1;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_RECURSION_DESIRED: u16 = 0x0100;

/// One entry of the question section.
#[derive(Debug, Clone)]
pub struct DnsQuestion {
    /// Question name with the case the client sent; session tokens are
    /// case-sensitive, so no normalization happens here.
    pub qname: String,
    pub qtype: u16,
    pub qclass: u16,
}

/// A parsed DNS request: header fields plus its questions.
#[derive(Debug, Clone)]
pub struct DnsMessage {
    pub id: u16,
    pub opcode: u8,
    pub recursion_desired: bool,
    pub questions: Vec<DnsQuestion>,
}

impl DnsMessage {
    /// Parse a DNS request from raw bytes (no TCP length prefix).
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_LEN + 1 {
            return None;
        }

        let id = u16::from_be_bytes([data[0], data[1]]);
        let flags = u16::from_be_bytes([data[2], data[3]]);
        let opcode = ((flags >> 11) & 0x0F) as u8;
        let recursion_desired = flags & FLAG_RECURSION_DESIRED != 0;
        let qdcount = u16::from_be_bytes([data[4], data[5]]) as usize;

        let mut pos = HEADER_LEN;
        let mut questions = Vec::with_capacity(qdcount.min(4));

        for _ in 0..qdcount {
            let mut labels = Vec::new();
            loop {
                let label_len = *data.get(pos)? as usize;
                if label_len == 0 {
                    pos += 1;
                    break;
                }
                pos += 1;
                if pos + label_len > data.len() {
                    return None;
                }
                let label = std::str::from_utf8(&data[pos..pos + label_len]).ok()?;
                labels.push(label.to_string());
                pos += label_len;
            }

            if labels.is_empty() || pos + 4 > data.len() {
                return None;
            }
            let qtype = u16::from_be_bytes([data[pos], data[pos + 1]]);
            let qclass = u16::from_be_bytes([data[pos + 2], data[pos + 3]]);
            pos += 4;

            questions.push(DnsQuestion {
                qname: labels.join("."),
                qtype,
                qclass,
            });
        }

        if questions.is_empty() {
            return None;
        }

        Some(Self {
            id,
            opcode,
            recursion_desired,
            questions,
        })
    }
}

/// A resource record of the answer section.
#[derive(Debug, Clone)]
pub struct DnsRecord {
    pub name: String,
    pub rtype: u16,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

/// Reply under construction for one request.
#[derive(Debug, Clone)]
pub struct DnsReply {
    id: u16,
    opcode: u8,
    recursion_desired: bool,
    questions: Vec<DnsQuestion>,
    answers: Vec<DnsRecord>,
}

impl DnsReply {
    /// Start a reply echoing the request's header fields and questions.
    pub fn for_request(request: &DnsMessage) -> Self {
        Self {
            id: request.id,
            opcode: request.opcode,
            recursion_desired: request.recursion_desired,
            questions: request.questions.clone(),
            answers: Vec::new(),
        }
    }

    /// Append an A record for `name`.
    pub fn push_a(&mut self, name: &str, ttl: u32, ip: Ipv4Addr) {
        self.answers.push(DnsRecord {
            name: name.to_string(),
            rtype: RTYPE_A,
            class: CLASS_IN,
            ttl,
            rdata: ip.octets().to_vec(),
        });
    }

    /// Append a CNAME record pointing `name` at `localhost.`, TTL 10.
    pub fn push_cname_localhost(&mut self, name: &str) {
        let mut rdata = Vec::with_capacity(11);
        encode_name(&mut rdata, "localhost");
        self.answers.push(DnsRecord {
            name: name.to_string(),
            rtype: RTYPE_CNAME,
            class: CLASS_IN,
            ttl: 10,
            rdata,
        });
    }

    pub fn answer_count(&self) -> usize {
        self.answers.len()
    }

    /// Encode to wire format. Every name is written in full; replies
    /// carry no compression pointers.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(512);

        let mut flags = FLAG_RESPONSE | ((self.opcode as u16) << 11);
        if self.recursion_desired {
            flags |= FLAG_RECURSION_DESIRED;
        }

        data.extend_from_slice(&self.id.to_be_bytes());
        data.extend_from_slice(&flags.to_be_bytes());
        data.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        data.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        data.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

        for q in &self.questions {
            encode_name(&mut data, &q.qname);
            data.extend_from_slice(&q.qtype.to_be_bytes());
            data.extend_from_slice(&q.qclass.to_be_bytes());
        }

        for a in &self.answers {
            encode_name(&mut data, &a.name);
            data.extend_from_slice(&a.rtype.to_be_bytes());
            data.extend_from_slice(&a.class.to_be_bytes());
            data.extend_from_slice(&a.ttl.to_be_bytes());
            data.extend_from_slice(&(a.rdata.len() as u16).to_be_bytes());
            data.extend_from_slice(&a.rdata);
        }

        data
    }
}

fn encode_name(buf: &mut Vec<u8>, name: &str) {
    for label in name.split('.').filter(|l| !l.is_empty()) {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_query(id: u16, qname: &str, qtype: u16) -> Vec<u8> {
        let mut packet = Vec::with_capacity(512);
        packet.extend_from_slice(&id.to_be_bytes());
        packet.extend_from_slice(&[0x01, 0x00]); // Flags: standard query, RD
        packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
        packet.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
        packet.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
        packet.extend_from_slice(&[0x00, 0x00]); // ARCOUNT
        encode_name(&mut packet, qname);
        packet.extend_from_slice(&qtype.to_be_bytes());
        packet.extend_from_slice(&CLASS_IN.to_be_bytes());
        packet
    }

    #[test]
    fn parses_a_query() {
        let packet = build_query(0x1234, "s-1.2.3.4-localhost-K-fromquerymultia-e.evil.tld", RTYPE_A);

        let msg = DnsMessage::parse(&packet).unwrap();

        assert_eq!(msg.id, 0x1234);
        assert_eq!(msg.opcode, OPCODE_QUERY);
        assert!(msg.recursion_desired);
        assert_eq!(msg.questions.len(), 1);
        assert_eq!(
            msg.questions[0].qname,
            "s-1.2.3.4-localhost-K-fromquerymultia-e.evil.tld"
        );
        assert_eq!(msg.questions[0].qtype, RTYPE_A);
    }

    #[test]
    fn qname_case_survives_parsing() {
        let packet = build_query(1, "MiXeD.Case.TLD", RTYPE_A);

        let msg = DnsMessage::parse(&packet).unwrap();

        assert_eq!(msg.questions[0].qname, "MiXeD.Case.TLD");
    }

    #[test]
    fn rejects_truncated_packets() {
        let packet = build_query(1, "evil.tld", RTYPE_A);

        assert!(DnsMessage::parse(&packet[..HEADER_LEN]).is_none());
        assert!(DnsMessage::parse(&packet[..packet.len() - 3]).is_none());
    }

    #[test]
    fn reply_echoes_header_and_question() {
        let packet = build_query(0xBEEF, "evil.tld", RTYPE_A);
        let msg = DnsMessage::parse(&packet).unwrap();

        let reply = DnsReply::for_request(&msg).to_bytes();

        assert_eq!(u16::from_be_bytes([reply[0], reply[1]]), 0xBEEF);
        let flags = u16::from_be_bytes([reply[2], reply[3]]);
        assert_ne!(flags & 0x8000, 0, "QR bit set");
        assert_ne!(flags & 0x0100, 0, "RD echoed");
        assert_eq!(u16::from_be_bytes([reply[4], reply[5]]), 1, "QDCOUNT");
        assert_eq!(u16::from_be_bytes([reply[6], reply[7]]), 0, "ANCOUNT");
    }

    #[test]
    fn a_record_encodes_address_bytes() {
        let packet = build_query(1, "evil.tld", RTYPE_A);
        let msg = DnsMessage::parse(&packet).unwrap();
        let mut reply = DnsReply::for_request(&msg);
        reply.push_a("evil.tld", 0, Ipv4Addr::new(1, 2, 3, 4));

        let bytes = reply.to_bytes();

        assert_eq!(u16::from_be_bytes([bytes[6], bytes[7]]), 1, "ANCOUNT");
        assert_eq!(&bytes[bytes.len() - 4..], &[1, 2, 3, 4]);
    }

    #[test]
    fn cname_record_targets_localhost() {
        let packet = build_query(1, "evil.tld", RTYPE_A);
        let msg = DnsMessage::parse(&packet).unwrap();
        let mut reply = DnsReply::for_request(&msg);
        reply.push_cname_localhost("evil.tld");

        let bytes = reply.to_bytes();
        let rdata_expected = [9, b'l', b'o', b'c', b'a', b'l', b'h', b'o', b's', b't', 0];

        assert_eq!(&bytes[bytes.len() - rdata_expected.len()..], &rdata_expected);
    }

    #[test]
    fn answers_never_use_compression_pointers() {
        let packet = build_query(1, "evil.tld", RTYPE_A);
        let msg = DnsMessage::parse(&packet).unwrap();
        let mut reply = DnsReply::for_request(&msg);
        reply.push_a("evil.tld", 10, Ipv4Addr::new(1, 2, 3, 4));
        reply.push_a("evil.tld", 10, Ipv4Addr::new(5, 6, 7, 8));

        let bytes = reply.to_bytes();

        // An uncompressed reply to this question is label bytes, counts
        // and addresses only; pointer bytes start 0xC0.
        assert!(!bytes.contains(&0xC0));
    }
}
