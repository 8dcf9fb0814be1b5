//! DNS transport listeners.
//!
//! UDP and TCP front ends for the responder. Transports only move
//! bytes; every decision lives in [`crate::responder`].

pub mod tcp;
pub mod udp;

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;
