//! UDP transport for DNS queries.
//!
//! The main loop only receives; each datagram is answered from its own
//! task so a slow question never blocks the socket.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::warn;

use crate::dns::HEADER_LEN;
use crate::responder::Responder;

use super::MAX_DNS_PACKET_SIZE;

/// UDP front end of the DNS responder.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the UDP socket.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        Ok(Self { socket })
    }

    /// Address the socket actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Start the receive loop in a background task.
    pub fn start(self, responder: Arc<Responder>) {
        tokio::spawn(run(self.socket, responder));
    }
}

async fn run(socket: Arc<UdpSocket>, responder: Arc<Responder>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(error = %e, "UDP recv error");
                continue;
            }
        };

        if len < HEADER_LEN {
            continue;
        }

        let packet = buf[..len].to_vec();
        let socket = socket.clone();
        let responder = responder.clone();
        tokio::spawn(async move {
            if let Some(reply) = responder.handle(&packet) {
                if let Err(e) = socket.send_to(&reply, src).await {
                    warn!(client = %src, error = %e, "UDP send error");
                }
            }
        });
    }
}
