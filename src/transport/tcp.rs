//! TCP transport for DNS queries.
//!
//! Each accepted connection is handled in its own task: read one
//! length-prefixed message, answer it, write the length-prefixed reply.
//! TCP DNS messages are prefixed with a 2-byte big-endian length.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::warn;

use crate::responder::Responder;

use super::MAX_DNS_PACKET_SIZE;

/// TCP front end of the DNS responder.
pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    /// Bind the TCP listener.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    /// Address the listener actually bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start the accept loop in a background task.
    pub fn start(self, responder: Arc<Responder>) {
        tokio::spawn(run_accept_loop(self.listener, responder));
    }
}

async fn run_accept_loop(listener: TcpListener, responder: Arc<Responder>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(handle_connection(stream, responder.clone()));
            }
            Err(e) => {
                warn!(error = %e, "TCP accept error");
            }
        }
    }
}

/// Read one query, answer it, close.
async fn handle_connection(mut stream: TcpStream, responder: Arc<Responder>) {
    let Some(query) = read_dns_message(&mut stream).await else {
        return;
    };

    let Some(reply) = responder.handle(&query) else {
        return;
    };

    let mut framed = Vec::with_capacity(reply.len() + 2);
    framed.extend_from_slice(&(reply.len() as u16).to_be_bytes());
    framed.extend_from_slice(&reply);
    let _ = stream.write_all(&framed).await;
}

/// Read a length-prefixed DNS message from a TCP stream, returning the
/// message without the prefix.
async fn read_dns_message(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
    let mut total_read = 0;

    loop {
        match stream.read(&mut buf[total_read..]).await {
            Ok(0) => return None,
            Ok(n) => total_read += n,
            Err(_) => return None,
        }

        if total_read >= 2 {
            let msg_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
            if msg_len + 2 > buf.len() {
                return None;
            }
            if total_read >= 2 + msg_len {
                buf.truncate(2 + msg_len);
                buf.drain(..2);
                return Some(buf);
            }
        }

        if total_read == buf.len() {
            return None;
        }
    }
}
