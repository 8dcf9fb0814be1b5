//! HTTP/1.1 request-head reading.
//!
//! Reads the request line and headers off the socket, keeping whatever
//! body bytes arrived in the same segments for the body reader.

use std::io;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Upper bound on the request head.
const MAX_HEAD_SIZE: usize = 8192;
/// Upper bound on bodies we are willing to buffer (`/servers` PUT).
const MAX_BODY_SIZE: usize = 65536;

/// Parsed request line and the headers the router cares about.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    /// Raw request target as sent.
    pub target: String,
    /// Target with any query string stripped, for routing.
    pub path: String,
    pub host: Option<String>,
    pub content_length: usize,
    /// Body bytes read together with the head.
    leftover: Vec<u8>,
}

impl RequestHead {
    /// Read and parse one request head. `Ok(None)` means the peer sent
    /// something that is not HTTP (or hung up); the caller should drop
    /// the connection without a response.
    pub async fn read(stream: &mut TcpStream) -> io::Result<Option<RequestHead>> {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            if find_head_end(&buf).is_some() {
                return Ok(Self::parse(&buf));
            }
            if buf.len() >= MAX_HEAD_SIZE {
                return Ok(None);
            }
            match stream.read(&mut chunk).await? {
                0 => return Ok(None),
                n => buf.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Parse a buffer starting with a complete request head.
    fn parse(buf: &[u8]) -> Option<RequestHead> {
        let head_end = find_head_end(buf)?;
        let head_text = std::str::from_utf8(&buf[..head_end]).ok()?;

        let mut lines = head_text.split("\r\n");
        let request_line = lines.next()?;
        let mut parts = request_line.split_whitespace();
        let (method, target, version) = (parts.next()?, parts.next()?, parts.next()?);
        if !version.starts_with("HTTP/") {
            return None;
        }

        let mut host = None;
        let mut content_length = 0;
        for line in lines {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.eq_ignore_ascii_case("host") {
                host = Some(value.to_string());
            } else if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap_or(0);
            }
        }

        Some(RequestHead {
            method: method.to_string(),
            target: target.to_string(),
            path: target.split(['?', '#']).next().unwrap_or("/").to_string(),
            host,
            content_length,
            leftover: buf[head_end + 4..].to_vec(),
        })
    }

    /// Read the request body announced by `Content-Length`.
    pub async fn read_body(&mut self, stream: &mut TcpStream) -> io::Result<Vec<u8>> {
        if self.content_length > MAX_BODY_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request body too large",
            ));
        }

        let mut body = std::mem::take(&mut self.leftover);
        body.truncate(self.content_length);
        let mut chunk = [0u8; 1024];
        while body.len() < self.content_length {
            match stream.read(&mut chunk).await? {
                0 => break,
                n => {
                    let needed = self.content_length - body.len();
                    body.extend_from_slice(&chunk[..n.min(needed)]);
                }
            }
        }
        Ok(body)
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
