//! HTTP/1.1 response writing.
//!
//! Every response carries the no-cache and no-prefetch headers the
//! attack depends on, and closes the connection so the browser opens a
//! fresh socket (and may re-resolve) for its next request.

use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Headers present on every response. Stale payloads or prefetched DNS
/// entries would mask the rebind.
pub const DEFAULT_HEADERS: &str = "Cache-Control: no-cache, no-store, must-revalidate\r\n\
Pragma: no-cache\r\n\
Expires: 0\r\n\
X-DNS-Prefetch-Control: off\r\n";

pub const CONTENT_TYPE_JSON: &str = "application/json; charset=UTF-8";

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

/// Write a complete response and leave the stream ready to be dropped.
pub async fn write_response(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {} {}\r\n{}Content-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason(status),
        DEFAULT_HEADERS,
        content_type,
        body.len(),
    );

    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await
}
