//! HTTP listener supervision.
//!
//! A fixed set of listeners starts at boot; the manager may run one
//! more, installed through `/servers` PUT. Each listener is an accept
//! loop that spawns a router task per connection; when a loop exits,
//! stopped or failed, it reports on a shared error channel and the
//! process carries on.

use std::future::Future;
use std::io;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::http::router::Router;
use crate::session::SessionStore;

/// Exit report of one listener's accept loop.
#[derive(Debug)]
pub struct ServerError {
    pub err: io::Error,
    pub port: u16,
}

/// `/servers` wire representation of one listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(rename = "Port")]
    pub port: String,
}

/// `/servers` GET response body.
#[derive(Debug, Serialize)]
pub struct ServersReply {
    #[serde(rename = "ServerInformation")]
    pub server_information: Vec<ServerInfo>,
    #[serde(rename = "AllowDynamicHTTPServers")]
    pub allow_dynamic_http_servers: bool,
}

struct ListenerEntry {
    port: u16,
    shutdown: oneshot::Sender<()>,
}

#[derive(Default)]
struct Inventory {
    static_entries: Vec<ListenerEntry>,
    dynamic: Option<ListenerEntry>,
}

/// The listener inventory plus everything a fresh router needs.
///
/// Constructed once with the store injected; each started listener
/// composes its own [`Router`] around these shared references, which is
/// what lets `/servers` PUT call back into the supervisor it is served
/// by.
pub struct ServerStore {
    config: Arc<AppConfig>,
    store: Arc<SessionStore>,
    inventory: RwLock<Inventory>,
    err_tx: mpsc::UnboundedSender<ServerError>,
}

impl ServerStore {
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<SessionStore>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerError>) {
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                config,
                store,
                inventory: RwLock::new(Inventory::default()),
                err_tx,
            }),
            err_rx,
        )
    }

    fn router(self: &Arc<Self>) -> Router {
        Router {
            config: self.config.clone(),
            store: self.store.clone(),
            servers: self.clone(),
        }
    }

    /// Bind and start one listener. Bind failures surface before any
    /// state changes. A dynamic add on a port a static listener already
    /// owns is skipped: the slot stays empty and the call still
    /// succeeds, which is what the manager protocol expects.
    pub fn start(
        self: &Arc<Self>,
        port: u16,
        dynamic: bool,
    ) -> Pin<Box<dyn Future<Output = io::Result<u16>> + Send + '_>> {
        Box::pin(async move {
            let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
            let bound = listener.local_addr()?.port();
            let (shutdown_tx, shutdown_rx) = oneshot::channel();

            {
                let mut inventory = self.inventory.write();
                if dynamic {
                    if inventory.static_entries.iter().any(|e| e.port == bound) {
                        warn!(port = bound, "static listener owns this port, dynamic add skipped");
                        return Ok(bound);
                    }
                    inventory.dynamic = Some(ListenerEntry {
                        port: bound,
                        shutdown: shutdown_tx,
                    });
                } else {
                    inventory.static_entries.push(ListenerEntry {
                        port: bound,
                        shutdown: shutdown_tx,
                    });
                }
            }

            info!(port = bound, dynamic, "starting HTTP listener");
            tokio::spawn(accept_loop(
                listener,
                shutdown_rx,
                self.router(),
                self.err_tx.clone(),
                bound,
            ));
            Ok(bound)
        })
    }

    /// Stop the dynamic listener, if one runs. Its accept loop reports
    /// the stop on the error channel.
    pub fn stop_dynamic(&self) {
        let entry = self.inventory.write().dynamic.take();
        if let Some(entry) = entry {
            info!(port = entry.port, "stopping dynamic HTTP listener");
            let _ = entry.shutdown.send(());
        }
    }

    /// Static listener ports in start order, then the dynamic port.
    pub fn ports(&self) -> (Vec<u16>, Option<u16>) {
        let inventory = self.inventory.read();
        (
            inventory.static_entries.iter().map(|e| e.port).collect(),
            inventory.dynamic.as_ref().map(|e| e.port),
        )
    }

    /// Record a static entry without a live listener behind it.
    #[cfg(test)]
    fn insert_static_entry(&self, port: u16) {
        let (shutdown, _) = oneshot::channel();
        self.inventory
            .write()
            .static_entries
            .push(ListenerEntry { port, shutdown });
    }

    /// `/servers` GET body for the current inventory.
    pub fn describe(&self) -> ServersReply {
        let (static_ports, dynamic_port) = self.ports();
        let server_information = static_ports
            .into_iter()
            .chain(dynamic_port)
            .map(|port| ServerInfo {
                port: port.to_string(),
            })
            .collect();
        ServersReply {
            server_information,
            allow_dynamic_http_servers: self.config.allow_dynamic_servers,
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
    router: Router,
    err_tx: mpsc::UnboundedSender<ServerError>,
    port: u16,
) {
    let err = loop {
        tokio::select! {
            _ = &mut shutdown => {
                break io::Error::new(io::ErrorKind::Interrupted, "listener stopped");
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let router = router.clone();
                    tokio::spawn(async move { router.handle(stream).await });
                }
                Err(e) => break e,
            },
        }
    };
    let _ = err_tx.send(ServerError { err, port });
}

/// Log listener exits for process lifetime.
pub async fn drain_errors(mut err_rx: mpsc::UnboundedReceiver<ServerError>) {
    while let Some(report) = err_rx.recv().await {
        info!(port = report.port, error = %report.err, "HTTP listener exited");
    }
}
