// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `outrig-serverd`: the ingest/query core's process entry point. Wires
//! configuration, logging, the connection multiplexer, the ingest accept
//! loops (TCP mux + Unix control socket), and the HTTP/WS surface together,
//! grounded in the teacher's `run.rs` top-level wiring.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use outrig_core::config::Config;
use outrig_core::http::{self, AppState};
use outrig_core::ingest::{self, PeerEventNotifier};
use outrig_core::mux;
use outrig_core::peer::registry::PeerRegistry;
use outrig_core::rpc::methods::MethodContext;
use outrig_core::rpc::{Broker, Router as RpcRouter, WidgetStore};

/// Republishes peer lifecycle/log events through the broker, scoped by
/// `apprunid`, so any route subscribed to `app:statusupdate`/`log:update`
/// (including the query method table's streaming `LogSearchRequest`) sees
/// them.
struct BrokerNotifier {
    broker: Arc<Broker>,
}

impl PeerEventNotifier for BrokerNotifier {
    fn notify_status_update(&self, apprunid: &str) {
        self.broker.publish("app:statusupdate", Some(vec![apprunid.to_owned()]), None, None, None);
    }

    fn notify_log_update(&self, apprunid: &str) {
        self.broker.publish("log:update", Some(vec![apprunid.to_owned()]), None, None, None);
    }
}

/// Initialize `tracing` from config. Uses `try_init` so repeated calls (e.g.
/// from tests that reuse this binary's library code) never panic.
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Single-instance guard: a PID file under the data directory. Refuses to
/// start if the recorded PID still belongs to a live process; otherwise
/// (stale lock, or no `/proc` entry) takes over the lock.
fn acquire_lockfile(data_dir: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(data_dir)?;
    let lock_path = data_dir.join("lock");
    if let Ok(existing) = fs::read_to_string(&lock_path) {
        if let Ok(pid) = existing.trim().parse::<u32>() {
            if Path::new(&format!("/proc/{pid}")).exists() {
                anyhow::bail!("outrig-serverd already running (pid {pid}, lock {})", lock_path.display());
            }
        }
    }
    fs::write(&lock_path, std::process::id().to_string())?;
    Ok(lock_path)
}

/// Accept loop for a plain ingest-only listener (the Unix control socket):
/// every accepted connection speaks the same handshake as the TCP mux's
/// ingest sub-channel.
async fn serve_unix_ingest(
    listener: UnixListener,
    registry: Arc<PeerRegistry>,
    notifier: Arc<BrokerNotifier>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let registry = Arc::clone(&registry);
                        let notifier = Arc::clone(&notifier);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            ingest::serve(stream, &registry, notifier.as_ref(), shutdown).await;
                        });
                    }
                    Err(e) => tracing::debug!("unix ingest accept error: {e}"),
                }
            }
        }
    }
}

/// Accept loop draining the TCP mux's ingest sub-channel.
async fn serve_mux_ingest(
    mut rx: tokio::sync::mpsc::Receiver<(tokio::net::TcpStream, std::net::SocketAddr)>,
    registry: Arc<PeerRegistry>,
    notifier: Arc<BrokerNotifier>,
    shutdown: CancellationToken,
) {
    while let Some((stream, _addr)) = rx.recv().await {
        let registry = Arc::clone(&registry);
        let notifier = Arc::clone(&notifier);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            ingest::serve(stream, &registry, notifier.as_ref(), shutdown).await;
        });
    }
}

/// Periodically drop log-search widgets that have gone 30s without a
/// keepalive (§4.8's widget GC).
async fn collect_expired_widgets(widgets: Arc<WidgetStore>, shutdown: CancellationToken) {
    let mut tick = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {
                let dropped = widgets.collect_expired();
                if dropped > 0 {
                    tracing::debug!("dropped {dropped} expired log search widgets");
                }
            }
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    init_tracing(&config);
    config.validate()?;

    let data_dir = config.resolve_data_dir();
    let lock_path = acquire_lockfile(&data_dir)?;
    info!("holding lockfile at {}", lock_path.display());

    let shutdown = CancellationToken::new();
    let registry = Arc::new(PeerRegistry::new(config.peer_limits()));
    let broker = Arc::new(Broker::new());
    let router = Arc::new(RpcRouter::new(Arc::clone(&broker)));
    let widgets = Arc::new(WidgetStore::new());
    let notifier = Arc::new(BrokerNotifier { broker: Arc::clone(&broker) });

    let addr = format!("{}:{}", config.host, config.port);
    let mux_handles = mux::spawn(&addr, shutdown.clone()).await?;
    info!("listening on {addr} (HTTP + ingest multiplexed)");

    tokio::spawn(serve_mux_ingest(mux_handles.ingest, Arc::clone(&registry), Arc::clone(&notifier), shutdown.clone()));

    if let Some(socket_path) = config.resolve_socket_path() {
        let _ = fs::remove_file(&socket_path);
        let uds_listener = UnixListener::bind(&socket_path)?;
        info!("listening on {} (Unix control socket)", socket_path.display());
        tokio::spawn(serve_unix_ingest(uds_listener, Arc::clone(&registry), Arc::clone(&notifier), shutdown.clone()));
    }

    tokio::spawn(collect_expired_widgets(Arc::clone(&widgets), shutdown.clone()));

    let state = AppState {
        ctx: MethodContext { registry: Arc::clone(&registry), widgets, router, broker },
        start_ts: outrig_core::peer::now_ms(),
        version: env!("CARGO_PKG_VERSION"),
    };
    let http_router = http::build_router(state);
    let sd = shutdown.clone();
    let http_task = tokio::spawn(async move {
        let result = axum::serve(mux_handles.http, http_router).with_graceful_shutdown(sd.cancelled_owned()).await;
        if let Err(e) = result {
            error!("http server error: {e}");
        }
    });

    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                    info!("received SIGTERM");
                }
                _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                    info!("received SIGINT");
                }
            }
            sd.cancel();

            tokio::select! {
                _ = async { if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await } } => {
                    info!("received SIGTERM again, forcing exit");
                }
                _ = async { if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await } } => {
                    info!("received SIGINT again, forcing exit");
                }
            }
            std::process::exit(130);
        });
    }

    let _ = http_task.await;
    let _ = fs::remove_file(&lock_path);
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::parse();
    if let Err(e) = run(config).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
