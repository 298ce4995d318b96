use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use rcl_core::{ConnectionId, ServerConfig, ShortcutTable};

use crate::discovery;
use crate::dispatcher;
use crate::driver::{load_driver, ClDriver};
use crate::session::Session;

/// Server-wide metrics tracked via atomic counters.
pub struct ServerMetrics {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU32,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
    pub rejected_handles: AtomicU64,
    pub transfers: AtomicU64,
    pub start_time: std::time::Instant,
}

impl ServerMetrics {
    fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU32::new(0),
            requests_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            rejected_handles: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
            start_time: std::time::Instant::now(),
        }
    }

    fn log_snapshot(&self) {
        info!(
            uptime_secs = self.start_time.elapsed().as_secs(),
            connections_total = self.connections_total.load(Ordering::Relaxed),
            connections_active = self.connections_active.load(Ordering::Relaxed),
            requests = self.requests_total.load(Ordering::Relaxed),
            errors = self.errors_total.load(Ordering::Relaxed),
            rejected_handles = self.rejected_handles.load(Ordering::Relaxed),
            transfers = self.transfers.load(Ordering::Relaxed),
            "metrics snapshot"
        );
    }
}

/// State shared by the accept loop and every connection thread.
pub struct ServerState {
    pub config: ServerConfig,
    pub driver: Arc<dyn ClDriver>,
    pub shortcuts: ShortcutTable,
    pub metrics: ServerMetrics,
    shutdown: AtomicBool,
}

impl ServerState {
    pub fn new(config: ServerConfig, driver: Arc<dyn ClDriver>) -> Arc<Self> {
        Arc::new(Self {
            config,
            driver,
            shortcuts: ShortcutTable::new(),
            metrics: ServerMetrics::new(),
            shutdown: AtomicBool::new(false),
        })
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

/// The rcl server. Accepts clients and runs one dispatcher loop per client.
pub struct RclServer {
    state: Arc<ServerState>,
    next_connection_id: AtomicU64,
}

impl RclServer {
    /// Create a server backed by the driver the configuration selects.
    pub fn new(config: ServerConfig) -> Self {
        let driver = load_driver(&config);
        Self::with_driver(config, driver)
    }

    pub fn with_driver(config: ServerConfig, driver: Arc<dyn ClDriver>) -> Self {
        Self {
            state: ServerState::new(config, driver),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM.
    pub async fn run(&self) -> anyhow::Result<()> {
        let config = &self.state.config;
        config.validate()?;

        let platforms = discovery::discover(self.state.driver.as_ref());
        info!(
            "serving {} platform(s) via {} driver: {}",
            platforms.len(),
            self.state.driver.backend(),
            platforms
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let bind_addr = SocketAddr::new(config.bind_addr()?, config.port);
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("failed to bind {}", bind_addr))?;
        info!("rcl server listening on {} ({})", bind_addr, rcl_common::platform::platform_name());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        });

        self.serve(listener, shutdown_rx).await
    }

    /// Accept loop on an already bound listener. Returns once `shutdown`
    /// flips to `true` and active connections drained (max 10s).
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        // Periodic metrics logger
        let state = self.state.clone();
        let mut metrics_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(60)) => state.metrics.log_snapshot(),
                    _ = metrics_shutdown.changed() => break,
                }
            }
        });

        let active_sessions = Arc::new(AtomicU32::new(0));
        let max_clients = self.state.config.max_clients;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };

                    let current = active_sessions.load(Ordering::Relaxed);
                    if current >= max_clients {
                        warn!(
                            "connection from {} rejected: max_clients ({}) reached",
                            peer_addr, max_clients
                        );
                        drop(stream);
                        continue;
                    }

                    let blocking = stream
                        .into_std()
                        .and_then(|s| s.set_nonblocking(false).map(|()| s));
                    let stream = match blocking {
                        Ok(s) => s,
                        Err(e) => {
                            error!("connection setup failed for {}: {}", peer_addr, e);
                            continue;
                        }
                    };

                    let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
                    info!(conn_id = id.0, "new connection from {}", peer_addr);

                    let state = self.state.clone();
                    let active = active_sessions.clone();
                    active.fetch_add(1, Ordering::Relaxed);
                    state.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
                    state.metrics.connections_active.fetch_add(1, Ordering::Relaxed);

                    tokio::task::spawn_blocking(move || {
                        match Session::new(id, stream, state.clone()) {
                            Ok(session) => dispatcher::serve_connection(session),
                            Err(e) => error!(conn_id = id.0, "connection setup failed: {}", e),
                        }
                        active.fetch_sub(1, Ordering::Relaxed);
                        state.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
                    });
                }
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }

        self.state.request_shutdown();

        // Wait for active sessions to drain (max 10s)
        let remaining = active_sessions.load(Ordering::Relaxed);
        if remaining > 0 {
            info!("waiting for {} active session(s) to finish (max 10s)", remaining);
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while active_sessions.load(Ordering::Relaxed) > 0
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            let still_active = active_sessions.load(Ordering::Relaxed);
            if still_active > 0 {
                warn!("{} session(s) still active after drain timeout", still_active);
            }
        }

        self.state.metrics.log_snapshot();
        info!("server shut down cleanly");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => { info!("received Ctrl+C, initiating shutdown"); }
                    _ = sigterm.recv() => { info!("received SIGTERM, initiating shutdown"); }
                }
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await;
                info!("received Ctrl+C, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received Ctrl+C, initiating shutdown");
    }
}
