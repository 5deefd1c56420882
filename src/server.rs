//!
//! nfstore TCP server
//! ------------------
//! Accepts connections on one listening socket and runs each as an independent
//! session task. All sessions share one [`ServerContext`]: the file store, the
//! trash bin and the cache registry behind them.
//!
//! Shutdown: the listener stops accepting, every session is told to stop and
//! finishes the command it is executing, then closes its file handle. Sessions
//! still alive after the configured grace period are aborted.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::cache::CacheRegistry;
use crate::config::ServerConfig;
use crate::storage::{DataLayout, FileStore, TrashBin, WriteGate};

pub mod session;

pub use session::{Session, SessionState};

static CONN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// State shared by every session of one server.
#[derive(Debug)]
pub struct ServerContext {
    pub config: ServerConfig,
    pub files: FileStore,
    pub trash: TrashBin,
}

impl ServerContext {
    /// Build the shared state and make sure the data and trash directories exist.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let layout = DataLayout::new(&config.root);
        layout.ensure()
            .with_context(|| format!("Failed to create or access data root: {}", config.root.display()))?;
        let caches = Arc::new(CacheRegistry::new(config.cache_capacity)?);
        let gate = Arc::new(WriteGate::new(config.write_lock));
        let files = FileStore::new(layout.clone(), caches.clone(), gate.clone());
        let trash = TrashBin::new(layout, caches, gate);
        Ok(Arc::new(Self { config, files, trash }))
    }

    pub fn caches(&self) -> &Arc<CacheRegistry> { self.files.caches() }
}

pub struct Server {
    ctx: Arc<ServerContext>,
    listener: TcpListener,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.listen_addr();
        let ctx = ServerContext::new(config)?;
        let listener = TcpListener::bind(&addr).await
            .with_context(|| format!("Failed to bind {}", addr))?;
        Ok(Self { ctx, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> { Ok(self.listener.local_addr()?) }

    pub fn context(&self) -> &Arc<ServerContext> { &self.ctx }

    /// Accept connections until `shutdown` resolves, then drain sessions.
    pub async fn serve<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Server { ctx, listener } = self;
        let local = listener.local_addr()?;
        info!(
            target: "nfstore::server",
            "listening on {} (root='{}', cache_capacity={}, write_lock={:?})",
            local, ctx.config.root.display(), ctx.config.cache_capacity, ctx.config.write_lock
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((socket, peer)) => {
                        let _ = socket.set_nodelay(true);
                        let conn_id = CONN_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
                        sessions.spawn(serve_connection(ctx.clone(), socket, conn_id, peer.to_string(), stop_rx.clone()));
                    }
                    Err(e) => {
                        // per-connection failures never take the listener down
                        warn!(target: "nfstore::server", "accept failed: {}", e);
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = joined {
                        error!(target: "nfstore::server", "session task failed: {}", e);
                    }
                }
            }
        }

        drop(listener);
        let _ = stop_tx.send(true);
        let active = sessions.len();
        info!(target: "nfstore::server", "shutdown requested, draining {} session(s)", active);
        let grace = Duration::from_millis(ctx.config.shutdown_grace_ms);
        let drained = tokio::time::timeout(grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(target: "nfstore::server", "{} session(s) still running after {:?}; aborting", sessions.len(), grace);
            sessions.shutdown().await;
        }
        info!(target: "nfstore::server", "stopped; {} file cache(s) released", ctx.caches().len());
        Ok(())
    }
}

/// Run one connection to completion inside its own tracing span.
pub async fn serve_connection<S>(ctx: Arc<ServerContext>, stream: S, conn_id: u64, peer: String, stop: watch::Receiver<bool>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let span = info_span!("session", conn_id, peer = %peer, trace = tracing::field::Empty);
    async move {
        info!(target: "nfstore::session", "client connected");
        match Session::new(ctx, stream, conn_id).run(stop).await {
            Ok(()) => info!(target: "nfstore::session", "client disconnected"),
            Err(e) => warn!(target: "nfstore::session", code = e.code_str(), "session ended: {}", e),
        }
    }
    .instrument(span)
    .await
}

/// Bind from `config` and serve until Ctrl+C.
pub async fn run(config: ServerConfig) -> Result<()> {
    let server = Server::bind(config).await?;
    server
        .serve(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(target: "nfstore::server", "signal error: {}", e);
                // without a signal handler, keep serving
                std::future::pending::<()>().await;
            }
        })
        .await
}
