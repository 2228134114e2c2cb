//! The TCP front end: configuration, the accept loop and shutdown.
//!
//! [`Server`] owns a listener and a bounded pool of connection tasks. A
//! connection task is only spawned once a worker permit is held, so when all
//! workers are busy the accept loop itself blocks and the kernel backlog
//! absorbs new connections. [`ServerHandle`] drives graceful shutdown:
//! stop accepting, wait for in-flight sessions up to a grace period, then
//! abort the stragglers.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Level, error, info, trace, warn};

use crate::connection::ConnectionSession;
use crate::fault::FaultResolver;
use crate::router::Router;

/// Upper bound on the configurable request-body cap.
const MAX_BODY_CEILING: usize = 64 * 1024;

/// Tunables shared by the accept loop and every connection session.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrently processed connections.
    pub workers: usize,
    /// Listen backlog passed to the socket.
    pub backlog: u32,
    /// Requests served on one connection before it is closed.
    pub max_keep_alive_cycles: usize,
    /// Largest accepted `Content-Length`, in bytes.
    pub max_body_size: usize,
    /// How long shutdown waits for in-flight sessions before aborting them.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().map(usize::from).unwrap_or(1),
            backlog: 50,
            max_keep_alive_cycles: 10,
            max_body_size: 1024,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Read-only view of the running server, handed to fault handlers.
#[derive(Debug)]
pub struct ServerContext {
    config: ServerConfig,
    running: AtomicBool,
}

impl ServerContext {
    pub(crate) fn new(config: ServerConfig) -> Self {
        Self { config, running: AtomicBool::new(false) }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Whether the accept loop is live. `false` before `run` and again once
    /// shutdown has stopped accepting.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }
}

/// Everything a connection session needs, shared across all tasks.
#[derive(Debug)]
pub struct ServerShared {
    router: Arc<Router>,
    resolver: FaultResolver,
    context: ServerContext,
}

impl ServerShared {
    pub fn new(router: Router, resolver: FaultResolver, config: ServerConfig) -> Self {
        Self { router: Arc::new(router), resolver, context: ServerContext::new(config) }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn resolver(&self) -> &FaultResolver {
        &self.resolver
    }

    pub fn context(&self) -> &ServerContext {
        &self.context
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("router must be set")]
    MissingRouter,
    #[error("address must be set")]
    MissingAddress,
    #[error("address did not resolve")]
    InvalidAddress {
        #[source]
        source: io::Error,
    },
}

pub struct ServerBuilder {
    address: Option<io::Result<Vec<SocketAddr>>>,
    router: Option<Router>,
    faults: FaultResolver,
    config: ServerConfig,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { address: None, router: None, faults: FaultResolver::empty(), config: ServerConfig::default() }
    }

    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(Iterator::collect));
        self
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn faults(mut self, faults: FaultResolver) -> Self {
        self.faults = faults;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.backlog = backlog;
        self
    }

    pub fn max_keep_alive_cycles(mut self, cycles: usize) -> Self {
        self.config.max_keep_alive_cycles = cycles.max(1);
        self
    }

    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.config.max_body_size = bytes.min(MAX_BODY_CEILING);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let address = match self.address.ok_or(ServerBuildError::MissingAddress)? {
            Ok(address) => address,
            Err(source) => return Err(ServerBuildError::InvalidAddress { source }),
        };
        let router = self.router.ok_or(ServerBuildError::MissingRouter)?;
        let shared = Arc::new(ServerShared::new(router, self.faults, self.config));

        Ok(Server {
            address,
            listener: None,
            shared,
            accept_token: CancellationToken::new(),
            abort_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder").field("config", &self.config).finish_non_exhaustive()
    }
}

pub struct Server {
    address: Vec<SocketAddr>,
    listener: Option<TcpListener>,
    shared: Arc<ServerShared>,
    accept_token: CancellationToken,
    abort_token: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the listener eagerly and returns the local address. Useful when
    /// binding to port 0; `run` binds lazily otherwise.
    pub fn bind(&mut self) -> io::Result<SocketAddr> {
        let listener = bind_with_backlog(&self.address, self.shared.context().config().backlog)?;
        let local = listener.local_addr()?;
        self.listener = Some(listener);
        Ok(local)
    }

    /// A handle for shutting the server down from another task.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            accept_token: self.accept_token.clone(),
            abort_token: self.abort_token.clone(),
            tracker: self.tracker.clone(),
            grace: self.shared.context().config().shutdown_grace,
        }
    }

    /// Runs the accept loop until shut down. Each accepted connection is
    /// processed by its own task; a worker permit is taken before `accept`,
    /// so a full pool pauses accepting rather than queueing sessions.
    pub async fn run(mut self) -> io::Result<()> {
        let _ = tracing_subscriber::fmt().with_max_level(Level::INFO).try_init();

        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => bind_with_backlog(&self.address, self.shared.context().config().backlog)?,
        };
        info!(address = %listener.local_addr()?, "server listening");

        self.shared.context().set_running(true);
        let workers = Arc::new(Semaphore::new(self.shared.context().config().workers));

        loop {
            let permit = tokio::select! {
                _ = self.accept_token.cancelled() => break,
                permit = Arc::clone(&workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, remote) = tokio::select! {
                _ = self.accept_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(cause = %e, "failed to accept");
                        continue;
                    }
                },
            };
            trace!(%remote, "accepted connection");

            let shared = Arc::clone(&self.shared);
            let abort = self.abort_token.clone();
            self.tracker.spawn(async move {
                let _permit = permit;
                let (reader, writer) = stream.into_split();
                let session = ConnectionSession::new(reader, writer, shared);

                tokio::select! {
                    _ = abort.cancelled() => {
                        warn!(%remote, "connection aborted during shutdown");
                    }
                    result = session.process() => match result {
                        Ok(()) => trace!(%remote, "connection finished"),
                        Err(e) => error!(%remote, cause = %e, "connection failed"),
                    },
                }
            });
        }

        self.shared.context().set_running(false);
        self.tracker.close();
        info!("server stopped accepting");
        Ok(())
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Controls a running server from outside its task.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    accept_token: CancellationToken,
    abort_token: CancellationToken,
    tracker: TaskTracker,
    grace: Duration,
}

impl ServerHandle {
    /// Stops accepting, waits up to the grace period for in-flight sessions,
    /// then aborts whatever is left.
    pub async fn shutdown(&self) {
        self.accept_token.cancel();
        self.tracker.close();

        if timeout(self.grace, self.tracker.wait()).await.is_err() {
            warn!("grace period elapsed, aborting remaining connections");
            self.abort_token.cancel();
            self.tracker.wait().await;
        }
    }
}

fn bind_with_backlog(addresses: &[SocketAddr], backlog: u32) -> io::Result<TcpListener> {
    let mut last_error = None;
    for &address in addresses {
        let socket = if address.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
        socket.set_reuseaddr(true)?;
        if let Err(e) = socket.bind(address) {
            last_error = Some(e);
            continue;
        }
        return socket.listen(backlog);
    }
    Err(last_error.unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")))
}
