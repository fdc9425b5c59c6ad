//! Listener and accept loop.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Keep exactly one accept operation outstanding while listening
//! - Build a session per accepted socket and start its handshake
//! - Enforce max_connections via semaphore
//! - Tear everything down on stop
//!
//! # Design Decisions
//! - Each accept runs in its own task. When it completes, the task posts the
//!   next accept *before* it touches the result, so readiness to accept never
//!   waits on a handshake
//! - Shutdown is the only abort signal; it suppresses the re-post
//! - Accept failures are reported and otherwise ignored

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dashmap::DashMap;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::{validate_config, ConfigError, ListenerConfig, TlsConfig};
use crate::http::{ErrorSink, LogErrorSink, RequestPipeline};
use crate::lifecycle::Shutdown;
use crate::net::connection::{ConnectionId, ConnectionTracker};
use crate::net::error::ConnectionError;
use crate::net::handshake::HandshakeCoordinator;
use crate::net::session::{HandshakeOutcome, Session};
use crate::net::tls::TlsContext;
use crate::net::transport::{PlainTransport, TlsTransport, Transport};
use crate::observability::{ListenerStats, StatsSnapshot};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Configuration could not be applied.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Failed to resolve or bind the address.
    #[error("failed to bind: {0}")]
    Bind(#[source] io::Error),
    /// `start()` called when the listener is not idle.
    #[error("listener cannot start from state {0:?}")]
    InvalidState(AcceptorState),
}

/// Lifecycle of a listener. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorState {
    /// Created, not yet started.
    Idle,
    /// `start()` is resolving and binding.
    Starting,
    /// One accept operation is outstanding at all times.
    Listening,
    /// Shut down. Terminal.
    Stopped,
}

/// Bounds the number of live sessions.
///
/// A permit is taken before each accept and held by the session, so a full
/// listener stops accepting until a session is released.
#[derive(Debug, Clone)]
pub struct ConnectionLimit {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimit {
    /// Create a limit of `max_connections` concurrent sessions.
    pub fn new(max_connections: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a free slot. `None` once the limit has been closed.
    pub async fn acquire(&self) -> Option<ConnectionPermit> {
        Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .ok()
            .map(|permit| ConnectionPermit { _permit: permit })
    }

    /// Wake every waiter with `None` and refuse further permits.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Slots currently free.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured upper bound.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

/// An HTTPS listener.
pub type HttpsListener = Listener<TlsTransport>;

/// A plain HTTP listener sharing the same accept skeleton.
pub type HttpListener = Listener<PlainTransport>;

/// Owns the listening socket and every in-flight session.
///
/// Shared as `Arc<Listener<T>>`. Pending accepts hold only a weak
/// reference, so dropping the last handle stops the listener.
pub struct Listener<T: Transport> {
    config: ListenerConfig,
    coordinator: Arc<HandshakeCoordinator<T>>,
    error_sink: Arc<dyn ErrorSink>,
    pipeline: Arc<dyn RequestPipeline<T>>,
    state: Mutex<AcceptorState>,
    socket: Mutex<Option<Arc<TcpListener>>>,
    local_addr: Mutex<Option<SocketAddr>>,
    connection_limit: ConnectionLimit,
    tracker: ConnectionTracker,
    sessions: Arc<DashMap<ConnectionId, Weak<Session>>>,
    shutdown: Shutdown,
    stats: Arc<ListenerStats>,
}

impl Listener<TlsTransport> {
    /// Load certificate material and build an HTTPS listener.
    ///
    /// Supplying `verify_path` requires every client to present a
    /// certificate issued by one of the roots it contains.
    pub fn create(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        verify_path: Option<PathBuf>,
        mut config: ListenerConfig,
        pipeline: Arc<dyn RequestPipeline<TlsTransport>>,
    ) -> Result<Self, ConfigError> {
        let mut tls = TlsConfig::new(cert_path.as_ref(), key_path.as_ref());
        tls.verify_path = verify_path;
        config.tls = Some(tls);
        Self::from_config(config, pipeline)
    }

    /// Build an HTTPS listener from `config.tls`.
    pub fn from_config(
        config: ListenerConfig,
        pipeline: Arc<dyn RequestPipeline<TlsTransport>>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config)?;
        let tls = config.tls.as_ref().ok_or(ConfigError::MissingTls)?;
        let context = TlsContext::from_config(tls)?;
        Ok(Self::new(config, TlsTransport::new(context), pipeline))
    }

    /// TLS state shared by every handshake of this listener.
    pub fn tls_context(&self) -> &TlsContext {
        self.coordinator.transport().context()
    }
}

impl<T: Transport> Listener<T> {
    /// Build a listener over `transport`. Failures go to [`LogErrorSink`]
    /// until [`Listener::with_error_sink`] replaces it.
    pub fn new(config: ListenerConfig, transport: T, pipeline: Arc<dyn RequestPipeline<T>>) -> Self {
        let error_sink: Arc<dyn ErrorSink> = Arc::new(LogErrorSink);
        let stats = Arc::new(ListenerStats::new());
        let coordinator = Arc::new(HandshakeCoordinator::new(
            Arc::new(transport),
            Arc::clone(&pipeline),
            Arc::clone(&error_sink),
            Arc::clone(&stats),
            config.timeouts.request(),
        ));

        Self {
            connection_limit: ConnectionLimit::new(config.max_connections),
            config,
            coordinator,
            error_sink,
            pipeline,
            state: Mutex::new(AcceptorState::Idle),
            socket: Mutex::new(None),
            local_addr: Mutex::new(None),
            tracker: ConnectionTracker::new(),
            sessions: Arc::new(DashMap::new()),
            shutdown: Shutdown::new(),
            stats,
        }
    }

    /// Replace the default logging error sink.
    pub fn with_error_sink(mut self, error_sink: impl ErrorSink) -> Self {
        self.error_sink = Arc::new(error_sink);
        self.coordinator = Arc::new(HandshakeCoordinator::new(
            Arc::clone(self.coordinator.transport()),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.error_sink),
            Arc::clone(&self.stats),
            self.config.timeouts.request(),
        ));
        self
    }

    /// Configuration the listener was built with.
    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AcceptorState {
        *lock(&self.state)
    }

    /// Point-in-time copy of the accept and handshake counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Sessions not yet released (handshaking or handed to the pipeline).
    pub fn active_sessions(&self) -> u64 {
        self.tracker.active_count()
    }

    /// Tracker for live sessions, e.g. to wait for them to drain.
    pub fn connection_tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Bind and begin accepting.
    ///
    /// Finalises the transport (for TLS: installs the session-cache
    /// identifier) before the first accept is posted. Returns the bound
    /// address, which matters when the configured port is `0`.
    ///
    /// Dropping the last handle to a started listener stops it.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ListenerError> {
        self.transition(AcceptorState::Idle, AcceptorState::Starting)?;

        if let Err(err) = self.coordinator.transport().prepare(&self.config) {
            self.fail_start();
            return Err(err.into());
        }

        let bound = match self.bind().await {
            Ok(socket) => socket.local_addr().map(|addr| (socket, addr)),
            Err(err) => Err(err),
        };
        let (socket, local_addr) = match bound {
            Ok(bound) => bound,
            Err(err) => {
                self.fail_start();
                return Err(ListenerError::Bind(err));
            }
        };
        let socket = Arc::new(socket);

        {
            let mut state = lock(&self.state);
            if *state != AcceptorState::Starting {
                // stop() won the race; the socket is dropped here.
                return Err(ListenerError::InvalidState(*state));
            }
            *state = AcceptorState::Listening;
            *lock(&self.socket) = Some(Arc::clone(&socket));
            *lock(&self.local_addr) = Some(local_addr);
        }

        tracing::info!(
            address = %local_addr,
            secure = self.coordinator.transport().is_secure(),
            max_connections = self.connection_limit.max_connections(),
            "Listener started"
        );

        self.post_accept(socket);
        Ok(local_addr)
    }

    /// Stop accepting and tear down every in-flight session.
    ///
    /// Idempotent. The outstanding accept is aborted without being re-posted;
    /// each live session has its timer canceled and is closed. Sessions that
    /// had not settled yet are marked [`HandshakeOutcome::Aborted`] and are
    /// not reported.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state == AcceptorState::Stopped {
                return;
            }
            *state = AcceptorState::Stopped;
        }

        self.shutdown.trigger();
        self.connection_limit.close();
        lock(&self.socket).take();

        let mut closed = 0usize;
        for entry in self.sessions.iter() {
            if let Some(session) = entry.value().upgrade() {
                session.cancel_timer();
                session.resolve(HandshakeOutcome::Aborted);
                session.close();
                closed += 1;
            }
        }
        self.sessions.clear();

        tracing::info!(closed_sessions = closed, "Listener stopped");
    }

    fn transition(&self, from: AcceptorState, to: AcceptorState) -> Result<(), ListenerError> {
        let mut state = lock(&self.state);
        if *state != from {
            return Err(ListenerError::InvalidState(*state));
        }
        *state = to;
        Ok(())
    }

    fn fail_start(&self) {
        let mut state = lock(&self.state);
        if *state == AcceptorState::Starting {
            *state = AcceptorState::Idle;
        }
    }

    async fn bind(&self) -> io::Result<TcpListener> {
        let host = if self.config.address.is_empty() {
            "0.0.0.0"
        } else {
            self.config.address.as_str()
        };
        let addr = tokio::net::lookup_host((host, self.config.port))
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no address found for {host}"),
                )
            })?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(self.config.reuse_address)?;
        socket.bind(addr)?;
        socket.listen(self.config.backlog)
    }

    /// Post one accept operation.
    ///
    /// Subscribes to shutdown before checking for it, so a concurrent
    /// `stop()` either prevents the post or aborts the posted accept.
    fn post_accept(self: &Arc<Self>, socket: Arc<TcpListener>) {
        let mut shutdown = self.shutdown.subscribe();
        if self.shutdown.is_triggered() {
            return;
        }
        let accept_seq = self.stats.record_accept_posted();
        let listener = Arc::downgrade(self);
        let transport = Arc::clone(self.coordinator.transport());
        let connection_limit = self.connection_limit.clone();

        tokio::spawn(async move {
            let accepted = tokio::select! {
                accepted = async {
                    let permit = connection_limit.acquire().await?;
                    let result = transport.accept_one(&socket).await;
                    Some((permit, result))
                } => accepted,
                _ = shutdown.recv() => None,
            };

            let Some((permit, result)) = accepted else {
                tracing::trace!(accept_seq, "Accept aborted");
                return;
            };
            let Some(listener) = listener.upgrade() else {
                tracing::trace!(accept_seq, "Listener dropped, accept discarded");
                return;
            };

            // Re-arm before anything else happens to this result.
            listener.post_accept(socket);

            match result {
                Ok((stream, peer_addr)) => {
                    let session = listener.on_accepted(&stream, peer_addr, accept_seq, permit);
                    let coordinator = Arc::clone(&listener.coordinator);
                    let sessions = Arc::clone(&listener.sessions);
                    drop(listener);

                    let id = session.id();
                    coordinator.drive(session, stream).await;
                    sessions.remove(&id);
                }
                Err(err) => {
                    drop(permit);
                    listener.stats.record_accept_error();
                    tracing::warn!(accept_seq, error = %err, "Accept failed");
                    listener
                        .coordinator
                        .report(None, &ConnectionError::Accept(err));
                }
            }
        });
    }

    /// Register a freshly accepted socket and build its session.
    fn on_accepted(
        &self,
        stream: &TcpStream,
        peer_addr: SocketAddr,
        accept_seq: u64,
        permit: ConnectionPermit,
    ) -> Arc<Session> {
        self.stats.record_accepted();

        // Latency only; failure is harmless.
        if let Err(err) = stream.set_nodelay(true) {
            tracing::trace!(peer_addr = %peer_addr, error = %err, "Failed to set TCP_NODELAY");
        }

        let session = Arc::new(Session::new(
            peer_addr,
            stream.local_addr().ok(),
            accept_seq,
            self.tracker.track(),
            permit,
        ));
        let id = session.id();

        tracing::debug!(
            connection_id = %id,
            peer_addr = %peer_addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        self.sessions.insert(id, Arc::downgrade(&session));
        if self.shutdown.is_triggered() {
            // stop() may have swept the registry before this insert.
            session.resolve(HandshakeOutcome::Aborted);
            session.close();
        }
        session
    }
}

impl<T: Transport> Drop for Listener<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Transport> std::fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("active_sessions", &self.active_sessions())
            .finish_non_exhaustive()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
