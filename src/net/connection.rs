//! Connection identity, lifetime tracking and the pipeline hand-off object.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Count live sessions so shutdown can wait for them to drain
//! - Bundle a secured stream with its session for the request pipeline

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::net::session::Session;
use crate::net::transport::Transport;
use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw numeric value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts live sessions.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    active: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    /// Create a tracker with no live sessions.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Record a new live session. The returned guard decrements on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.send_modify(|count| *count += 1);
        metrics::record_active_sessions(*self.active.borrow());
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId::new(),
        }
    }

    /// Number of sessions currently alive.
    pub fn active_count(&self) -> u64 {
        *self.active.borrow()
    }

    /// Wait until every tracked session has been released.
    pub async fn wait_idle(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|count| *count == 0).await;
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds one slot in a [`ConnectionTracker`] for a session's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<watch::Sender<u64>>,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// ID of the session holding this slot.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.send_modify(|count| *count = count.saturating_sub(1));
        metrics::record_active_sessions(*self.active.borrow());
        tracing::trace!(connection_id = %self.id, "Session released");
    }
}

/// A connection whose secure channel (if any) is established, handed to the
/// request pipeline.
pub struct Connection<T: Transport> {
    session: Arc<Session>,
    stream: T::Stream,
    transport: Arc<T>,
}

impl<T: Transport> Connection<T> {
    pub(crate) fn new(session: Arc<Session>, stream: T::Stream, transport: Arc<T>) -> Self {
        Self {
            session,
            stream,
            transport,
        }
    }

    /// The session this connection belongs to.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Read application bytes through the transport.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.transport.read_into(&mut self.stream, buf).await
    }

    /// Direct access to the stream, e.g. for writing the response.
    pub fn stream_mut(&mut self) -> &mut T::Stream {
        &mut self.stream
    }
}

impl<T: Transport> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}
