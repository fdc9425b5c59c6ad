//! Per-connection session state.
//!
//! A [`Session`] is created when an accept succeeds and is shared (`Arc`)
//! between exactly two pending operations: the handshake and its deadline
//! timer. Whichever of them finishes last drops the final reference, which
//! releases the connection slot. The socket itself is owned by the
//! handshake future and closes when that future is dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use tokio::sync::watch;

use crate::net::connection::{ConnectionGuard, ConnectionId};
use crate::net::listener::ConnectionPermit;
use crate::resilience::TimeoutTimer;

/// What is known about the request before any HTTP bytes are read.
#[derive(Debug, Clone)]
pub struct Request {
    connection_id: ConnectionId,
    remote_endpoint: SocketAddr,
    local_endpoint: Option<SocketAddr>,
    accepted_at: Instant,
}

impl Request {
    /// ID of the connection carrying this request.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Peer address of the accepted socket.
    pub fn remote_endpoint(&self) -> SocketAddr {
        self.remote_endpoint
    }

    /// Local address of the accepted socket, if the OS reported one.
    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.local_endpoint
    }

    /// When the accept completed.
    pub fn accepted_at(&self) -> Instant {
        self.accepted_at
    }
}

/// The single outcome acted upon for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Secure channel established; handed to the request pipeline.
    Established,
    /// The handshake failed and was reported.
    Failed,
    /// The deadline fired first and was reported.
    TimedOut,
    /// The listener shut down before any other outcome.
    Aborted,
}

/// State shared by the handshake and timer paths of one connection.
#[derive(Debug)]
pub struct Session {
    request: Request,
    outcome: OnceLock<HandshakeOutcome>,
    timer: OnceLock<TimeoutTimer>,
    timer_canceled: AtomicBool,
    closed: watch::Sender<bool>,
    accept_seq: u64,
    accepts_posted_at_handshake: AtomicU64,
    guard: ConnectionGuard,
    _permit: ConnectionPermit,
}

impl Session {
    pub(crate) fn new(
        remote_endpoint: SocketAddr,
        local_endpoint: Option<SocketAddr>,
        accept_seq: u64,
        guard: ConnectionGuard,
        permit: ConnectionPermit,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            request: Request {
                connection_id: guard.id(),
                remote_endpoint,
                local_endpoint,
                accepted_at: Instant::now(),
            },
            outcome: OnceLock::new(),
            timer: OnceLock::new(),
            timer_canceled: AtomicBool::new(false),
            closed,
            accept_seq,
            accepts_posted_at_handshake: AtomicU64::new(0),
            guard,
            _permit: permit,
        }
    }

    /// Connection ID, shared with the [`Request`].
    pub fn id(&self) -> ConnectionId {
        self.guard.id()
    }

    /// Request metadata handed to the pipeline and the error sink.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Record `outcome` unless another path already did.
    ///
    /// Returns `true` only for the first writer; every later caller must
    /// limit itself to cleanup.
    pub fn resolve(&self, outcome: HandshakeOutcome) -> bool {
        self.outcome.set(outcome).is_ok()
    }

    /// The outcome recorded by [`Session::resolve`], if any yet.
    pub fn outcome(&self) -> Option<HandshakeOutcome> {
        self.outcome.get().copied()
    }

    pub(crate) fn attach_timer(&self, timer: TimeoutTimer) {
        if let Err(timer) = self.timer.set(timer) {
            // A session carries one deadline; a second one is never armed.
            timer.cancel();
        }
    }

    /// Cancel the deadline timer.
    ///
    /// Only the first call reaches the timer, whichever path makes it.
    /// Returns `true` for that call.
    pub fn cancel_timer(&self) -> bool {
        if self.timer_canceled.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(timer) = self.timer.get() {
            timer.cancel();
        }
        true
    }

    /// The deadline timer, unless none was armed.
    pub fn timer(&self) -> Option<&TimeoutTimer> {
        self.timer.get()
    }

    /// Ask whoever owns the socket to close it.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Whether [`Session::close`] has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`Session::close`] has been called.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Sequence number of the accept operation that produced this session.
    pub fn accept_seq(&self) -> u64 {
        self.accept_seq
    }

    /// Accept operations posted by the listener when this session's
    /// handshake began.
    pub fn accepts_posted_at_handshake(&self) -> u64 {
        self.accepts_posted_at_handshake.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_handshake_started(&self, accepts_posted: u64) {
        self.accepts_posted_at_handshake
            .store(accepts_posted, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::connection::ConnectionTracker;
    use crate::net::listener::ConnectionLimit;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    async fn session(tracker: &ConnectionTracker) -> Arc<Session> {
        let limit = ConnectionLimit::new(4);
        let permit = limit.acquire().await.unwrap();
        Arc::new(Session::new(
            "127.0.0.1:40000".parse().unwrap(),
            None,
            1,
            tracker.track(),
            permit,
        ))
    }

    #[tokio::test]
    async fn first_outcome_wins() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker).await;

        assert!(session.resolve(HandshakeOutcome::TimedOut));
        assert!(!session.resolve(HandshakeOutcome::Established));
        assert!(!session.resolve(HandshakeOutcome::Failed));
        assert_eq!(session.outcome(), Some(HandshakeOutcome::TimedOut));
    }

    #[tokio::test(start_paused = true)]
    async fn timer_is_canceled_exactly_once() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker).await;
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        session.attach_timer(TimeoutTimer::arm(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(session.cancel_timer());
        assert!(!session.cancel_timer());
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker).await;
        assert!(!session.is_closed());

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.closed().await })
        };
        session.close();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("close was not observed")
            .unwrap();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn dropping_last_reference_releases_slot() {
        let tracker = ConnectionTracker::new();
        let session = session(&tracker).await;
        let timer_side = Arc::clone(&session);
        assert_eq!(tracker.active_count(), 1);

        drop(session);
        assert_eq!(tracker.active_count(), 1);

        drop(timer_side);
        assert_eq!(tracker.active_count(), 0);
    }
}
