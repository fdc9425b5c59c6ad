//! Handshake coordination.
//!
//! Races the transport's handshake against the request-phase deadline and
//! routes exactly one outcome per session:
//!
//! ```text
//! handshake done ─┐
//!                 ├─ cancel timer ─ resolve(Established | Failed) ─ pipeline / ErrorSink
//! session closed ─┘                 (no-op if the timer already resolved)
//!
//! deadline fires ── resolve(TimedOut) ─ ErrorSink ─ close session
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;

use crate::http::{ErrorSink, RequestPipeline};
use crate::net::connection::Connection;
use crate::net::error::ConnectionError;
use crate::net::session::{HandshakeOutcome, Session};
use crate::net::transport::Transport;
use crate::observability::ListenerStats;
use crate::resilience::TimeoutTimer;

pub(crate) struct HandshakeCoordinator<T: Transport> {
    transport: Arc<T>,
    pipeline: Arc<dyn RequestPipeline<T>>,
    error_sink: Arc<dyn ErrorSink>,
    stats: Arc<ListenerStats>,
    timeout: Duration,
}

impl<T: Transport> HandshakeCoordinator<T> {
    pub(crate) fn new(
        transport: Arc<T>,
        pipeline: Arc<dyn RequestPipeline<T>>,
        error_sink: Arc<dyn ErrorSink>,
        stats: Arc<ListenerStats>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            pipeline,
            error_sink,
            stats,
            timeout,
        }
    }

    pub(crate) fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub(crate) fn report(&self, session: Option<&Session>, error: &ConnectionError) {
        self.error_sink
            .on_error(session.map(Session::request), error);
    }

    /// Arm the deadline for `session`. No timer is armed for a zero duration.
    pub(crate) fn schedule_timeout(
        &self,
        session: &Arc<Session>,
        duration: Duration,
    ) -> Option<TimeoutTimer> {
        if duration.is_zero() {
            return None;
        }

        let session = Arc::clone(session);
        let error_sink = Arc::clone(&self.error_sink);
        let stats = Arc::clone(&self.stats);

        Some(TimeoutTimer::arm(duration, move || {
            if session.resolve(HandshakeOutcome::TimedOut) {
                stats.record_timeout();
                tracing::debug!(
                    connection_id = %session.id(),
                    peer_addr = %session.request().remote_endpoint(),
                    timeout = ?duration,
                    "Handshake timed out"
                );
                error_sink.on_error(
                    Some(session.request()),
                    &ConnectionError::TimedOut(duration),
                );
            }
            session.close();
        }))
    }

    /// Run the handshake for one accepted socket and act on its outcome.
    pub(crate) async fn drive(&self, session: Arc<Session>, stream: TcpStream) {
        session.mark_handshake_started(self.stats.accepts_posted());

        if let Some(timer) = self.schedule_timeout(&session, self.timeout) {
            session.attach_timer(timer);
        }

        let result = tokio::select! {
            result = self.transport.establish_secure_channel_if_needed(stream) => Some(result),
            _ = session.closed() => None,
        };

        // Must precede every branch below: a deadline about to fire may not
        // act on a session this path is settling.
        session.cancel_timer();

        let Some(result) = result else {
            // The timer or a shutdown already settled this session; dropping
            // the handshake future closed the socket.
            tracing::trace!(connection_id = %session.id(), "Handshake abandoned");
            return;
        };

        match result {
            Ok(stream) => {
                if !session.resolve(HandshakeOutcome::Established) {
                    return;
                }
                self.stats.record_established();
                tracing::debug!(
                    connection_id = %session.id(),
                    peer_addr = %session.request().remote_endpoint(),
                    secure = self.transport.is_secure(),
                    "Handshake complete"
                );

                let connection = Connection::new(session, stream, Arc::clone(&self.transport));
                self.pipeline.read_request_and_content(connection).await;
            }
            Err(err) => {
                if !session.resolve(HandshakeOutcome::Failed) {
                    return;
                }
                let error = ConnectionError::handshake(err);
                self.stats.record_handshake_failure();
                tracing::debug!(
                    connection_id = %session.id(),
                    peer_addr = %session.request().remote_endpoint(),
                    error = %error,
                    "Handshake failed"
                );
                self.report(Some(&session), &error);
            }
        }
    }
}
