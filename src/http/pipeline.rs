//! Collaborators the listener hands connections and errors to.

use async_trait::async_trait;

use crate::net::connection::Connection;
use crate::net::error::ConnectionError;
use crate::net::session::Request;
use crate::net::transport::Transport;

/// Consumes connections whose secure channel is established.
///
/// Calling [`RequestPipeline::read_request_and_content`] is the hand-off
/// boundary: request parsing, keep-alive and everything after it belong to
/// the implementation.
#[async_trait]
pub trait RequestPipeline<T: Transport>: Send + Sync + 'static {
    async fn read_request_and_content(&self, connection: Connection<T>);
}

/// Receives every per-connection failure.
///
/// `request` is `None` when the failure happened before a session existed
/// (a failed accept).
pub trait ErrorSink: Send + Sync + 'static {
    fn on_error(&self, request: Option<&Request>, error: &ConnectionError);
}

impl<F> ErrorSink for F
where
    F: Fn(Option<&Request>, &ConnectionError) + Send + Sync + 'static,
{
    fn on_error(&self, request: Option<&Request>, error: &ConnectionError) {
        self(request, error)
    }
}

/// Default sink: log and move on.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn on_error(&self, request: Option<&Request>, error: &ConnectionError) {
        match request {
            Some(request) => tracing::warn!(
                connection_id = %request.connection_id(),
                peer_addr = %request.remote_endpoint(),
                error = %error,
                "Connection failed"
            ),
            None => tracing::warn!(error = %error, "Accept failed"),
        }
    }
}
