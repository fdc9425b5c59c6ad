//! Asynchronous HTTPS listener core.
//!
//! Accepts TCP connections, performs the TLS handshake for each under a
//! deadline, and hands secured connections to a [`RequestPipeline`].
//! Failures are delivered to an [`ErrorSink`].
//!
//! ```text
//!   accept ──▶ Session ──▶ handshake ─┬─▶ RequestPipeline::read_request_and_content
//!     ▲          │          (deadline) ├─▶ ErrorSink (handshake failure)
//!     └─ re-arm ─┘                     └─▶ ErrorSink (timeout)
//! ```

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;

pub use config::{ConfigError, ListenerConfig, TlsConfig};
pub use http::{ErrorSink, LogErrorSink, RequestPipeline};
pub use lifecycle::Shutdown;
pub use net::{
    AcceptorState, Connection, ConnectionError, HttpListener, HttpsListener, Listener,
    ListenerError, Request, Session, Transport,
};
