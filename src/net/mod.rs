//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits, re-arm before handling)
//!     → session.rs (per-connection state shared by handshake and timer)
//!     → handshake.rs (transport handshake raced against the deadline)
//!     → transport.rs / tls.rs (plain or TLS secure channel)
//!     → connection.rs (hand off to the request pipeline)
//!
//! Session outcomes (exactly one per accepted socket):
//!     Established → RequestPipeline
//!     Failed      → ErrorSink
//!     TimedOut    → ErrorSink
//!     Aborted     → listener stopped, nothing reported
//! ```
//!
//! # Design Decisions
//! - Exactly one accept is outstanding while listening
//! - TLS context is read-only once the listener has started
//! - Per-connection failures never affect the acceptor or other connections

pub mod connection;
pub mod error;
mod handshake;
pub mod listener;
pub mod session;
pub mod tls;
pub mod transport;

pub use connection::{Connection, ConnectionId};
pub use error::{ConnectionError, ErrorCode, HandshakeFailure};
pub use listener::{AcceptorState, HttpListener, HttpsListener, Listener, ListenerError};
pub use session::{HandshakeOutcome, Request, Session};
pub use tls::{SessionIdContext, TlsContext, VerifyMode, MAX_SESSION_ID_CONTEXT_LEN};
pub use transport::{PlainTransport, TlsTransport, Transport};
