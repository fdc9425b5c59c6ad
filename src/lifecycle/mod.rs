//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (Listener::start):
//!     Validate config → Install TLS session context → Bind → Post first accept
//!
//! Shutdown (Listener::stop):
//!     Trigger signal → Abort outstanding accept → Cancel session timers → Close sessions
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Ordered shutdown: stop accepting first, then tear down in-flight sessions

pub mod shutdown;

pub use shutdown::Shutdown;
