//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Acceptor / handshake coordinator produce:
//!     → logging.rs (structured log events with connection_id, peer_addr)
//!     → metrics.rs (counters and gauges, plus in-process ListenerStats)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Connection ID flows through every per-connection event
//! - Metrics are cheap (atomic increments); no exporter is installed here

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{ListenerStats, StatsSnapshot};
