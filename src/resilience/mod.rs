//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection:
//!     → timeouts.rs (deadline armed before the handshake starts)
//!     → handshake completes first: deadline canceled
//!     → deadline fires first: session marked timed out and closed
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every handshake has a deadline unless
//!   explicitly configured to zero
//! - Timeout errors are distinct from other errors
//! - No retries: retry policy belongs to the client side of the connection

pub mod timeouts;

pub use timeouts::{TimeoutTimer, TimerState};
