//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! ListenerConfig (built in code or deserialized by the embedding app)
//!     → validation.rs (semantic checks)
//!     → net::tls (PEM files named by TlsConfig are loaded once)
//!     → Listener (immutable, shared via Arc)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the listener is created
//! - All fields have defaults to allow minimal configs
//! - Any configuration error is fatal at startup

pub mod error;
pub mod schema;
pub mod validation;

pub use error::ConfigError;
pub use schema::{ListenerConfig, TimeoutConfig, TlsConfig};
pub use validation::{validate_config, ValidationError};
