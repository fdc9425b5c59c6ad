//! HTTP-side collaborators of the listener.
//!
//! # Data Flow
//! ```text
//! net::handshake (secure channel established)
//!     → pipeline.rs RequestPipeline::read_request_and_content (hand-off)
//!
//! net::listener / net::handshake (accept, handshake or timeout failure)
//!     → pipeline.rs ErrorSink::on_error
//! ```

pub mod pipeline;

pub use pipeline::{ErrorSink, LogErrorSink, RequestPipeline};
