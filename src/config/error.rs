//! Startup-fatal configuration errors.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::validation::ValidationError;

/// A configuration problem. Always fatal: the listener must not accept.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("TLS transport requires certificate configuration")]
    MissingTls,

    #[error("failed to read certificate chain {path:?}: {source}")]
    Certificate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    EmptyCertificateChain(PathBuf),

    #[error("failed to read private key {path:?}: {source}")]
    PrivateKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no private key found in {0:?}")]
    MissingPrivateKey(PathBuf),

    #[error("failed to read trust store {path:?}: {source}")]
    TrustStore {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid trust anchor in {path:?}: {source}")]
    TrustAnchor {
        path: PathBuf,
        #[source]
        source: rustls::Error,
    },

    #[error("failed to build client certificate verifier: {0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),

    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<Vec<ValidationError>> for ConfigError {
    fn from(errors: Vec<ValidationError>) -> Self {
        ConfigError::Validation(errors)
    }
}
