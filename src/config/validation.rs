//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ListenerConfig → Result<(), Vec<ValidationError>>
//! - Runs before any certificate file is opened

use thiserror::Error;

use crate::config::schema::ListenerConfig;

/// A single semantic problem with a [`ListenerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("max_connections must be greater than zero")]
    ZeroMaxConnections,

    #[error("backlog must be greater than zero")]
    ZeroBacklog,

    #[error("certificate path is empty")]
    EmptyCertificatePath,

    #[error("private key path is empty")]
    EmptyKeyPath,

    #[error("trust store path is empty")]
    EmptyTrustStorePath,
}

/// Check every semantic rule and report all violations.
pub fn validate_config(config: &ListenerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.max_connections == 0 {
        errors.push(ValidationError::ZeroMaxConnections);
    }
    if config.backlog == 0 {
        errors.push(ValidationError::ZeroBacklog);
    }

    if let Some(tls) = &config.tls {
        if tls.cert_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyCertificatePath);
        }
        if tls.key_path.as_os_str().is_empty() {
            errors.push(ValidationError::EmptyKeyPath);
        }
        if matches!(&tls.verify_path, Some(path) if path.as_os_str().is_empty()) {
            errors.push(ValidationError::EmptyTrustStorePath);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
