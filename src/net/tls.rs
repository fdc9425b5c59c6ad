//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Load the certificate chain, private key and optional trust store (PEM)
//! - Require client certificates when a trust store is supplied
//! - Derive and install the session-cache identifier once, at start
//! - Hand out the shared, read-only acceptor to every handshake

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ServerSessionMemoryCache, StoresServerSessions, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig};
use tokio_rustls::TlsAcceptor;

use crate::config::{ConfigError, TlsConfig};

/// Longest session-cache identifier the TLS layer accepts.
pub const MAX_SESSION_ID_CONTEXT_LEN: usize = 32;

/// Entries kept by the namespaced session cache.
const SESSION_CACHE_SIZE: usize = 256;

/// Peer certificate policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Clients are not asked for a certificate.
    None,
    /// Clients must present a certificate that chains to the trust store.
    /// The handshake fails when none is presented; resumed sessions are not
    /// verified again.
    RequirePeerCertificate,
}

/// Identifier that disambiguates one listener's TLS session cache entries.
///
/// Built as `"<port>:"` followed by the bind address reversed, then cut to
/// [`MAX_SESSION_ID_CONTEXT_LEN`] bytes. Reversing keeps the most distinctive
/// tail of a long host name inside the retained prefix. Two listeners can
/// still collide after truncation; the scheme is kept for compatibility, not
/// as a uniqueness guarantee.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionIdContext(Vec<u8>);

impl SessionIdContext {
    pub fn derive(address: &str, port: u16) -> Self {
        let mut context = format!("{port}:");
        context.extend(address.chars().rev());

        let mut bytes = context.into_bytes();
        bytes.truncate(MAX_SESSION_ID_CONTEXT_LEN);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Server session store whose keys are namespaced by a [`SessionIdContext`].
///
/// Sessions stored under one context are invisible to lookups made under
/// another, which is what confines resumption to the listener that verified
/// the client.
#[derive(Debug)]
pub struct ContextualSessionStore {
    context: SessionIdContext,
    inner: Arc<dyn StoresServerSessions>,
}

impl ContextualSessionStore {
    pub fn new(context: SessionIdContext, inner: Arc<dyn StoresServerSessions>) -> Self {
        Self { context, inner }
    }

    fn namespaced(&self, key: &[u8]) -> Vec<u8> {
        let context = self.context.as_bytes();
        let mut namespaced = Vec::with_capacity(1 + context.len() + key.len());
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart.
        namespaced.push(context.len() as u8);
        namespaced.extend_from_slice(context);
        namespaced.extend_from_slice(key);
        namespaced
    }
}

impl StoresServerSessions for ContextualSessionStore {
    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> bool {
        self.inner.put(self.namespaced(&key), value)
    }

    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.get(&self.namespaced(key))
    }

    fn take(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.inner.take(&self.namespaced(key))
    }

    fn can_cache(&self) -> bool {
        self.inner.can_cache()
    }
}

/// Certificate material and TLS policy for one listener.
///
/// Mutable only through [`TlsContext::start`], which runs once before the
/// first accept; afterwards every handshake shares the same acceptor without
/// locking.
pub struct TlsContext {
    server_config: ServerConfig,
    verify_mode: VerifyMode,
    session_id_context: OnceLock<SessionIdContext>,
    acceptor: OnceLock<TlsAcceptor>,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("verify_mode", &self.verify_mode)
            .field("session_id_context", &self.session_id_context.get())
            .field("started", &self.acceptor.get().is_some())
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Load PEM material. Any failure is a fatal [`ConfigError`].
    pub fn from_pem_files(
        cert_path: &Path,
        key_path: &Path,
        verify_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let certs = load_certificates(cert_path)?;
        let key = load_private_key(key_path)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;

        let (builder, verify_mode) = match verify_path {
            Some(path) => {
                let roots = load_trust_store(path)?;
                let verifier =
                    WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
                        .build()?;
                (
                    builder.with_client_cert_verifier(verifier),
                    VerifyMode::RequirePeerCertificate,
                )
            }
            None => (builder.with_no_client_auth(), VerifyMode::None),
        };

        let server_config = builder.with_single_cert(certs, key)?;

        tracing::debug!(
            cert_path = %cert_path.display(),
            verify_mode = ?verify_mode,
            "TLS context loaded"
        );

        Ok(Self {
            server_config,
            verify_mode,
            session_id_context: OnceLock::new(),
            acceptor: OnceLock::new(),
        })
    }

    /// Load the material named by a [`TlsConfig`].
    pub fn from_config(config: &TlsConfig) -> Result<Self, ConfigError> {
        Self::from_pem_files(
            &config.cert_path,
            &config.key_path,
            config.verify_path.as_deref(),
        )
    }

    pub fn verify_mode(&self) -> VerifyMode {
        self.verify_mode
    }

    /// Whether [`TlsContext::start`] will install a session-cache identifier.
    pub fn requires_session_id_context(&self) -> bool {
        self.verify_mode == VerifyMode::RequirePeerCertificate
    }

    /// The installed identifier, if any.
    pub fn session_id_context(&self) -> Option<&SessionIdContext> {
        self.session_id_context.get()
    }

    /// Finalise the context for the given bind address.
    ///
    /// Installs the session-cache identifier when peer verification is on.
    /// Only the first call has any effect; later calls return the acceptor
    /// built by the first.
    pub fn start(&self, address: &str, port: u16) -> &TlsAcceptor {
        self.acceptor.get_or_init(|| {
            let mut config = self.server_config.clone();

            if self.requires_session_id_context() {
                let context = self
                    .session_id_context
                    .get_or_init(|| SessionIdContext::derive(address, port));
                config.session_storage = Arc::new(ContextualSessionStore::new(
                    context.clone(),
                    ServerSessionMemoryCache::new(SESSION_CACHE_SIZE),
                ));
                tracing::debug!(
                    session_id_context = %String::from_utf8_lossy(context.as_bytes()),
                    "Session cache identifier installed"
                );
            }

            TlsAcceptor::from(Arc::new(config))
        })
    }

    /// The acceptor, once [`TlsContext::start`] has run.
    pub fn acceptor(&self) -> Option<&TlsAcceptor> {
        self.acceptor.get()
    }
}

fn open(path: &Path) -> std::io::Result<BufReader<File>> {
    File::open(path).map(BufReader::new)
}

/// Read every certificate from a PEM file.
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certificate_error = |source| ConfigError::Certificate {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = open(path).map_err(certificate_error)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(certificate_error)?;

    if certs.is_empty() {
        return Err(ConfigError::EmptyCertificateChain(path.to_path_buf()));
    }
    Ok(certs)
}

/// Read the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let key_error = |source| ConfigError::PrivateKey {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = open(path).map_err(key_error)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(key_error)?
        .ok_or_else(|| ConfigError::MissingPrivateKey(path.to_path_buf()))
}

/// Read trust anchors from a PEM file.
pub fn load_trust_store(path: &Path) -> Result<RootCertStore, ConfigError> {
    let trust_error = |source| ConfigError::TrustStore {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = open(path).map_err(trust_error)?;
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(trust_error)?;
        roots.add(cert).map_err(|source| ConfigError::TrustAnchor {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn identifier_is_port_then_reversed_address() {
        let context = SessionIdContext::derive("127.0.0.1", 8443);
        assert_eq!(context.as_bytes(), b"8443:1.0.0.721");
    }

    #[test]
    fn identifier_truncates_to_platform_maximum() {
        let address = "very-long-host-name.eu-west-1.compute.internal";
        let context = SessionIdContext::derive(address, 443);

        assert_eq!(context.len(), MAX_SESSION_ID_CONTEXT_LEN);
        assert!(context.as_bytes().starts_with(b"443:lanretni.etupmoc"));
    }

    #[test]
    fn identifier_never_exceeds_maximum() {
        for len in 0..80 {
            let address = "a".repeat(len);
            for port in [0, 443, 65535] {
                let context = SessionIdContext::derive(&address, port);
                assert!(context.len() <= MAX_SESSION_ID_CONTEXT_LEN);
            }
        }
    }

    #[test]
    fn empty_address_keeps_port_prefix() {
        assert_eq!(SessionIdContext::derive("", 443).as_bytes(), b"443:");
    }

    #[test]
    fn store_namespaces_keys_by_context() {
        let shared: Arc<dyn StoresServerSessions> = ServerSessionMemoryCache::new(16);
        let a = ContextualSessionStore::new(SessionIdContext::derive("a", 1), Arc::clone(&shared));
        let b = ContextualSessionStore::new(SessionIdContext::derive("b", 1), shared);

        assert!(a.put(b"session".to_vec(), b"state".to_vec()));
        assert_eq!(a.get(b"session"), Some(b"state".to_vec()));
        assert_eq!(b.get(b"session"), None);
        assert_eq!(b.take(b"session"), None);
        assert_eq!(a.take(b"session"), Some(b"state".to_vec()));
        assert_eq!(a.get(b"session"), None);
    }

    #[test]
    fn no_trust_store_leaves_identifier_unset() {
        let context =
            TlsContext::from_pem_files(&fixture("server-chain.pem"), &fixture("server.key"), None)
                .unwrap();
        assert_eq!(context.verify_mode(), VerifyMode::None);
        assert!(context.acceptor().is_none());

        context.start("127.0.0.1", 8443);
        assert!(context.acceptor().is_some());
        assert!(context.session_id_context().is_none());
    }

    #[test]
    fn trust_store_installs_identifier_once() {
        let context = TlsContext::from_pem_files(
            &fixture("server-chain.pem"),
            &fixture("server.key"),
            Some(&fixture("ca.pem")),
        )
        .unwrap();
        assert_eq!(context.verify_mode(), VerifyMode::RequirePeerCertificate);
        assert!(context.session_id_context().is_none());

        context.start("127.0.0.1", 8443);
        context.start("10.0.0.1", 9000);

        let installed = context.session_id_context().unwrap();
        assert_eq!(installed, &SessionIdContext::derive("127.0.0.1", 8443));
    }

    #[test]
    fn missing_certificate_is_fatal() {
        let err = TlsContext::from_pem_files(
            &fixture("does-not-exist.pem"),
            &fixture("server.key"),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Certificate { .. }));
    }

    #[test]
    fn garbage_certificate_is_fatal() {
        let err =
            TlsContext::from_pem_files(&fixture("garbage.pem"), &fixture("server.key"), None)
                .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCertificateChain(_)));
    }

    #[test]
    fn missing_key_is_fatal() {
        let err =
            TlsContext::from_pem_files(&fixture("server.pem"), &fixture("garbage.pem"), None)
                .unwrap_err();
        assert!(matches!(err, ConfigError::MissingPrivateKey(_)));
    }

    #[test]
    fn empty_trust_store_is_fatal() {
        let err = TlsContext::from_pem_files(
            &fixture("server.pem"),
            &fixture("server.key"),
            Some(&fixture("garbage.pem")),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ClientVerifier(_)));
    }
}
