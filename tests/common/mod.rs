//! Shared utilities for listener integration tests.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use https_listener::net::{ConnectionId, ErrorCode};
use https_listener::{Connection, ConnectionError, ErrorSink, Request, RequestPipeline, Transport};

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

/// What a pipeline saw for one handed-off connection.
#[derive(Debug, Clone)]
pub struct Handoff {
    pub connection_id: ConnectionId,
    pub accept_seq: u64,
    pub accepts_posted_at_handshake: u64,
    pub nodelay: bool,
    pub peer_certificates: usize,
    pub payload: Vec<u8>,
}

/// Extracts transport-specific details from the pipeline stream.
pub trait Inspect: Transport {
    fn nodelay(stream: &Self::Stream) -> bool;
    fn peer_certificates(stream: &Self::Stream) -> usize;
}

impl Inspect for https_listener::net::PlainTransport {
    fn nodelay(stream: &TcpStream) -> bool {
        stream.nodelay().unwrap_or(false)
    }

    fn peer_certificates(_stream: &TcpStream) -> usize {
        0
    }
}

impl Inspect for https_listener::net::TlsTransport {
    fn nodelay(stream: &tokio_rustls::server::TlsStream<TcpStream>) -> bool {
        stream.get_ref().0.nodelay().unwrap_or(false)
    }

    fn peer_certificates(stream: &tokio_rustls::server::TlsStream<TcpStream>) -> usize {
        stream
            .get_ref()
            .1
            .peer_certificates()
            .map_or(0, |certs| certs.len())
    }
}

/// Pipeline that reads up to `expect` bytes and reports what it saw.
pub struct RecordingPipeline {
    tx: mpsc::UnboundedSender<Handoff>,
    expect: usize,
}

impl RecordingPipeline {
    pub fn new(expect: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<Handoff>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, expect }), rx)
    }
}

#[async_trait]
impl<T: Inspect> RequestPipeline<T> for RecordingPipeline {
    async fn read_request_and_content(&self, mut connection: Connection<T>) {
        let nodelay = T::nodelay(connection.stream_mut());
        let peer_certificates = T::peer_certificates(connection.stream_mut());

        let mut payload = Vec::new();
        let mut buf = [0u8; 256];
        while payload.len() < self.expect {
            let read = tokio::time::timeout(Duration::from_secs(2), connection.read(&mut buf)).await;
            match read {
                Ok(Ok(n)) if n > 0 => payload.extend_from_slice(&buf[..n]),
                _ => break,
            }
        }

        let session = connection.session();
        let _ = self.tx.send(Handoff {
            connection_id: session.id(),
            accept_seq: session.accept_seq(),
            accepts_posted_at_handshake: session.accepts_posted_at_handshake(),
            nodelay,
            peer_certificates,
            payload,
        });
    }
}

/// One ErrorSink delivery.
#[derive(Debug, Clone)]
pub struct Reported {
    pub connection_id: Option<ConnectionId>,
    pub code: ErrorCode,
    pub message: String,
}

pub fn recording_sink() -> (impl ErrorSink, mpsc::UnboundedReceiver<Reported>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = move |request: Option<&Request>, error: &ConnectionError| {
        let _ = tx.send(Reported {
            connection_id: request.map(Request::connection_id),
            code: error.code(),
            message: error.to_string(),
        });
    };
    (sink, rx)
}

/// rustls client trusting the test CA, optionally presenting the test
/// client certificate.
pub fn tls_connector(with_client_cert: bool) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut io::BufReader::new(
        std::fs::File::open(fixture("ca.pem")).unwrap(),
    )) {
        roots.add(cert.unwrap()).unwrap();
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots);

    let config = if with_client_cert {
        let certs = rustls_pemfile::certs(&mut io::BufReader::new(
            std::fs::File::open(fixture("client.pem")).unwrap(),
        ))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
        let key = rustls_pemfile::private_key(&mut io::BufReader::new(
            std::fs::File::open(fixture("client.key")).unwrap(),
        ))
        .unwrap()
        .unwrap();
        builder.with_client_auth_cert(certs, key).unwrap()
    } else {
        builder.with_no_client_auth()
    };

    TlsConnector::from(Arc::new(config))
}

pub async fn tls_connect(
    addr: SocketAddr,
    connector: &TlsConnector,
) -> io::Result<TlsStream<TcpStream>> {
    let tcp = TcpStream::connect(addr).await?;
    connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until<F: FnMut() -> bool>(mut condition: F, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Receive one item or panic after `limit`.
pub async fn recv_within<V>(rx: &mut mpsc::UnboundedReceiver<V>, limit: Duration) -> V {
    tokio::time::timeout(limit, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}
