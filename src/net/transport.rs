//! Transport capabilities shared by the plain and TLS listeners.
//!
//! The accept loop and handshake coordinator are written once against
//! [`Transport`]; the concrete transport is chosen when the listener is
//! constructed.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;

use crate::config::{ConfigError, ListenerConfig};
use crate::net::tls::TlsContext;

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Stream handed to the request pipeline.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// One-time hook run by `start()` before the first accept is posted.
    fn prepare(&self, _config: &ListenerConfig) -> Result<(), ConfigError> {
        Ok(())
    }

    /// Accept one raw connection.
    async fn accept_one(&self, listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
        listener.accept().await
    }

    /// Turn an accepted socket into the pipeline stream, performing the
    /// handshake if this transport has one.
    async fn establish_secure_channel_if_needed(&self, stream: TcpStream)
        -> io::Result<Self::Stream>;

    /// Read application bytes. `Ok(0)` means the peer is done sending.
    async fn read_into(&self, stream: &mut Self::Stream, buf: &mut [u8]) -> io::Result<usize>;

    fn is_secure(&self) -> bool;
}

/// Plain TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTransport;

#[async_trait]
impl Transport for PlainTransport {
    type Stream = TcpStream;

    async fn establish_secure_channel_if_needed(&self, stream: TcpStream) -> io::Result<TcpStream> {
        Ok(stream)
    }

    async fn read_into(&self, stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
        stream.read(buf).await
    }

    fn is_secure(&self) -> bool {
        false
    }
}

/// TLS over TCP.
#[derive(Debug)]
pub struct TlsTransport {
    context: TlsContext,
}

impl TlsTransport {
    pub fn new(context: TlsContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &TlsContext {
        &self.context
    }
}

#[async_trait]
impl Transport for TlsTransport {
    type Stream = TlsStream<TcpStream>;

    fn prepare(&self, config: &ListenerConfig) -> Result<(), ConfigError> {
        self.context.start(&config.address, config.port);
        Ok(())
    }

    async fn establish_secure_channel_if_needed(
        &self,
        stream: TcpStream,
    ) -> io::Result<TlsStream<TcpStream>> {
        let acceptor = self.context.acceptor().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotConnected, "TLS context has not been started")
        })?;
        acceptor.accept(stream).await
    }

    async fn read_into(
        &self,
        stream: &mut TlsStream<TcpStream>,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        match stream.read(buf).await {
            // Peers that hang up without close_notify are treated as done.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(0),
            result => result,
        }
    }

    fn is_secure(&self) -> bool {
        true
    }
}
