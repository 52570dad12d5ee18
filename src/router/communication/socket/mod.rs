//! TCP transport, built on the tokio runtime this crate commits to.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;

pub struct Listener {
    inner: TcpListener,
}

/// A raw (pre-TLS) socket. Exists only transiently, between `accept` and
/// the TLS handshake performed by the caller.
pub struct Socket {
    inner: TcpStream,
}

pub async fn bind(addr: SocketAddr) -> io::Result<Listener> {
    let inner = TcpListener::bind(addr).await?;
    Ok(Listener { inner })
}

impl Listener {
    pub async fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let (inner, peer_addr) = self.inner.accept().await?;
        Ok((Socket { inner }, peer_addr))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl AsyncRead for Socket {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for Socket {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// The per-connection transport after the TLS handshake completes: a
/// server-side TLS stream over a plain TCP socket. No client certificate
/// is requested; the peer's identity is established above this layer,
/// not by the TLS handshake itself.
pub type SecureSocket = TlsStream<Socket>;
