use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

/// The transport under a session: a plain TCP socket or a TLS stream over
/// one. Every I/O call site goes through this one type.
#[derive(Debug)]
pub enum SessionStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

macro_rules! with_stream {
    ($self:expr, $s:ident => $body:expr) => {
        match $self.get_mut() {
            SessionStream::Plain($s) => {
                let $s = Pin::new($s);
                $body
            }
            SessionStream::Tls($s) => {
                let $s = Pin::new(&mut **$s);
                $body
            }
        }
    };
}

impl SessionStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, SessionStream::Tls(_))
    }

    pub fn tcp(&self) -> &TcpStream {
        match self {
            SessionStream::Plain(s) => s,
            SessionStream::Tls(s) => s.get_ref().0,
        }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().peer_addr()
    }
}

impl AsyncRead for SessionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        with_stream!(self, s => s.poll_read(cx, buf))
    }
}

impl AsyncWrite for SessionStream {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        with_stream!(self, s => s.poll_write(cx, buf))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_stream!(self, s => s.poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_stream!(self, s => s.poll_shutdown(cx))
    }
}
