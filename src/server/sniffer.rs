use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::trace;

use crate::error::Error;
use crate::server::Shared;
use crate::session::{Session, SessionStream};

/// TLS record type of a handshake message.
const TLS_HANDSHAKE: u8 = 0x16;
/// Major version byte of every TLS record version (SSL 3.0 through TLS 1.3).
const TLS_MAJOR: u8 = 0x03;

/// Classifies the first bytes of a connection. `None` if there are none.
pub fn is_tls_client_hello(peeked: &[u8]) -> Option<bool> {
    match peeked {
        [] => None,
        [first] => Some(*first == TLS_HANDSHAKE),
        [first, second, ..] => Some(*first == TLS_HANDSHAKE && *second == TLS_MAJOR),
    }
}

/// Peeks at a fresh connection, sets up TLS if the client speaks it, and
/// runs the session. Idle or empty connections are dropped silently.
pub(crate) async fn handle_connection(shared: Arc<Shared>, socket: TcpStream, peer: SocketAddr) {
    let timeout = shared.options.sniff_timeout;
    let mut peeked = [0u8; 2];

    let tls = match tokio::time::timeout(timeout, socket.peek(&mut peeked)).await {
        Ok(Ok(n)) => match is_tls_client_hello(&peeked[..n]) {
            Some(tls) => tls,
            None => {
                trace!(%peer, "Connection closed before first byte");
                return;
            }
        },
        Ok(Err(e)) => {
            trace!(%peer, error = %e, "Peek failed");
            return;
        }
        Err(_) => {
            trace!(%peer, "No data before sniff timeout");
            return;
        }
    };

    let stream = if !tls {
        SessionStream::Plain(socket)
    } else {
        let Some(acceptor) = shared.options.tls.clone() else {
            (shared.options.on_error)(&Error::TlsOnInsecureServer, "sniffing");
            return;
        };
        match tokio::time::timeout(shared.options.session_timeout, acceptor.accept(socket)).await {
            Ok(Ok(tls)) => SessionStream::Tls(Box::new(tls)),
            Ok(Err(e)) => {
                (shared.options.on_error)(&Error::Handshake(e), "TLS handshake");
                return;
            }
            Err(_) => {
                (shared.options.on_error)(&Error::Timeout, "TLS handshake");
                return;
            }
        }
    };

    Session::new(stream, shared).run().await;
}
