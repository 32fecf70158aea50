use std::future::Future;
use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Failed accepts tolerated in a row; the next one ends the loop.
pub const MAX_CONSECUTIVE_ACCEPT_FAILURES: u32 = 5;

const BACKLOG: u32 = 1024;

/// Source of incoming connections.
pub trait Accept: Send {
    type Conn: Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<Self::Conn>> + Send;
}

impl Accept for TcpListener {
    type Conn = (TcpStream, SocketAddr);

    fn accept(&mut self) -> impl Future<Output = io::Result<Self::Conn>> + Send {
        TcpListener::accept(self)
    }
}

/// Why an accept loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    Aborted,
}

/// Opens a listening socket with address reuse enabled.
pub fn bind(addr: SocketAddr) -> Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(Error::Bind)?;
    socket.set_reuseaddr(true).map_err(Error::Bind)?;
    socket.bind(addr).map_err(Error::Bind)?;
    let listener = socket.listen(BACKLOG).map_err(Error::Bind)?;
    info!(addr = %listener.local_addr().map_err(Error::Bind)?, "Listening");
    Ok(listener)
}

/// Accepts until `stop` turns true or accepting keeps failing.
///
/// A failed accept is retried at once. After
/// [`MAX_CONSECUTIVE_ACCEPT_FAILURES`] failures in a row, the next failure
/// is handed to `on_abort` and the loop ends for good.
pub async fn accept_loop<A, C, F>(
    mut acceptor: A,
    mut stop: watch::Receiver<bool>,
    mut on_conn: C,
    on_abort: F,
) -> LoopExit
where
    A: Accept,
    C: FnMut(A::Conn),
    F: FnOnce(io::Error),
{
    let mut failures = 0u32;
    loop {
        if *stop.borrow_and_update() {
            info!("Listener stopped");
            return LoopExit::Stopped;
        }

        let accepted = tokio::select! {
            res = acceptor.accept() => res,
            changed = stop.changed() => {
                if changed.is_err() {
                    return LoopExit::Stopped;
                }
                continue;
            }
        };

        match accepted {
            Ok(conn) => {
                failures = 0;
                on_conn(conn);
            }
            Err(e) if failures < MAX_CONSECUTIVE_ACCEPT_FAILURES => {
                failures += 1;
                warn!(error = %e, failures, "Accept failed, retrying");
            }
            Err(e) => {
                error!(error = %e, "Accept failed too often, giving up");
                on_abort(e);
                return LoopExit::Aborted;
            }
        }
    }
}
