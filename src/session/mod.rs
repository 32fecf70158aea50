//! One accepted connection and its request/response state machine.
//!
//! A [`Session`] is a reference-counted handle. The run loop owns one
//! handle, route handlers receive a clone, and every operation started
//! through a read or send builder holds its own clone until it settles, so
//! an operation outlives whatever local variable started it. Code that must
//! not keep a connection alive holds a [`WeakSession`] instead.
//!
//! ```text
//!   AwaitingHeader ──► Dispatched ──► Responded ──► AwaitingHeader (keep-alive)
//!          │               │              └───────► Closed
//!          └─► Closed      └─► Upgraded (WebSocket owns the stream)
//! ```
//!
//! The stream is split into a read half and a write half, each behind its
//! own lock, so at most one read and one write are in flight at any time.

mod file;
mod read;
mod send;
pub mod stream;
mod upgrade;

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify, watch};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::continuation::Continuation;
use crate::error::{Category, Error, Result};
use crate::http::parser::{ParseError, parse_request_head};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::routing::RouteOptions;
use crate::server::Shared;

pub use read::ReadBuilder;
pub use send::SendBuilder;
pub use stream::SessionStream;
pub use upgrade::Upgrade;

const READ_CHUNK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingHeader,
    Dispatched,
    Responded { keep_alive: bool },
    Upgraded,
    Closed,
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Phase::Upgraded | Phase::Closed)
    }
}

/// How long a transfer may stall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferTimeout {
    /// Restarted for every chunk.
    PerChunk(Duration),
    /// One deadline for the whole transfer.
    Whole(Duration),
}

impl TransferTimeout {
    fn start(self) -> Deadline {
        match self {
            TransferTimeout::PerChunk(d) => Deadline::Rolling(d),
            TransferTimeout::Whole(d) => Deadline::Fixed(Instant::now() + d),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Deadline {
    Rolling(Duration),
    Fixed(Instant),
}

impl Deadline {
    async fn run<T>(self, fut: impl Future<Output = io::Result<T>>) -> Result<T> {
        let res = match self {
            Deadline::Rolling(d) => tokio::time::timeout(d, fut).await?,
            Deadline::Fixed(at) => tokio::time::timeout_at(at, fut).await?,
        };
        Ok(res?)
    }
}

/// Per-chunk callback of a read or send; returning `false` aborts the
/// transfer and closes the session.
pub type ChunkObserver = Box<dyn FnMut(&[u8]) -> bool + Send>;

fn observe(observer: &mut Option<ChunkObserver>, chunk: &[u8]) -> Result<()> {
    match observer {
        Some(f) => {
            if f(chunk) {
                Ok(())
            } else {
                Err(Error::Aborted)
            }
        }
        None => Ok(()),
    }
}

struct ReadSide {
    half: ReadHalf<SessionStream>,
    buf: BytesMut,
}

/// What the current request needs remembered until its final response.
#[derive(Default)]
struct Exchange {
    request: Option<Request>,
    options: RouteOptions,
    keep_alive: bool,
    body_pending: bool,
    /// Set by the first body read; the body can only be read once.
    body_claimed: bool,
}

struct Inner {
    id: SessionId,
    peer: Option<SocketAddr>,
    secure: bool,
    shared: Arc<Shared>,
    reader: Mutex<Option<ReadSide>>,
    writer: Mutex<Option<WriteHalf<SessionStream>>>,
    exchange: std::sync::Mutex<Exchange>,
    phase: watch::Sender<Phase>,
    released: Notify,
}

#[derive(Clone)]
pub struct Session(Arc<Inner>);

/// A handle that does not keep the session alive.
#[derive(Clone)]
pub struct WeakSession(Weak<Inner>);

impl WeakSession {
    /// `None` once every strong handle is gone.
    pub fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(Session)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.0.released.notify_one();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.0.id)
            .field("peer", &self.0.peer)
            .field("secure", &self.0.secure)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(stream: SessionStream, shared: Arc<Shared>) -> Self {
        let peer = stream.peer_addr().ok();
        let secure = stream.is_secure();
        let (read_half, write_half) = tokio::io::split(stream);
        let (phase, _) = watch::channel(Phase::AwaitingHeader);
        Session(Arc::new(Inner {
            id: shared.next_session_id(),
            peer,
            secure,
            shared,
            reader: Mutex::new(Some(ReadSide {
                half: read_half,
                buf: BytesMut::with_capacity(READ_CHUNK),
            })),
            writer: Mutex::new(Some(write_half)),
            exchange: std::sync::Mutex::new(Exchange::default()),
            phase,
            released: Notify::new(),
        }))
    }

    pub fn id(&self) -> SessionId {
        self.0.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.0.peer
    }

    pub fn is_secure(&self) -> bool {
        self.0.secure
    }

    pub fn phase(&self) -> Phase {
        *self.0.phase.borrow()
    }

    pub fn is_open(&self) -> bool {
        !self.phase().is_terminal()
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.0))
    }

    /// Closes the connection. Outstanding operations fail with
    /// [`Error::SessionClosed`].
    pub fn close(&self) -> Continuation<()> {
        let session = self.clone();
        Continuation::new(async move {
            session.shutdown().await;
            Ok(())
        })
    }

    /// A response rendered by the configured standard response provider.
    pub fn send_standard_response(&self, status: StatusCode, message: Option<&str>) -> SendBuilder {
        self.send(self.standard_response(status, message))
    }

    /// `403` telling the client to come back over TLS.
    pub fn send_strict_transport_security_response(&self) -> SendBuilder {
        let mut response = self.standard_response(StatusCode::Forbidden, Some("secure connection required"));
        response.set_header("Strict-Transport-Security", "max-age=3600");
        self.send(response)
    }

    fn standard_response(&self, status: StatusCode, message: Option<&str>) -> Response {
        let request = self.exchange().request.clone();
        self.0
            .shared
            .options
            .standard_responses
            .make_standard_response(request.as_ref(), status, message)
    }

    fn exchange(&self) -> MutexGuard<'_, Exchange> {
        self.0.exchange.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, next: Phase) {
        self.0.phase.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn default_timeout(&self) -> TransferTimeout {
        TransferTimeout::PerChunk(self.0.shared.options.session_timeout)
    }

    /// Runs `fut` under `deadline`, giving up early if the session closes.
    async fn io<T>(&self, deadline: Deadline, fut: impl Future<Output = io::Result<T>>) -> Result<T> {
        tokio::select! {
            res = deadline.run(fut) => res,
            _ = self.closed() => Err(Error::SessionClosed),
        }
    }

    async fn closed(&self) {
        let mut rx = self.0.phase.subscribe();
        loop {
            if *rx.borrow_and_update() == Phase::Closed {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    async fn shutdown(&self) {
        self.set_phase(Phase::Closed);
        if let Some(mut writer) = self.0.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        self.0.reader.lock().await.take();
    }

    pub(crate) fn report(&self, err: &Error, context: &'static str) {
        if err.is_benign_disconnect() {
            trace!(session = %self.id(), error = %err, "Peer went away");
            return;
        }
        debug!(session = %self.id(), error = %err, context, "Session error");
        (self.0.shared.options.on_error)(err, context);
    }

    pub(crate) async fn run(self) {
        debug!(session = %self.id(), peer = ?self.0.peer, secure = self.0.secure, "Session started");

        loop {
            *self.exchange() = Exchange::default();
            self.set_phase(Phase::AwaitingHeader);

            let request = match self.read_head().await {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(e) => {
                    self.reject_head(e).await;
                    break;
                }
            };

            self.dispatch(request).await;

            match self.await_response().await {
                Phase::Responded { keep_alive: true } => continue,
                Phase::Upgraded => {
                    debug!(session = %self.id(), "Stream handed off");
                    return;
                }
                _ => break,
            }
        }

        self.shutdown().await;
        debug!(session = %self.id(), "Session closed");
    }

    /// Reads the next request head. `Ok(None)` is a clean end of the
    /// connection: end of stream or an idle timeout between requests.
    async fn read_head(&self) -> Result<Option<Request>> {
        let options = &self.0.shared.options;
        let deadline = Deadline::Rolling(options.session_timeout);
        let mut guard = self.0.reader.lock().await;
        let Some(side) = guard.as_mut() else {
            return Ok(None);
        };

        loop {
            if !side.buf.is_empty() {
                match parse_request_head(&side.buf, options.header_limit) {
                    Ok((request, used)) => {
                        let _ = side.buf.split_to(used);
                        trace!(
                            session = %self.id(),
                            method = %request.method,
                            path = %request.path,
                            "Request head parsed"
                        );
                        return Ok(Some(request));
                    }
                    Err(ParseError::Incomplete) => {}
                    Err(e) => return Err(e.into()),
                }
            }

            let idle = side.buf.is_empty();
            side.buf.reserve(READ_CHUNK);
            match self.io(deadline, side.half.read_buf(&mut side.buf)).await {
                Ok(0) if idle => return Ok(None),
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(_) => {}
                Err(Error::Timeout | Error::SessionClosed) if idle => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    async fn reject_head(&self, err: Error) {
        self.report(&err, "reading request head");
        let status = match (&err, err.category()) {
            (Error::HeaderTooLarge { .. }, _) => StatusCode::RequestHeaderFieldsTooLarge,
            (_, Category::Protocol | Category::Resource) => StatusCode::BadRequest,
            _ => return,
        };
        self.respond_standard(status, Some(&err.to_string())).await;
    }

    async fn respond_standard(&self, status: StatusCode, message: Option<&str>) {
        if let Err(e) = self.send_standard_response(status, message).commit().await {
            self.report(&e, "sending standard response");
        }
    }

    async fn dispatch(&self, mut request: Request) {
        {
            let mut exchange = self.exchange();
            exchange.keep_alive = request.keep_alive();
            exchange.body_pending = request.is_chunked() || request.content_length().unwrap_or(0) > 0;
            exchange.request = Some(request.clone());
        }
        self.set_phase(Phase::Dispatched);

        let shared = &self.0.shared;
        let Some(found) = shared.router.find(request.method.clone(), request.path_only()) else {
            debug!(session = %self.id(), method = %request.method, path = %request.path, "No route");
            self.respond_standard(StatusCode::NotFound, Some(request.path_only())).await;
            return;
        };
        let route = found.route;
        self.exchange().options = route.options.clone();

        if shared.options.tls.is_some() && !self.is_secure() && !route.options.allow_insecure {
            if let Err(e) = self.send_strict_transport_security_response().commit().await {
                self.report(&e, "sending HSTS response");
            }
            return;
        }

        if route.options.expect_upgrade && !request.is_websocket_upgrade() {
            self.respond_standard(StatusCode::UpgradeRequired, None).await;
            return;
        }

        request.captures = found.captures;
        let handler = Arc::clone(&route.handler);
        let session = self.clone();
        let outcome = tokio::spawn(async move { handler.call(session, request).await }).await;

        let failure = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => format!("{e:#}"),
            Err(e) if e.is_panic() => panic_message(e.into_panic()),
            Err(e) => e.to_string(),
        };
        let err = Error::Handler(failure.clone());
        warn!(session = %self.id(), error = %err, "Route handler failed");
        self.report(&err, "route handler");

        if self.phase() == Phase::Dispatched {
            self.respond_standard(StatusCode::InternalServerError, Some(&failure)).await;
        }
    }

    /// Waits until the exchange is answered. If every other handle is gone
    /// while nothing was sent, the request was abandoned and gets a 500.
    async fn await_response(&self) -> Phase {
        let mut rx = self.0.phase.subscribe();
        loop {
            let phase = *rx.borrow_and_update();
            if phase != Phase::Dispatched {
                return phase;
            }
            if Arc::strong_count(&self.0) == 1 {
                debug!(session = %self.id(), "Request abandoned without a response");
                self.respond_standard(StatusCode::InternalServerError, Some("no response was sent"))
                    .await;
                if self.phase() == Phase::Dispatched {
                    self.shutdown().await;
                }
                continue;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Phase::Closed;
                    }
                }
                _ = self.0.released.notified() => {}
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
