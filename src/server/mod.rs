//! Listening socket, protocol detection, and the [`Server`] facade.

pub mod listener;
pub mod sniffer;

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::ToSocketAddrs;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::http::standard::{StandardResponseProvider, StandardTextResponseProvider};
use crate::routing::{Route, Router};
use crate::session::SessionId;

use listener::LoopExit;

pub type ErrorHook = Arc<dyn Fn(&Error, &'static str) + Send + Sync>;
pub type AcceptAbortHook = Arc<dyn Fn(&io::Error) + Send + Sync>;

pub const DEFAULT_HEADER_LIMIT: usize = 8 * 1024;
pub const DEFAULT_BODY_LIMIT: u64 = 1024 * 1024;
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ServerOptions {
    /// Enables TLS. Plaintext clients are still accepted and detected.
    pub tls: Option<TlsAcceptor>,
    pub header_limit: usize,
    /// Default limit of body reads; a read builder can override it.
    pub body_limit: u64,
    /// Default per-chunk timeout of reads, sends and the header read.
    pub session_timeout: Duration,
    /// How long a new connection may stay silent before it is dropped.
    pub sniff_timeout: Duration,
    /// Session level faults, with a short description of what was going on.
    pub on_error: ErrorHook,
    /// The accept loop gave up. The server has to be restarted.
    pub on_accept_abort: AcceptAbortHook,
    pub standard_responses: Arc<dyn StandardResponseProvider>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            tls: None,
            header_limit: DEFAULT_HEADER_LIMIT,
            body_limit: DEFAULT_BODY_LIMIT,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
            sniff_timeout: DEFAULT_SNIFF_TIMEOUT,
            on_error: Arc::new(|err, context| warn!(error = %err, context, "Session error")),
            on_accept_abort: Arc::new(|err| error!(error = %err, "Accept loop aborted")),
            standard_responses: Arc::new(StandardTextResponseProvider),
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("tls", &self.tls.is_some())
            .field("header_limit", &self.header_limit)
            .field("body_limit", &self.body_limit)
            .field("session_timeout", &self.session_timeout)
            .field("sniff_timeout", &self.sniff_timeout)
            .finish_non_exhaustive()
    }
}

impl ServerOptions {
    pub fn from_config(cfg: &ServerConfig) -> Self {
        Self {
            header_limit: cfg.header_limit,
            body_limit: cfg.body_limit,
            session_timeout: Duration::from_secs(cfg.session_timeout_secs),
            sniff_timeout: Duration::from_secs(cfg.sniff_timeout_secs),
            ..Self::default()
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&Error, &'static str) + Send + Sync + 'static) -> Self {
        self.on_error = Arc::new(hook);
        self
    }

    pub fn on_accept_abort(mut self, hook: impl Fn(&io::Error) + Send + Sync + 'static) -> Self {
        self.on_accept_abort = Arc::new(hook);
        self
    }

    pub fn standard_responses(mut self, provider: impl StandardResponseProvider + 'static) -> Self {
        self.standard_responses = Arc::new(provider);
        self
    }
}

/// State every session of one server shares.
pub(crate) struct Shared {
    pub(crate) router: Router,
    pub(crate) options: ServerOptions,
    next_session: AtomicU64,
}

impl Shared {
    pub(crate) fn next_session_id(&self) -> SessionId {
        SessionId(self.next_session.fetch_add(1, Ordering::Relaxed))
    }
}

struct Running {
    stop: watch::Sender<bool>,
    local_addr: SocketAddr,
    task: Option<JoinHandle<LoopExit>>,
}

pub struct Server {
    shared: Arc<Shared>,
    running: std::sync::Mutex<Option<Running>>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                router: Router::new(),
                options,
                next_session: AtomicU64::new(1),
            }),
            running: std::sync::Mutex::new(None),
        }
    }

    pub fn add_routes(&self, routes: impl IntoIterator<Item = Route>) {
        self.shared.router.add_routes(routes);
    }

    pub fn router(&self) -> &Router {
        &self.shared.router
    }

    pub fn options(&self) -> &ServerOptions {
        &self.shared.options
    }

    /// Binds `addr` and starts accepting in the background. Returns the
    /// bound address, which differs from `addr` when port 0 was asked for.
    pub async fn start(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        let addr = tokio::net::lookup_host(addr)
            .await
            .map_err(Error::Bind)?
            .next()
            .ok_or_else(|| Error::Bind(io::Error::new(io::ErrorKind::InvalidInput, "no address to bind")))?;
        let listener = listener::bind(addr)?;
        let local_addr = listener.local_addr().map_err(Error::Bind)?;

        let (stop, stop_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let on_abort = Arc::clone(&self.shared.options.on_accept_abort);
        let task = tokio::spawn(async move {
            listener::accept_loop(
                listener,
                stop_rx,
                move |(socket, peer)| {
                    tracing::debug!(%peer, "Accepted connection");
                    tokio::spawn(sniffer::handle_connection(Arc::clone(&shared), socket, peer));
                },
                move |err| on_abort(&err),
            )
            .await
        });

        let previous = self.lock_running().replace(Running {
            stop,
            local_addr,
            task: Some(task),
        });
        if let Some(previous) = previous {
            let _ = previous.stop.send(true);
        }
        Ok(local_addr)
    }

    /// Stops accepting. Sessions already running finish on their own.
    pub fn stop(&self) {
        if let Some(running) = self.lock_running().take() {
            info!(addr = %running.local_addr, "Stopping server");
            let _ = running.stop.send(true);
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_running().as_ref().map(|r| r.local_addr)
    }

    /// Waits for the accept loop to end, by [`stop`](Self::stop) or abort.
    pub async fn wait(&self) -> Option<LoopExit> {
        let task = self.lock_running().as_mut().and_then(|r| r.task.take());
        match task {
            Some(task) => task.await.ok(),
            None => None,
        }
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}
