use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use regex::Regex;

use crate::http::cors::CorsSettings;
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::session::Session;

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Application callback invoked with the session and the parsed request
/// head. The handler owns the exchange: it reads the body if it needs one and
/// sends exactly one final response, possibly from a spawned task.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, session: Session, request: Request) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Session, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn call(&self, session: Session, request: Request) -> HandlerFuture {
        Box::pin(self(session, request))
    }
}

#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    /// Anchored at both ends when compiled, so it must match the whole path.
    Pattern(Regex),
}

impl PathMatcher {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{pattern})$")).map(PathMatcher::Pattern)
    }

    /// Capture groups on a match, group 0 excluded. Groups that did not
    /// participate come back empty.
    pub fn matches(&self, path: &str) -> Option<Vec<String>> {
        match self {
            PathMatcher::Exact(p) => (p == path).then(Vec::new),
            PathMatcher::Pattern(re) => re.captures(path).map(|caps| {
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                    .collect()
            }),
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, PathMatcher::Exact(_))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
    /// Serve this route over plaintext even when the server has TLS.
    pub allow_insecure: bool,
    /// Only WebSocket upgrade requests may reach the handler; others get 426.
    pub expect_upgrade: bool,
    pub cors: Option<CorsSettings>,
}

#[derive(Clone)]
pub struct Route {
    /// `None` matches every method.
    pub verb: Option<Method>,
    pub matcher: PathMatcher,
    pub options: RouteOptions,
    pub handler: Arc<dyn Handler>,
}

impl Route {
    /// A route matching `path` literally.
    pub fn exact<H: Handler>(verb: impl Into<Option<Method>>, path: impl Into<String>, handler: H) -> Self {
        Self {
            verb: verb.into(),
            matcher: PathMatcher::Exact(path.into()),
            options: RouteOptions::default(),
            handler: Arc::new(handler),
        }
    }

    /// A route whose regular expression must match the whole path.
    pub fn pattern<H: Handler>(
        verb: impl Into<Option<Method>>,
        pattern: &str,
        handler: H,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            verb: verb.into(),
            matcher: PathMatcher::pattern(pattern)?,
            options: RouteOptions::default(),
            handler: Arc::new(handler),
        })
    }

    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.options.allow_insecure = allow;
        self
    }

    pub fn expect_upgrade(mut self, expect: bool) -> Self {
        self.options.expect_upgrade = expect;
        self
    }

    pub fn cors(mut self, settings: CorsSettings) -> Self {
        self.options.cors = Some(settings);
        self
    }

    pub fn accepts(&self, verb: &Method) -> bool {
        self.verb.as_ref().is_none_or(|v| v == verb)
    }

    /// The `OPTIONS` route answering CORS preflight requests for this one,
    /// if its settings ask for it.
    pub fn preflight(&self) -> Option<Route> {
        let cors = self.options.cors.as_ref().filter(|c| c.generate_preflight)?;
        if self.verb == Some(Method::OPTIONS) {
            return None;
        }
        Some(Route {
            verb: Some(Method::OPTIONS),
            matcher: self.matcher.clone(),
            options: RouteOptions {
                allow_insecure: self.options.allow_insecure,
                expect_upgrade: false,
                cors: Some(cors.clone()),
            },
            handler: Arc::new(answer_preflight),
        })
    }
}

/// Responds with the CORS headers alone; the session adds them to every
/// final response of a route carrying CORS settings.
async fn answer_preflight(session: Session, _request: Request) -> anyhow::Result<()> {
    session.send(Response::empty(StatusCode::Ok)).commit().await?;
    Ok(())
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("verb", &self.verb)
            .field("matcher", &self.matcher)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
