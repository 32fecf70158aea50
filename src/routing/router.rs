use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::http::request::Method;
use crate::routing::route::Route;

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub captures: Vec<String>,
}

#[derive(Default)]
struct RouteTable {
    exact: Vec<Arc<Route>>,
    patterns: Vec<Arc<Route>>,
}

/// Route table shared by every session of a server.
///
/// Literal routes are always consulted before pattern routes. Within each
/// collection the first registered route that matches wins. The lock is held
/// only for one insert batch or one scan, never across an await.
#[derive(Default)]
pub struct Router {
    table: RwLock<RouteTable>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a batch of routes, plus the preflight route of every route
    /// whose CORS settings ask for one. A preflight goes in ahead of its
    /// route so a route without a verb cannot shadow it.
    pub fn add_routes(&self, routes: impl IntoIterator<Item = Route>) {
        let mut expanded = Vec::new();
        for route in routes {
            expanded.extend(route.preflight());
            expanded.push(route);
        }

        let mut table = self.table.write().unwrap_or_else(|e| e.into_inner());
        for route in expanded {
            debug!(verb = ?route.verb, matcher = ?route.matcher, "Registering route");
            if route.matcher.is_exact() {
                table.exact.push(Arc::new(route));
            } else {
                table.patterns.push(Arc::new(route));
            }
        }
    }

    pub fn find(&self, verb: Method, path: &str) -> Option<RouteMatch> {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table
            .exact
            .iter()
            .chain(table.patterns.iter())
            .filter(|route| route.accepts(&verb))
            .find_map(|route| {
                route.matcher.matches(path).map(|captures| RouteMatch {
                    route: Arc::clone(route),
                    captures,
                })
            })
    }

    pub fn len(&self) -> usize {
        let table = self.table.read().unwrap_or_else(|e| e.into_inner());
        table.exact.len() + table.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
