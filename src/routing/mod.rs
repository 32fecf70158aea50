//! Route registration and lookup.

pub mod route;
pub mod router;

pub use route::{Handler, HandlerFuture, PathMatcher, Route, RouteOptions};
pub use router::{RouteMatch, Router};
