//! Portcullis - embeddable HTTP/1.1 server engine
//!
//! Accepts TCP connections, detects and terminates TLS, runs a per
//! connection session state machine and dispatches requests to route
//! handlers. Supports keep-alive, chunked bodies, `100-continue`, CORS,
//! byte ranges and handing a connection over to a WebSocket.
//!
//! ```ignore
//! use portcullis::{Method, Response, Route, Server, ServerOptions};
//!
//! let server = Server::new(ServerOptions::default());
//! server.add_routes([Route::exact(Method::GET, "/hello", |session: portcullis::Session, _req| async move {
//!     session.send(Response::ok("hello")).commit().await?;
//!     Ok(())
//! })]);
//! let addr = server.start("127.0.0.1:0").await?;
//! ```

pub mod config;
pub mod continuation;
pub mod error;
pub mod http;
pub mod routing;
pub mod serve;
pub mod server;
pub mod session;
pub mod tls;

pub use continuation::{Continuation, Resolver};
pub use error::{Category, Error, Result};
pub use http::cors::CorsSettings;
pub use http::request::{Method, Request};
pub use http::response::{Response, ResponseBuilder, StatusCode};
pub use routing::{Route, RouteOptions, Router};
pub use server::{Server, ServerOptions};
pub use session::{Session, Upgrade, WeakSession};
