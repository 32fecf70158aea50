//! Error types shared by every layer of the engine.
//!
//! Errors fall into the categories reported by [`Error::category`]. Only
//! [`Category::Accept`] is ever escalated to the embedding application as a
//! terminal condition; everything else is local to one session.

use std::io;

use crate::http::parser::ParseError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("malformed request: {0:?}")]
    Parse(ParseError),

    #[error("header exceeds limit of {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("body exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: u64 },

    #[error("invalid range")]
    InvalidRange,

    #[error("transfer aborted by chunk observer")]
    Aborted,

    #[error("TLS received on insecure server")]
    TlsOnInsecureServer,

    #[error("TLS handshake failed: {0}")]
    Handshake(io::Error),

    #[error("session closed")]
    SessionClosed,

    #[error("continuation abandoned before resolution")]
    Abandoned,

    #[error("request body was already read")]
    BodyAlreadyRead,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("could not bind listener: {0}")]
    Bind(io::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Socket or TLS failure. The session closes without a response.
    Transport,
    /// Malformed request; answered with a 4xx.
    Protocol,
    /// A configured limit was exceeded; answered like a protocol error.
    Resource,
    /// A route handler failed; answered with a 500.
    Application,
    /// The listener could not be set up or stopped accepting.
    Accept,
}

impl Error {
    pub fn category(&self) -> Category {
        match self {
            Error::Io(_)
            | Error::Timeout
            | Error::TlsOnInsecureServer
            | Error::Handshake(_)
            | Error::SessionClosed
            | Error::Abandoned
            | Error::Aborted
            | Error::WebSocket(_) => Category::Transport,
            Error::Parse(_) | Error::InvalidRange => Category::Protocol,
            Error::HeaderTooLarge { .. } | Error::BodyTooLarge { .. } => Category::Resource,
            Error::Handler(_) | Error::BodyAlreadyRead => Category::Application,
            Error::Bind(_) => Category::Accept,
        }
    }

    /// True for errors that end a session because the peer went away
    /// rather than because something went wrong.
    pub fn is_benign_disconnect(&self) -> bool {
        match self {
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::HeaderTooLarge { limit } => Error::HeaderTooLarge { limit },
            other => Error::Parse(other),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}
