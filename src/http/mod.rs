//! HTTP/1.1 protocol pieces.
//!
//! Nothing in here touches a socket. The session module drives I/O and calls
//! into these submodules to parse and produce bytes.
//!
//! - **`parser`**: request head parsing with a size limit
//! - **`request`**: request representation and header helpers
//! - **`response`**: response representation with builder pattern
//! - **`writer`**: response head serialization
//! - **`chunked`**: chunked transfer coding, both directions
//! - **`body`**: pull-based response body sources
//! - **`ranges`**: `Range` header parsing and validation
//! - **`multipart`**: single range and `multipart/byteranges` bodies
//! - **`cors`**: `Access-Control-*` header generation
//! - **`standard`**: canned responses for engine generated statuses
//! - **`mime`**: MIME type detection based on file extensions
//!
//! # Request lifecycle
//!
//! ```text
//!        ┌──────────────────┐
//!        │  AwaitingHeader  │ ← parse head only, bounded by header limit
//!        └──────┬───────────┘
//!               │ head parsed
//!               ▼
//!        ┌──────────────────┐
//!        │    Dispatched    │ ← route lookup, handler runs
//!        └──────┬───────────┘
//!               │ handler reads body / sends response
//!               ▼
//!        ┌──────────────────┐
//!        │    Responded     │
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → AwaitingHeader (same connection)
//!               ├─ Upgrade → WebSocket owns the stream
//!               └─ Close → Closed
//! ```

pub mod body;
pub mod chunked;
pub mod cors;
pub mod mime;
pub mod multipart;
pub mod parser;
pub mod ranges;
pub mod request;
pub mod response;
pub mod standard;
pub mod writer;
