use std::io;
use std::time::Duration;

use tokio::io::AsyncReadExt;

use crate::continuation::Continuation;
use crate::error::{Error, Result};
use crate::http::chunked::ChunkedDecoder;
use crate::http::request::Request;
use crate::http::response::StatusCode;
use crate::session::{ChunkObserver, Deadline, READ_CHUNK, ReadSide, Session, TransferTimeout, observe};

/// Reads the body of a request. Nothing happens until [`commit`](Self::commit).
#[must_use = "a read does nothing until committed"]
pub struct ReadBuilder {
    session: Session,
    request: Request,
    limit: Option<u64>,
    timeout: TransferTimeout,
    on_chunk: Option<ChunkObserver>,
}

impl Session {
    /// Starts reading the body of `request`, the head this session handed
    /// to the route handler.
    pub fn read(&self, request: Request) -> ReadBuilder {
        ReadBuilder {
            session: self.clone(),
            request,
            limit: Some(self.0.shared.options.body_limit),
            timeout: self.default_timeout(),
            on_chunk: None,
        }
    }

    async fn read_body(
        &self,
        request: &Request,
        limit: Option<u64>,
        deadline: Deadline,
        observer: &mut Option<ChunkObserver>,
    ) -> Result<Vec<u8>> {
        let mut guard = self.0.reader.lock().await;
        let side = guard.as_mut().ok_or(Error::SessionClosed)?;

        if request.is_chunked() {
            return self.read_chunked(side, limit, deadline, observer).await;
        }

        let length = request.content_length().unwrap_or(0);
        if let Some(limit) = limit.filter(|l| length > *l) {
            return Err(Error::BodyTooLarge { limit });
        }

        let mut body = Vec::with_capacity(length.min(READ_CHUNK as u64 * 8) as usize);
        while (body.len() as u64) < length {
            if side.buf.is_empty() {
                self.fill(side, deadline).await?;
            }
            let want = (length - body.len() as u64).min(side.buf.len() as u64) as usize;
            let chunk = side.buf.split_to(want);
            observe(observer, &chunk)?;
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    async fn read_chunked(
        &self,
        side: &mut ReadSide,
        limit: Option<u64>,
        deadline: Deadline,
        observer: &mut Option<ChunkObserver>,
    ) -> Result<Vec<u8>> {
        let mut decoder = ChunkedDecoder::new();
        let mut body = Vec::new();
        loop {
            let before = body.len();
            let done = decoder.decode(&mut side.buf, &mut body)?;
            if let Some(limit) = limit.filter(|l| body.len() as u64 > *l) {
                return Err(Error::BodyTooLarge { limit });
            }
            if body.len() > before {
                observe(observer, &body[before..])?;
            }
            if done {
                return Ok(body);
            }
            self.fill(side, deadline).await?;
        }
    }

    async fn fill(&self, side: &mut ReadSide, deadline: Deadline) -> Result<()> {
        side.buf.reserve(READ_CHUNK);
        match self.io(deadline, side.half.read_buf(&mut side.buf)).await? {
            0 => Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
            _ => Ok(()),
        }
    }

    /// A failed read leaves the stream mid-body, so the session cannot go
    /// on. Malformed or oversized bodies still get an answer first.
    async fn abandon_read(&self, err: &Error) {
        let status = match err {
            Error::BodyTooLarge { .. } => Some(StatusCode::PayloadTooLarge),
            Error::Parse(_) => Some(StatusCode::BadRequest),
            _ => None,
        };
        self.0.reader.lock().await.take();
        match status {
            Some(status) => {
                self.exchange().keep_alive = false;
                self.respond_standard(status, Some(&err.to_string())).await;
            }
            None => self.shutdown().await,
        }
    }
}

impl ReadBuilder {
    /// Rejects bodies larger than `limit` bytes.
    pub fn body_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn no_body_limit(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Allows each chunk up to `timeout` to arrive.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TransferTimeout::PerChunk(timeout);
        self
    }

    /// Allows the whole body up to `timeout` to arrive.
    pub fn fixed_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TransferTimeout::Whole(timeout);
        self
    }

    /// Called with every chunk as it arrives; returning `false` aborts.
    pub fn on_chunk(mut self, f: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    /// Starts the read. Resolves with the request, body filled in.
    ///
    /// Only the first read of an exchange touches the stream; any later one
    /// rejects with [`Error::BodyAlreadyRead`].
    pub fn commit(self) -> Continuation<Request> {
        let ReadBuilder {
            session,
            mut request,
            limit,
            timeout,
            mut on_chunk,
        } = self;
        {
            let mut exchange = session.exchange();
            if exchange.body_claimed {
                return Continuation::rejected(Error::BodyAlreadyRead);
            }
            exchange.body_claimed = true;
        }
        Continuation::new(async move {
            let deadline = timeout.start();
            match session.read_body(&request, limit, deadline, &mut on_chunk).await {
                Ok(body) => {
                    session.exchange().body_pending = false;
                    request.body = body;
                    Ok(request)
                }
                Err(e) => {
                    tracing::debug!(session = %session.id(), error = %e, "Body read failed");
                    session.abandon_read(&e).await;
                    Err(e)
                }
            }
        })
    }
}
