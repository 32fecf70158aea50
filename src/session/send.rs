use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::continuation::Continuation;
use crate::error::{Error, Result};
use crate::http::body::BodySource;
use crate::http::chunked::{LAST_CHUNK, encode_chunk};
use crate::http::request::Method;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::serialize_head;
use crate::session::{ChunkObserver, Deadline, Phase, Session, TransferTimeout, observe};

const WRITE_CHUNK: usize = 16 * 1024;

/// Writes a response. Nothing happens until [`commit`](Self::commit).
#[must_use = "a send does nothing until committed"]
pub struct SendBuilder {
    session: Session,
    response: Response,
    body: Option<Box<dyn BodySource>>,
    timeout: TransferTimeout,
    on_chunk: Option<ChunkObserver>,
}

/// How a response goes out on the wire.
struct Framing {
    omit_body: bool,
    keep_alive: bool,
    interim: bool,
}

impl Session {
    pub fn send(&self, response: Response) -> SendBuilder {
        SendBuilder {
            session: self.clone(),
            response,
            body: None,
            timeout: self.default_timeout(),
            on_chunk: None,
        }
    }

    /// Interim `100 Continue`, telling the client to go ahead with the body.
    pub fn send_continue(&self) -> Continuation<()> {
        self.send(Response::empty(StatusCode::Continue)).commit().then(|_| ())
    }

    /// `417 Expectation Failed`; the connection closes afterwards since the
    /// announced body is never read.
    pub fn reject_expectation(&self) -> Continuation<bool> {
        let mut response = self.standard_response(StatusCode::ExpectationFailed, None);
        response.set_header("Connection", "close");
        self.send(response).commit()
    }

    /// Completes the headers of a final response for the current exchange.
    fn frame(&self, response: &mut Response, source: Option<&dyn BodySource>) -> Framing {
        if response.status.is_informational() {
            return Framing {
                omit_body: true,
                keep_alive: true,
                interim: true,
            };
        }

        let exchange = self.exchange();
        if let (Some(cors), Some(request)) = (&exchange.options.cors, &exchange.request) {
            cors.apply(request, response);
        }

        let is_head = exchange.request.as_ref().is_some_and(|r| r.method == Method::HEAD);
        let keep_alive = exchange.keep_alive && !exchange.body_pending && !response.wants_close();

        if response.status.forbids_body() {
            response.remove_header("Content-Length");
            response.remove_header("Transfer-Encoding");
        } else {
            match source.map(|s| s.size()) {
                Some(Some(size)) => {
                    response.remove_header("Transfer-Encoding");
                    response.set_header("Content-Length", size.to_string());
                }
                Some(None) => {
                    response.remove_header("Content-Length");
                    response.set_header("Transfer-Encoding", "chunked");
                }
                None => {
                    if response.header("Content-Length").is_none() {
                        response.set_header("Content-Length", response.body.len().to_string());
                    }
                }
            }
        }

        if !keep_alive {
            response.set_header("Connection", "close");
        } else if exchange
            .request
            .as_ref()
            .is_some_and(|r| r.version.eq_ignore_ascii_case("HTTP/1.0"))
        {
            response.set_header("Connection", "keep-alive");
        }

        Framing {
            omit_body: is_head || response.status.forbids_body(),
            keep_alive,
            interim: false,
        }
    }

    async fn write_response(
        &self,
        mut response: Response,
        mut source: Option<Box<dyn BodySource>>,
        deadline: Deadline,
        observer: &mut Option<ChunkObserver>,
    ) -> Result<bool> {
        let framing = self.frame(&mut response, source.as_deref());

        let mut guard = self.0.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::SessionClosed)?;

        self.io(deadline, writer.write_all(&serialize_head(&response))).await?;

        if !framing.omit_body {
            match source.as_mut() {
                None => {
                    if !response.body.is_empty() {
                        observe(observer, &response.body)?;
                        self.io(deadline, writer.write_all(&response.body)).await?;
                    }
                }
                Some(source) => {
                    let chunked = source.size().is_none();
                    let mut buf = vec![0u8; WRITE_CHUNK];
                    loop {
                        let n = source.pull(&mut buf)?;
                        if n == 0 {
                            break;
                        }
                        observe(observer, &buf[..n])?;
                        if chunked {
                            self.io(deadline, writer.write_all(&encode_chunk(&buf[..n]))).await?;
                        } else {
                            self.io(deadline, writer.write_all(&buf[..n])).await?;
                        }
                    }
                    if chunked {
                        self.io(deadline, writer.write_all(LAST_CHUNK)).await?;
                    }
                }
            }
        }
        self.io(deadline, writer.flush()).await?;

        trace!(
            session = %self.id(),
            status = response.status.as_u16(),
            keep_alive = framing.keep_alive,
            "Response sent"
        );

        if framing.interim {
            return Ok(false);
        }
        if !framing.keep_alive {
            let _ = writer.shutdown().await;
            guard.take();
        }
        drop(guard);
        self.set_phase(Phase::Responded {
            keep_alive: framing.keep_alive,
        });
        Ok(!framing.keep_alive)
    }
}

impl SendBuilder {
    /// Streams the body from `source` instead of the response's in-memory
    /// body. Sources of unknown size go out chunked.
    pub fn body_source(mut self, source: impl BodySource + 'static) -> Self {
        self.body = Some(Box::new(source));
        self
    }

    /// Allows each chunk up to `timeout` to drain.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TransferTimeout::PerChunk(timeout);
        self
    }

    /// Allows the whole response up to `timeout` to drain.
    pub fn fixed_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TransferTimeout::Whole(timeout);
        self
    }

    /// Called with every body chunk before it is written; returning `false`
    /// aborts.
    pub fn on_chunk(mut self, f: impl FnMut(&[u8]) -> bool + Send + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    /// Starts the send. Resolves with `true` if the connection was closed
    /// after this response.
    pub fn commit(self) -> Continuation<bool> {
        let SendBuilder {
            session,
            response,
            body,
            timeout,
            mut on_chunk,
        } = self;
        Continuation::new(async move {
            let deadline = timeout.start();
            let res = session.write_response(response, body, deadline, &mut on_chunk).await;
            if let Err(e) = &res {
                tracing::debug!(session = %session.id(), error = %e, "Send failed");
                session.shutdown().await;
            }
            res
        })
    }
}
