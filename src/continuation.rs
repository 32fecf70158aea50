//! Deferred results for asynchronous session operations.
//!
//! Every operation started on a session (`commit()` on a read or send
//! builder, the WebSocket handoff, ...) hands back a [`Continuation`]. It is
//! an ordinary future and can simply be `.await`ed, but it also offers the
//! `then` / `fail` composition style:
//!
//! ```ignore
//! session
//!     .send(Response::ok("hi"))
//!     .commit()
//!     .then(|closed| tracing::debug!(closed, "sent"))
//!     .fail(|e| tracing::warn!(error = %e, "send failed"))
//!     .detach();
//! ```
//!
//! A continuation settles exactly once. [`Resolver::resolve`] and
//! [`Resolver::reject`] consume the resolver, so a second resolution does not
//! compile; a resolver dropped without settling rejects with
//! [`Error::Abandoned`].

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

#[must_use = "a continuation does nothing unless awaited or detached"]
pub struct Continuation<T> {
    inner: BoxFuture<'static, Result<T>>,
    observed: bool,
}

/// The settling half of [`Continuation::pending`].
pub struct Resolver<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T: Send + 'static> Continuation<T> {
    pub fn new<F>(fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            inner: fut.boxed(),
            observed: false,
        }
    }

    pub fn resolved(value: T) -> Self {
        Self::new(async move { Ok(value) })
    }

    pub fn rejected(error: Error) -> Self {
        Self::new(async move { Err(error) })
    }

    /// A continuation settled later through the returned [`Resolver`].
    pub fn pending() -> (Resolver<T>, Self) {
        let (tx, rx) = oneshot::channel();
        let cont = Self::new(async move { rx.await.unwrap_or(Err(Error::Abandoned)) });
        (Resolver { tx }, cont)
    }

    /// Maps the resolved value. Rejections pass through untouched.
    pub fn then<U, F>(self, f: F) -> Continuation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let observed = self.observed;
        Continuation {
            inner: self.inner.map(|res| res.map(f)).boxed(),
            observed,
        }
    }

    /// Chains another asynchronous step that runs once this one resolved.
    pub fn and_then<U, F, Fut>(self, f: F) -> Continuation<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let observed = self.observed;
        let inner = self.inner;
        Continuation {
            inner: async move { f(inner.await?).await }.boxed(),
            observed,
        }
    }

    /// Observes a rejection. The error still propagates to whoever awaits
    /// the returned continuation.
    pub fn fail<F>(self, f: F) -> Continuation<T>
    where
        F: FnOnce(&Error) + Send + 'static,
    {
        let inner = self.inner;
        Continuation {
            inner: async move {
                let res = inner.await;
                if let Err(e) = &res {
                    f(e);
                }
                res
            }
            .boxed(),
            observed: true,
        }
    }

    /// Whether a `fail` handler is attached somewhere in this chain.
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    /// Drives the continuation to completion on the runtime without waiting
    /// for it. Rejections that no `fail` handler saw are logged.
    pub fn detach(self) -> JoinHandle<()> {
        let observed = self.observed;
        let inner = self.inner;
        tokio::spawn(async move {
            if let Err(e) = inner.await {
                if !observed {
                    tracing::debug!(error = %e, "Unobserved continuation rejection");
                }
            }
        })
    }
}

impl<T> Future for Continuation<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl<T> Resolver<T> {
    pub fn resolve(self, value: T) {
        // The receiving side may already be gone; nobody is listening then.
        let _ = self.tx.send(Ok(value));
    }

    pub fn reject(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}
