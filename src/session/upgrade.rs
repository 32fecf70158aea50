use tokio::io::AsyncWriteExt;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::debug;

use crate::continuation::Continuation;
use crate::error::{Error, Result};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::serialize_head;
use crate::session::{Deadline, Phase, Session, SessionStream};

/// Outcome of [`Session::upgrade_websocket`].
pub enum Upgrade {
    /// The session no longer owns the stream.
    Upgraded(WebSocketStream<SessionStream>),
    /// The request did not ask for a WebSocket; the session is untouched.
    NotUpgraded,
}

impl Session {
    /// Answers a WebSocket upgrade request with `101 Switching Protocols`
    /// and hands the stream over. Bytes the client already sent after the
    /// request head are passed on to the WebSocket.
    pub fn upgrade_websocket(&self, request: &Request) -> Continuation<Upgrade> {
        let Some(key) = request
            .header("Sec-WebSocket-Key")
            .filter(|_| request.is_websocket_upgrade())
        else {
            return Continuation::resolved(Upgrade::NotUpgraded);
        };
        let accept = derive_accept_key(key.trim().as_bytes());
        let session = self.clone();
        Continuation::new(async move { session.hand_off(accept).await })
    }

    async fn hand_off(&self, accept: String) -> Result<Upgrade> {
        let response = Response::builder(StatusCode::SwitchingProtocols)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Accept", accept)
            .build();

        let read_side = self.0.reader.lock().await.take();
        let write_half = self.0.writer.lock().await.take();
        let (Some(read_side), Some(mut write_half)) = (read_side, write_half) else {
            self.set_phase(Phase::Closed);
            return Err(Error::SessionClosed);
        };

        let deadline = Deadline::Rolling(self.0.shared.options.session_timeout);
        let written = deadline
            .run(async {
                write_half.write_all(&serialize_head(&response)).await?;
                write_half.flush().await
            })
            .await;
        if let Err(e) = written {
            self.set_phase(Phase::Closed);
            return Err(e);
        }

        let stream = read_side.half.unsplit(write_half);
        self.set_phase(Phase::Upgraded);
        debug!(session = %self.id(), "WebSocket upgrade accepted");

        let ws = WebSocketStream::from_partially_read(stream, read_side.buf.to_vec(), Role::Server, None).await;
        Ok(Upgrade::Upgraded(ws))
    }
}
