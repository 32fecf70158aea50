mod common;

use common::{Client, get, start_server};
use futures_util::{SinkExt, StreamExt};
use portcullis::{Method, Request, Response, Route, ServerOptions, Session, Upgrade};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

async fn echo_socket(session: Session, request: Request) -> anyhow::Result<()> {
    match session.upgrade_websocket(&request).await? {
        Upgrade::Upgraded(mut ws) => {
            while let Some(msg) = ws.next().await {
                let msg = msg?;
                if msg.is_close() {
                    break;
                }
                if msg.is_text() || msg.is_binary() {
                    ws.send(msg).await?;
                }
            }
        }
        Upgrade::NotUpgraded => {
            session.send(Response::ok("not upgraded")).commit().await?;
        }
    }
    Ok(())
}

fn routes() -> Vec<Route> {
    vec![
        Route::exact(Method::GET, "/ws", echo_socket).expect_upgrade(true),
        Route::exact(Method::GET, "/maybe", echo_socket),
    ]
}

#[tokio::test]
async fn test_websocket_echo() {
    let (_server, addr) = start_server(ServerOptions::default(), routes()).await;

    let tcp = TcpStream::connect(addr).await.unwrap();
    let (mut ws, response) = tokio_tungstenite::client_async(format!("ws://{addr}/ws"), tcp)
        .await
        .unwrap();
    assert_eq!(response.status(), 101);

    ws.send(Message::Text("hello".into())).await.unwrap();
    assert_eq!(ws.next().await.unwrap().unwrap(), Message::Text("hello".into()));

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    assert_eq!(
        ws.next().await.unwrap().unwrap(),
        Message::Binary(vec![1u8, 2, 3].into())
    );
    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_frame_sent_with_handshake_is_not_lost() {
    let (_server, addr) = start_server(ServerOptions::default(), routes()).await;

    let mut client = Client::connect(addr).await;
    let mut bytes = b"GET /ws HTTP/1.1\r\nHost: localhost\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
Sec-WebSocket-Version: 13\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n"
        .to_vec();
    // Masked text frame "hi" with an all-zero mask.
    bytes.extend_from_slice(&[0x81, 0x82, 0, 0, 0, 0, b'h', b'i']);
    client.send_raw(&bytes).await;

    let resp = client.read_response().await;
    assert_eq!(resp.status, 101);
    assert_eq!(resp.header("sec-websocket-accept"), Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    assert_eq!(client.read_bytes(4).await, vec![0x81, 0x02, b'h', b'i']);
}

#[tokio::test]
async fn test_plain_request_is_not_upgraded() {
    let (_server, addr) = start_server(ServerOptions::default(), routes()).await;

    let resp = get(addr, "/maybe", &[]).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "not upgraded");
}
