mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{Client, get, start_server};
use portcullis::http::body::ReaderBody;
use portcullis::{CorsSettings, Error, Method, Request, Response, Route, ServerOptions, Session, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

async fn hello(session: Session, _request: Request) -> anyhow::Result<()> {
    session.send(Response::ok("hello")).commit().await?;
    Ok(())
}

async fn echo(session: Session, request: Request) -> anyhow::Result<()> {
    let request = session.read(request).commit().await?;
    session.send(Response::ok(request.body)).commit().await?;
    Ok(())
}

/// Accepts bodies up to 16 bytes announced with `Expect: 100-continue`.
async fn guarded_upload(session: Session, request: Request) -> anyhow::Result<()> {
    if request.expects_continue() {
        if request.content_length().unwrap_or(0) > 16 {
            session.reject_expectation().await?;
            return Ok(());
        }
        session.send_continue().await?;
    }
    let request = session.read(request).commit().await?;
    session.send(Response::ok(request.body)).commit().await?;
    Ok(())
}

#[tokio::test]
async fn test_unrouted_path_gets_404_with_path() {
    let (_server, addr) = start_server(ServerOptions::default(), vec![]).await;

    let resp = get(addr, "/missing?x=1", &[]).await;
    assert_eq!(resp.status, 404);
    assert!(resp.text().contains("/missing"));
    assert_eq!(resp.header("content-type"), Some("text/plain; charset=utf-8"));
}

#[tokio::test]
async fn test_echoed_path_is_not_served_as_html() {
    let (_server, addr) = start_server(ServerOptions::default(), vec![]).await;

    let resp = get(addr, "/<script>alert(1)</script>", &[]).await;
    assert_eq!(resp.status, 404);
    assert_eq!(resp.header("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(resp.header("x-content-type-options"), Some("nosniff"));
}

#[tokio::test]
async fn test_keep_alive_serves_several_requests() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/hello", hello)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    for _ in 0..3 {
        client.send_raw(b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n").await;
        let resp = client.read_response().await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.text(), "hello");
        assert_eq!(resp.header("connection"), None);
    }
}

#[tokio::test]
async fn test_pipelined_requests_are_answered_in_order() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::POST, "/echo", echo)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(
            b"POST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\nonePOST /echo HTTP/1.1\r\nContent-Length: 3\r\n\r\ntwo",
        )
        .await;
    assert_eq!(client.read_response().await.text(), "one");
    assert_eq!(client.read_response().await.text(), "two");
}

#[tokio::test]
async fn test_connection_close_is_honoured() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/hello", hello)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("connection"), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_http10_closes_by_default() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/hello", hello)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"GET /hello HTTP/1.0\r\n\r\n").await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_upgrade_route_rejects_plain_request() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/ws", hello).expect_upgrade(true)],
    )
    .await;

    let resp = get(addr, "/ws", &[]).await;
    assert_eq!(resp.status, 426);
}

#[tokio::test]
async fn test_expect_continue_accepted() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::POST, "/upload", guarded_upload)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n")
        .await;
    let interim = client.read_response().await;
    assert_eq!(interim.status, 100);
    assert!(interim.body.is_empty());

    client.send_raw(b"hello").await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "hello");
}

#[tokio::test]
async fn test_expect_continue_rejected_closes_connection() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::POST, "/upload", guarded_upload)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\nContent-Length: 1000\r\n\r\n")
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 417);
    assert_eq!(resp.header("connection"), Some("close"));
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_read_timeout_closes_session() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let route = Route::exact(Method::POST, "/slow", move |session: Session, request: Request| {
        let tx = tx.clone();
        async move {
            let res = session
                .read(request)
                .timeout(Duration::from_millis(200))
                .commit()
                .await;
            let _ = tx.send((res.map(|r| r.body), session.is_open()));
            Ok::<_, anyhow::Error>(())
        }
    });
    let (_server, addr) = start_server(ServerOptions::default(), vec![route]).await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /slow HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc")
        .await;

    let (res, open) = rx.recv().await.unwrap();
    assert!(matches!(res, Err(Error::Timeout)));
    assert!(!open);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_fixed_timeout_covers_whole_body() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let route = Route::exact(Method::POST, "/slow", move |session: Session, request: Request| {
        let tx = tx.clone();
        async move {
            let res = session
                .read(request)
                .fixed_timeout(Duration::from_millis(300))
                .commit()
                .await;
            let _ = tx.send(res.is_err());
            Ok::<_, anyhow::Error>(())
        }
    });
    let (_server, addr) = start_server(ServerOptions::default(), vec![route]).await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /slow HTTP/1.1\r\nContent-Length: 4\r\n\r\n")
        .await;
    // Each byte arrives well within a per-chunk timeout, the whole body does not.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = client.stream.write_all(b"x").await;
    }
    assert!(rx.recv().await.unwrap());
}

#[tokio::test]
async fn test_chunked_request_body() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::POST, "/echo", echo)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /echo HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n")
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "hello world");
}

#[tokio::test]
async fn test_body_over_limit_gets_413() {
    let options = ServerOptions {
        body_limit: 4,
        ..ServerOptions::default()
    };
    let (_server, addr) = start_server(options, vec![Route::exact(Method::POST, "/echo", echo)]).await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /echo HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello")
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 413);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_chunk_observer_sees_body_and_can_abort() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let route = Route::exact(Method::POST, "/observe", move |session: Session, request: Request| {
        let tx = tx.clone();
        async move {
            let seen = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&seen);
            let res = session
                .read(request)
                .on_chunk(move |chunk| {
                    counter.fetch_add(chunk.len(), Ordering::SeqCst);
                    false
                })
                .commit()
                .await;
            let _ = tx.send((res.is_err(), seen.load(Ordering::SeqCst)));
            Ok::<_, anyhow::Error>(())
        }
    });
    let (_server, addr) = start_server(ServerOptions::default(), vec![route]).await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /observe HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd")
        .await;
    let (failed, seen) = rx.recv().await.unwrap();
    assert!(failed);
    assert!(seen > 0);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_cors_preflight_skips_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let route = Route::exact(Method::GET, "/data", move |session: Session, _request: Request| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            session.send(Response::ok("data")).commit().await?;
            Ok::<_, anyhow::Error>(())
        }
    })
    .cors(CorsSettings::permissive(Method::GET));
    let (_server, addr) = start_server(ServerOptions::default(), vec![route]).await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(
            b"OPTIONS /data HTTP/1.1\r\nOrigin: bla.com\r\nAccess-Control-Request-Method: GET\r\nAccess-Control-Request-Headers: X-Token\r\n\r\n",
        )
        .await;
    let preflight = client.read_response().await;
    assert_eq!(preflight.status, 200);
    assert_eq!(preflight.header("access-control-allow-origin"), Some("bla.com"));
    assert_eq!(preflight.header("access-control-allow-methods"), Some("GET"));
    assert_eq!(preflight.header("access-control-allow-headers"), Some("X-Token"));
    assert_eq!(preflight.header("access-control-allow-credentials"), Some("true"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    client
        .send_raw(b"GET /data HTTP/1.1\r\nOrigin: bla.com\r\n\r\n")
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.text(), "data");
    assert_eq!(resp.header("access-control-allow-origin"), Some("bla.com"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_verbless_cors_route_still_answers_preflight() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let route = Route::exact(None, "/c", move |session: Session, _request: Request| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            session.send(Response::ok("any")).commit().await?;
            Ok::<_, anyhow::Error>(())
        }
    })
    .cors(CorsSettings::permissive(Method::GET));
    let (_server, addr) = start_server(ServerOptions::default(), vec![route]).await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"OPTIONS /c HTTP/1.1\r\nOrigin: bla.com\r\nAccess-Control-Request-Method: GET\r\n\r\n")
        .await;
    let preflight = client.read_response().await;
    assert_eq!(preflight.status, 200);
    assert_eq!(preflight.header("access-control-allow-origin"), Some("bla.com"));
    assert_eq!(preflight.header("access-control-allow-methods"), Some("GET"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    client.send_raw(b"DELETE /c HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.read_response().await.text(), "any");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_extension_method_is_routed() {
    async fn propfind(session: Session, request: Request) -> anyhow::Result<()> {
        session.send(Response::ok(request.method.to_string())).commit().await?;
        Ok(())
    }
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::Other("PROPFIND".into()), "/dav", propfind)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"PROPFIND /dav HTTP/1.1\r\nDepth: 1\r\n\r\n").await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "PROPFIND");

    // An unrouted extension method is a missing route, not a malformed request.
    client.send_raw(b"MKCOL /dav HTTP/1.1\r\n\r\n").await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 404);

    client.send_raw(b"PROPFIND /dav HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.read_response().await.status, 200);
}

#[tokio::test]
async fn test_second_body_read_is_rejected_without_touching_stream() {
    let route = Route::exact(Method::POST, "/r", |session: Session, request: Request| async move {
        let (first, second) = tokio::join!(
            session.read(request.clone()).commit(),
            session.read(request).commit()
        );
        let (read, rejected) = match (first, second) {
            (Ok(read), other) | (other, Ok(read)) => (read, other),
            (Err(e), _) => return Err(anyhow::Error::from(e)),
        };
        let rejected = matches!(rejected, Err(Error::BodyAlreadyRead));
        let mut body = read.body;
        body.extend_from_slice(format!(" rejected={rejected}").as_bytes());
        session.send(Response::ok(body)).commit().await?;
        Ok::<_, anyhow::Error>(())
    });
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![route, Route::exact(Method::GET, "/hello", hello)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client
        .send_raw(b"POST /r HTTP/1.1\r\nContent-Length: 4\r\n\r\nbodyGET /hello HTTP/1.1\r\n\r\n")
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "body rejected=true");

    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "hello");
}

#[tokio::test]
async fn test_handler_error_becomes_500() {
    async fn failing(_session: Session, _request: Request) -> anyhow::Result<()> {
        anyhow::bail!("database unavailable")
    }
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&errors);
    let options = ServerOptions::default().on_error(move |err, _| {
        if matches!(err, Error::Handler(_)) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });
    let (_server, addr) = start_server(
        options,
        vec![
            Route::exact(Method::GET, "/fail", failing),
            Route::exact(Method::GET, "/hello", hello),
        ],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"GET /fail HTTP/1.1\r\n\r\n").await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 500);
    assert!(resp.text().contains("database unavailable"));

    // The connection survives an application error.
    client.send_raw(b"GET /hello HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.read_response().await.status, 200);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_panic_becomes_500() {
    async fn panicking(_session: Session, _request: Request) -> anyhow::Result<()> {
        panic!("boom")
    }
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/panic", panicking)],
    )
    .await;

    let resp = get(addr, "/panic", &[]).await;
    assert_eq!(resp.status, 500);
    assert!(resp.text().contains("boom"));
}

#[tokio::test]
async fn test_abandoned_request_gets_500() {
    async fn silent(_session: Session, _request: Request) -> anyhow::Result<()> {
        Ok(())
    }
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/silent", silent)],
    )
    .await;

    let resp = get(addr, "/silent", &[]).await;
    assert_eq!(resp.status, 500);
}

#[tokio::test]
async fn test_response_from_spawned_task() {
    async fn deferred(session: Session, _request: Request) -> anyhow::Result<()> {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = session.send(Response::ok("later")).commit().await;
        });
        Ok(())
    }
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/later", deferred)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"GET /later HTTP/1.1\r\n\r\n").await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.text(), "later");
}

#[tokio::test]
async fn test_streaming_body_of_unknown_size_is_chunked() {
    async fn stream(session: Session, _request: Request) -> anyhow::Result<()> {
        let data = vec![b'z'; 40_000];
        session
            .send(Response::empty(StatusCode::Ok))
            .body_source(ReaderBody::until_eof(std::io::Cursor::new(data)))
            .commit()
            .await?;
        Ok(())
    }
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/stream", stream)],
    )
    .await;

    let resp = get(addr, "/stream", &[]).await;
    assert_eq!(resp.header("transfer-encoding"), Some("chunked"));
    assert_eq!(resp.header("content-length"), None);
    assert_eq!(resp.body.len(), 40_000);
    assert!(resp.body.iter().all(|b| *b == b'z'));
}

#[tokio::test]
async fn test_head_request_gets_headers_only() {
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(None, "/hello", hello)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"HEAD /hello HTTP/1.1\r\n\r\n").await;
    let resp = client.read_response_with(true).await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-length"), Some("5"));

    // Nothing but the head was written: the next response parses cleanly.
    client.send_raw(b"GET /hello HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.read_response().await.text(), "hello");
}

#[tokio::test]
async fn test_concurrent_sends_do_not_interleave() {
    async fn twice(session: Session, _request: Request) -> anyhow::Result<()> {
        let a = session.send(Response::ok(vec![b'a'; 100_000])).commit();
        let b = session.send(Response::ok(vec![b'b'; 100_000])).commit();
        let (a, b) = tokio::join!(a, b);
        a?;
        b?;
        Ok(())
    }
    let (_server, addr) = start_server(
        ServerOptions::default(),
        vec![Route::exact(Method::GET, "/twice", twice)],
    )
    .await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"GET /twice HTTP/1.1\r\n\r\n").await;
    for _ in 0..2 {
        let resp = client.read_response().await;
        assert_eq!(resp.body.len(), 100_000);
        let first = resp.body[0];
        assert!(resp.body.iter().all(|b| *b == first));
    }
}

#[tokio::test]
async fn test_oversized_header_gets_431() {
    let options = ServerOptions {
        header_limit: 128,
        ..ServerOptions::default()
    };
    let (_server, addr) = start_server(options, vec![]).await;

    let mut client = Client::connect(addr).await;
    let filler = "a".repeat(512);
    client
        .send_raw(format!("GET / HTTP/1.1\r\nX-Filler: {filler}\r\n\r\n").as_bytes())
        .await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 431);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let (_server, addr) = start_server(ServerOptions::default(), vec![]).await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"BREW /pot HTCPCP/1.0\r\n\r\n").await;
    let resp = client.read_response().await;
    assert_eq!(resp.status, 400);
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_weak_session_does_not_keep_connection_alive() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let route = Route::exact(Method::GET, "/weak", move |session: Session, _request: Request| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(session.downgrade());
            session.send(Response::ok("ok")).commit().await?;
            Ok::<_, anyhow::Error>(())
        }
    });
    let (_server, addr) = start_server(ServerOptions::default(), vec![route]).await;

    let mut client = Client::connect(addr).await;
    client.send_raw(b"GET /weak HTTP/1.1\r\n\r\n").await;
    assert_eq!(client.read_response().await.status, 200);
    let weak = rx.recv().await.unwrap();
    drop(client);

    let mut gone = false;
    for _ in 0..50 {
        if weak.upgrade().is_none() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone);
}
