//! Connection を tokio::io::duplex 上で動かすテスト
//!
//! サーバー側はテスト内のタスクがバイト列を直接読み書きする。

use std::time::Duration;

use bytes::Bytes;
use shiguredo_http11_transport::Error as HttpError;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_http11_transport::{
    AbortSignal, Body, Connection, ConnectionOptions, Dispatched, Error, ErrorContext, Flow,
    Phase, RequestDescriptor, ResponseHandler, ResponseHead, ResumeHandle, Warning,
};
use tracing_test::traced_test;

#[derive(Default)]
struct Recorder {
    status: Vec<u16>,
    body: Vec<u8>,
    trailers: Vec<(String, String)>,
    errors: Vec<(Option<HttpError>, ErrorContext)>,
    warnings: Vec<Warning>,
    sent_chunks: usize,
    request_sent: bool,
    completed: bool,
    upgrade: Option<Bytes>,
}

impl ResponseHandler for Recorder {
    fn on_body_sent(&mut self, _chunk: &[u8]) {
        self.sent_chunks += 1;
    }

    fn on_request_sent(&mut self) {
        self.request_sent = true;
    }

    fn on_headers(&mut self, head: &ResponseHead, _resume: &ResumeHandle) -> Flow {
        self.status.push(head.status_code);
        Flow::Continue
    }

    fn on_data(&mut self, chunk: &[u8]) -> Flow {
        self.body.extend_from_slice(chunk);
        Flow::Continue
    }

    fn on_complete(&mut self, trailers: &[(String, String)]) {
        self.trailers = trailers.to_vec();
        self.completed = true;
    }

    fn on_upgrade(&mut self, _head: &ResponseHead, remaining: Bytes) {
        self.upgrade = Some(remaining);
    }

    fn on_warning(&mut self, warning: &Warning) {
        self.warnings.push(warning.clone());
    }

    fn on_error(&mut self, err: &Error, ctx: &ErrorContext) {
        let kind = match err {
            Error::Http(e) => Some(e.clone()),
            _ => None,
        };
        self.errors.push((kind, *ctx));
    }
}

/// `terminator` を受信するまで読む
async fn read_until(server: &mut DuplexStream, terminator: &[u8]) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    while !received.ends_with(terminator) {
        let n = server.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        received.extend_from_slice(&buf[..n]);
    }
    received
}

fn connection(client: DuplexStream) -> Connection<DuplexStream> {
    Connection::new(client, ConnectionOptions::default().default_host("example.com"))
}

#[tokio::test]
async fn keep_alive_connection_is_reused() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    let server_task = tokio::spawn(async move {
        let mut requests = Vec::new();
        for body in ["one", "two"] {
            requests.push(read_until(&mut server, b"\r\n\r\n").await);
            let response = format!("HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\n{}", body);
            server.write_all(response.as_bytes()).await.unwrap();
        }
        requests
    });

    let mut first = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/a"), Body::Empty, &mut first)
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    assert_eq!(first.body, b"one");
    assert!(first.request_sent);
    assert!(!conn.is_closed());

    let mut second = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/b"), Body::Empty, &mut second)
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    assert_eq!(second.body, b"two");
    assert_eq!(conn.request_count(), 2);

    let requests = server_task.await.unwrap();
    assert_eq!(
        requests[0],
        b"GET /a HTTP/1.1\r\nhost: example.com\r\nconnection: keep-alive\r\n\r\n"
    );
    assert!(requests[1].starts_with(b"GET /b HTTP/1.1\r\n"));
}

#[tokio::test]
async fn connection_close_tears_down_socket() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    assert!(conn.is_closed());

    // 閉じた接続には送れない
    let mut next = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut next)
        .await;
    assert_eq!(outcome, Dispatched::Failed);
    assert_eq!(next.errors.len(), 1);
    assert_eq!(next.errors[0].1.phase, Phase::Transmit);
}

#[tokio::test]
async fn chunked_upload_from_channel() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    let server_task = tokio::spawn(async move {
        let request = read_until(&mut server, b"0\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 201 Created\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\n0\r\nX-Checksum: 1\r\n\r\n")
            .await
            .unwrap();
        request
    });

    let (sender, body) = Body::channel(2);
    tokio::spawn(async move {
        for chunk in ["hello", " ", "world"] {
            sender.send(chunk).await.unwrap();
        }
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("POST", "/upload"), body, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    assert_eq!(handler.status, vec![201]);
    assert_eq!(handler.sent_chunks, 3);
    assert_eq!(
        handler.trailers,
        vec![("X-Checksum".to_string(), "1".to_string())]
    );

    let request = server_task.await.unwrap();
    assert!(request.ends_with(
        b"transfer-encoding: chunked\r\n\r\n5\r\nhello\r\n1\r\n \r\n5\r\nworld\r\n0\r\n\r\n"
    ));
}

#[tokio::test(start_paused = true)]
async fn headers_timeout_fails_request() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = Connection::new(
        client,
        ConnectionOptions::default().headers_timeout(Duration::from_secs(10)),
    );

    tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        // 応答しない
        std::future::pending::<()>().await;
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Failed);
    assert_eq!(handler.errors.len(), 1);
    let (kind, ctx) = &handler.errors[0];
    assert_eq!(kind, &Some(HttpError::HeadersTimeout));
    assert_eq!(ctx.phase, Phase::Headers);
    assert!(!ctx.aborted);
    assert!(conn.is_closed());
}

#[tokio::test(start_paused = true)]
async fn stalled_body_times_out_once() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = Connection::new(
        client,
        ConnectionOptions::default()
            .headers_timeout(Duration::from_secs(10))
            .body_timeout(Duration::from_secs(5)),
    );

    tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .await
            .unwrap();
        std::future::pending::<()>().await;
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Failed);
    assert_eq!(handler.body, b"abc");
    let kinds: Vec<_> = handler.errors.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(kinds, vec![Some(HttpError::BodyTimeout)]);
    assert_eq!(handler.errors[0].1.phase, Phase::Body);
}

#[tokio::test(start_paused = true)]
async fn paused_response_does_not_time_out() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = Connection::new(
        client,
        ConnectionOptions::default().body_timeout(Duration::from_secs(5)),
    );

    tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nbody")
            .await
            .unwrap();
        std::future::pending::<()>().await;
    });

    struct Pausing {
        inner: Recorder,
    }

    impl ResponseHandler for Pausing {
        fn on_headers(&mut self, head: &ResponseHead, resume: &ResumeHandle) -> Flow {
            self.inner.status.push(head.status_code);
            let resume = resume.clone();
            tokio::spawn(async move {
                // ボディタイムアウトより長く止める
                tokio::time::sleep(Duration::from_secs(30)).await;
                resume.resume();
            });
            Flow::Pause
        }

        fn on_data(&mut self, chunk: &[u8]) -> Flow {
            self.inner.on_data(chunk)
        }

        fn on_complete(&mut self, trailers: &[(String, String)]) {
            self.inner.on_complete(trailers);
        }

        fn on_error(&mut self, err: &Error, ctx: &ErrorContext) {
            self.inner.on_error(err, ctx);
        }
    }

    let mut handler = Pausing {
        inner: Recorder::default(),
    };
    let started = tokio::time::Instant::now();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(handler.inner.body, b"body");
    assert!(handler.inner.errors.is_empty());
}

#[tokio::test]
async fn external_abort_stops_upload() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        std::future::pending::<()>().await;
    });

    let (sender, body) = Body::channel(1);
    sender.send("partial").await.unwrap();

    let external = AbortSignal::new();
    let trigger = external.clone();
    tokio::spawn(async move {
        tokio::task::yield_now().await;
        trigger.abort(Some("user cancelled"));
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch_with_signal(
            RequestDescriptor::new("PUT", "/"),
            body,
            &mut handler,
            Some(&external),
        )
        .await;
    assert_eq!(outcome, Dispatched::Aborted);
    assert_eq!(handler.errors.len(), 1);
    let (kind, ctx) = &handler.errors[0];
    assert_eq!(
        kind,
        &Some(HttpError::Aborted(Some("user cancelled".to_string())))
    );
    assert!(ctx.aborted);
    assert!(conn.is_closed());
    // ボディのソースは解放され、連動も解除されている
    assert!(sender.is_closed());
    assert_eq!(external.listener_count(), 0);
}

#[tokio::test]
async fn upgrade_hands_over_socket() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    let server_task = tokio::spawn(async move {
        let request = read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\nframe")
            .await
            .unwrap();
        let mut echo = [0u8; 4];
        server.read_exact(&mut echo).await.unwrap();
        (request, echo)
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(
            RequestDescriptor::new("GET", "/ws").upgrade("websocket"),
            Body::Empty,
            &mut handler,
        )
        .await;
    assert_eq!(outcome, Dispatched::Upgraded);
    assert_eq!(handler.upgrade, Some(Bytes::from_static(b"frame")));
    assert!(!handler.completed);

    let mut socket = conn.into_inner().unwrap();
    socket.write_all(b"pong").await.unwrap();

    let (request, echo) = server_task.await.unwrap();
    assert!(request.starts_with(b"GET /ws HTTP/1.1\r\nhost: example.com\r\nconnection: upgrade\r\nupgrade: websocket\r\n"));
    assert_eq!(&echo, b"pong");
}

#[tokio::test(start_paused = true)]
async fn upgrade_with_unfinished_body_fails_after_headers_timeout() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = Connection::new(
        client,
        ConnectionOptions::default()
            .default_host("example.com")
            .headers_timeout(Duration::from_secs(10)),
    );

    tokio::spawn(async move {
        read_until(&mut server, b"1\r\na\r\n").await;
        server
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
            .await
            .unwrap();
        std::future::pending::<()>().await;
    });

    // 送信側は閉じないので本文は終わらない
    let (sender, body) = Body::channel(1);
    sender.send("a").await.unwrap();

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(
            RequestDescriptor::new("POST", "/ws").upgrade("websocket"),
            body,
            &mut handler,
        )
        .await;
    assert_eq!(outcome, Dispatched::Failed);
    assert!(handler.upgrade.is_none());
    assert_eq!(handler.errors.len(), 1);
    let (kind, ctx) = &handler.errors[0];
    assert!(matches!(kind, Some(HttpError::InvalidData(_))));
    assert_eq!(ctx.phase, Phase::Transmit);
    assert!(conn.is_closed());
    assert!(sender.is_closed());
}

#[tokio::test(start_paused = true)]
async fn idle_connection_closes_after_keep_alive_timeout() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 204 No Content\r\nKeep-Alive: timeout=10\r\n\r\n")
            .await
            .unwrap();
        std::future::pending::<()>().await;
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    assert_eq!(conn.idle_timeout(), Some(Duration::from_secs(8)));

    let started = tokio::time::Instant::now();
    conn.wait_idle().await.unwrap();
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(8) && elapsed < Duration::from_secs(9));
    assert!(conn.is_closed());
}

#[tokio::test]
async fn strict_mismatch_keeps_connection_usable() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    let server_task = tokio::spawn(async move {
        let request = read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        request
    });

    let mut rejected = Recorder::default();
    let outcome = conn
        .dispatch(
            RequestDescriptor::new("POST", "/").content_length(10),
            Body::from(vec![0u8; 12]),
            &mut rejected,
        )
        .await;
    assert_eq!(outcome, Dispatched::Failed);
    assert_eq!(
        rejected.errors[0].0,
        Some(HttpError::ContentLengthMismatch {
            declared: 10,
            actual: 12
        })
    );
    assert!(!conn.is_closed());

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/next"), Body::Empty, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    // 拒否したリクエストは 1 バイトも送られていない
    let request = server_task.await.unwrap();
    assert!(request.starts_with(b"GET /next HTTP/1.1\r\n"));
}

#[tokio::test]
#[traced_test]
async fn lenient_mismatch_is_warned() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = Connection::new(
        client,
        ConnectionOptions::default().strict_content_length(false),
    );

    let server_task = tokio::spawn(async move {
        let request = read_until(&mut server, b"xxxxxxxxxxxx").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        request
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(
            RequestDescriptor::new("POST", "/").content_length(10),
            Body::from(vec![b'x'; 12]),
            &mut handler,
        )
        .await;
    assert_eq!(outcome, Dispatched::Completed);
    assert_eq!(
        handler.warnings,
        vec![Warning::ContentLengthMismatch {
            declared: 10,
            actual: 12
        }]
    );
    let request = server_task.await.unwrap();
    assert!(request.windows(20).any(|w| w == b"content-length: 12\r\n"));
    assert!(logs_contain("lenient request body"));
}

#[tokio::test]
async fn premature_close_mid_body() {
    let (client, mut server) = tokio::io::duplex(64 * 1024);
    let mut conn = connection(client);

    tokio::spawn(async move {
        read_until(&mut server, b"\r\n\r\n").await;
        server
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort")
            .await
            .unwrap();
        drop(server);
    });

    let mut handler = Recorder::default();
    let outcome = conn
        .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut handler)
        .await;
    assert_eq!(outcome, Dispatched::Failed);
    assert_eq!(
        handler.errors[0].0,
        Some(HttpError::ResponseContentLengthMismatch {
            expected: 100,
            actual: 5
        })
    );
    assert_eq!(handler.body, b"short");
}
