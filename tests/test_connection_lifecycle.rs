//! 送信からレスポンス完了までの接続判断のテスト
//!
//! 送信、パース、keep-alive 判定、タイムアウトの各部品を組み合わせ、
//! I/O 層が行う判断を Sans I/O のまま再現する。

use std::time::{Duration, Instant};

use shiguredo_http11_transport::{
    BodyShape, Error, Event, NextAction, ReadState, RequestDescriptor, ResponseContext,
    ResponseParser, TimeoutAction, TimeoutConfig, TimeoutContext, TimeoutPhase,
    TimeoutSupervisor, TransmitOptions, Transmission, WriteState, classify, next_action,
};

struct Socket {
    write: WriteState,
    read: ReadState,
    parser: ResponseParser,
    options: TransmitOptions,
    config: TimeoutConfig,
}

impl Socket {
    fn new() -> Self {
        Self {
            write: WriteState::new(),
            read: ReadState::new(),
            parser: ResponseParser::new(),
            options: TransmitOptions::default(),
            config: TimeoutConfig::default(),
        }
    }

    fn send(&mut self, desc: &RequestDescriptor) -> Vec<u8> {
        let mut tx = Transmission::prepare(
            desc,
            &classify(&BodyShape::Empty),
            &mut self.write,
            &self.options,
        )
        .unwrap();
        let mut out = Vec::new();
        tx.write_empty(&mut out);
        tx.complete(&mut self.write);
        self.parser
            .expect(ResponseContext::new(&desc.method).upgrade(desc.upgrade.is_some()));
        out
    }

    fn receive(&mut self, data: &[u8]) -> Vec<NextAction> {
        let mut actions = Vec::new();
        for event in self.parser.feed(data).unwrap() {
            match event {
                Event::HeadersComplete(hc) => {
                    self.read
                        .on_headers(&hc, self.options.pipelining, &self.config)
                }
                Event::MessageComplete(mc) => actions.push(next_action(
                    &mc,
                    &self.write,
                    &self.read,
                    self.parser.in_flight(),
                )),
                _ => {}
            }
        }
        actions
    }
}

/// Connection ヘッダーのない HTTP/1.1 レスポンスは keep-alive
#[test]
fn http11_default_keep_alive() {
    let mut socket = Socket::new();
    let wire = socket.send(&RequestDescriptor::new("GET", "/").host("example.com"));
    assert!(wire.windows(24).any(|w| w == b"connection: keep-alive\r\n"));

    let actions = socket.receive(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");
    assert_eq!(actions, vec![NextAction::Advance]);
    assert_eq!(socket.read.idle_timeout(), Some(Duration::from_secs(4)));
}

/// `connection: close` は完了後に接続を閉じる
#[test]
fn connection_close_tears_down() {
    let mut socket = Socket::new();
    socket.send(&RequestDescriptor::new("GET", "/"));
    let actions =
        socket.receive(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 2\r\n\r\nok");
    assert_eq!(actions, vec![NextAction::Close]);
    assert!(socket.read.is_reset());
}

/// HTTP/1.0 は明示的な keep-alive がなければ閉じる
#[test]
fn http10_closes_by_default() {
    let mut socket = Socket::new();
    socket.send(&RequestDescriptor::new("GET", "/"));
    let actions = socket.receive(b"HTTP/1.0 200 OK\r\nContent-Length: 0\r\n\r\n");
    assert_eq!(actions, vec![NextAction::Close]);

    let mut socket = Socket::new();
    socket.send(&RequestDescriptor::new("GET", "/"));
    let actions = socket
        .receive(b"HTTP/1.0 200 OK\r\nConnection: keep-alive\r\nContent-Length: 0\r\n\r\n");
    assert_eq!(actions, vec![NextAction::Advance]);
}

/// HEAD は送信側で接続を閉じる印が付く
#[test]
fn head_request_resets_socket() {
    let mut socket = Socket::new();
    let wire = socket.send(&RequestDescriptor::new("HEAD", "/"));
    assert!(wire.windows(19).any(|w| w == b"connection: close\r\n"));
    let actions = socket.receive(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\n");
    assert_eq!(actions, vec![NextAction::Close]);
}

/// 短い keep-alive ヒントでは接続を再利用しない
#[test]
fn short_keep_alive_hint() {
    let mut socket = Socket::new();
    socket.send(&RequestDescriptor::new("GET", "/"));
    let actions =
        socket.receive(b"HTTP/1.1 200 OK\r\nKeep-Alive: timeout=1\r\nContent-Length: 0\r\n\r\n");
    assert_eq!(actions, vec![NextAction::Close]);

    let mut socket = Socket::new();
    socket.send(&RequestDescriptor::new("GET", "/"));
    let actions =
        socket.receive(b"HTTP/1.1 200 OK\r\nKeep-Alive: timeout=30\r\nContent-Length: 0\r\n\r\n");
    assert_eq!(actions, vec![NextAction::Advance]);
    assert_eq!(socket.read.idle_timeout(), Some(Duration::from_secs(28)));
}

/// ボディが止まった場合は BodyTimeout が 1 回だけで HeadersTimeout は出ない
#[test]
fn stalled_body_times_out_once() {
    let start = Instant::now();
    let mut socket = Socket::new();
    let mut supervisor = TimeoutSupervisor::new(TimeoutConfig {
        headers_timeout: Duration::from_secs(10),
        body_timeout: Duration::from_secs(5),
        ..Default::default()
    });

    socket.send(&RequestDescriptor::new("GET", "/"));
    supervisor.arm_headers(start);

    let t1 = start + Duration::from_secs(1);
    for event in socket
        .parser
        .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
        .unwrap()
    {
        if let Event::HeadersComplete(_) = event {
            supervisor.arm_body(t1);
        }
    }
    assert_eq!(supervisor.phase(), Some(TimeoutPhase::Body));

    let ctx = TimeoutContext {
        running: socket.parser.in_flight(),
        ..Default::default()
    };
    let mut fired = Vec::new();
    for secs in 2..30 {
        if let Some(action) = supervisor.fire(start + Duration::from_secs(secs), ctx) {
            fired.push(action);
        }
    }
    assert_eq!(fired, vec![TimeoutAction::Fail(Error::BodyTimeout)]);
}

/// 101 でのアップグレード後、ヘッダー終端以降のバイトはそのまま渡される
#[test]
fn upgrade_handoff() {
    let mut socket = Socket::new();
    let wire = socket.send(&RequestDescriptor::new("GET", "/ws").upgrade("websocket"));
    assert!(wire.starts_with(b"GET /ws HTTP/1.1\r\nconnection: upgrade\r\nupgrade: websocket\r\n"));

    let events = socket
        .parser
        .feed(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n\x00\x01\x02")
        .unwrap();
    assert!(matches!(
        events.last(),
        Some(Event::Upgrade { remaining, .. }) if remaining == &[0, 1, 2]
    ));
}
