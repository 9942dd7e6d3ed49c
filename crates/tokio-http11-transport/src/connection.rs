//! HTTP/1.1 接続
//!
//! 1 つのソケット上でリクエストを 1 つずつ送り、レスポンスをハンドラーに渡す。
//! 送信とレスポンスの受信は同じタスクで並行して進み、書き込み側は送信だけが、
//! 読み取り側は受信だけが変更する。
//!
//! ```ignore
//! use tokio_http11_transport::{Body, Connection, ConnectionOptions, RequestDescriptor};
//!
//! let mut conn = Connection::connect("example.com:80", ConnectionOptions::default()).await?;
//! let outcome = conn
//!     .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut handler)
//!     .await;
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use shiguredo_http11_transport::{
    Event, MessageComplete, NextAction, ParserLimits, Phase, ReadState, RequestDescriptor,
    ResponseContext, ResponseHead, ResponseParser, TimeoutAction, TimeoutConfig, TimeoutContext,
    TimeoutPhase, TimeoutSupervisor, TransmitOptions, WriteState, is_socket_reset, next_action,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::abort::AbortSignal;
use crate::body::Body;
use crate::error::{Error, ErrorContext, Result};
use crate::handler::{Flow, ResponseHandler, ResumeHandle};
use crate::socket::{DEFAULT_HIGH_WATER_MARK, SocketWriter};
use crate::timeout;
use crate::transmit::{SendEvent, TransmitContext, TransmitOutcome, transmit};

/// 読み取りバッファのデフォルトサイズ (16 KiB)
pub const DEFAULT_READ_BUFFER_SIZE: usize = 16 * 1024;

/// 接続の設定
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    parser_limits: ParserLimits,
    transmit: TransmitOptions,
    timeouts: TimeoutConfig,
    write_high_water_mark: usize,
    read_buffer_size: usize,
    default_host: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            parser_limits: ParserLimits::default(),
            transmit: TransmitOptions::default(),
            timeouts: TimeoutConfig::default(),
            write_high_water_mark: DEFAULT_HIGH_WATER_MARK,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            default_host: None,
        }
    }
}

impl ConnectionOptions {
    /// デフォルト設定で作成
    pub fn new() -> Self {
        Self::default()
    }

    /// パーサーの制限を設定
    pub fn parser_limits(mut self, limits: ParserLimits) -> Self {
        self.parser_limits = limits;
        self
    }

    /// 送信オプションを設定
    pub fn transmit_options(mut self, options: TransmitOptions) -> Self {
        self.transmit = options;
        self
    }

    /// タイムアウト設定を置き換える
    pub fn timeouts(mut self, config: TimeoutConfig) -> Self {
        self.timeouts = config;
        self
    }

    /// ヘッダー待ちタイムアウトを設定 (0 で無効)
    pub fn headers_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.headers_timeout = timeout;
        self
    }

    /// ボディ受信タイムアウトを設定 (0 で無効)
    pub fn body_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.body_timeout = timeout;
        self
    }

    /// keep-alive のデフォルトのアイドルタイムアウトを設定
    pub fn keep_alive_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.keep_alive_timeout = timeout;
        self
    }

    /// Content-Length 不一致をエラーにするか
    pub fn strict_content_length(mut self, strict: bool) -> Self {
        self.transmit.strict_content_length = strict;
        self
    }

    /// 書き込みバッファの上限
    pub fn write_high_water_mark(mut self, size: usize) -> Self {
        self.write_high_water_mark = size;
        self
    }

    /// 1 回の読み取りのバッファサイズ
    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// 記述子に Host がない場合に送る Host
    pub fn default_host(mut self, host: &str) -> Self {
        self.default_host = Some(host.to_string());
        self
    }
}

/// [`Connection::dispatch`] の結果
///
/// 失敗の詳細は [`ResponseHandler::on_error`] に渡される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// レスポンスを全て受信した
    Completed,
    /// プロトコルが切り替わった
    Upgraded,
    /// 中断された
    Aborted,
    /// 失敗した
    Failed,
}

/// 1 回のリクエストの進行状況
struct Exchange {
    transmitting: bool,
    headers_received: bool,
    paused: bool,
    resume: ResumeHandle,
}

impl Exchange {
    fn phase(&self) -> Phase {
        if self.headers_received {
            Phase::Body
        } else if self.transmitting {
            Phase::Transmit
        } else {
            Phase::Headers
        }
    }
}

enum Progress {
    Pending,
    Completed(MessageComplete),
    Upgraded(ResponseHead, Vec<u8>),
    Failed(shiguredo_http11_transport::Error),
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<R>,
    buf: &mut BytesMut,
    size: usize,
) -> std::io::Result<usize> {
    let Some(reader) = reader.as_mut() else {
        return Err(std::io::ErrorKind::NotConnected.into());
    };
    buf.reserve(size);
    reader.read_buf(buf).await
}

fn deliver<H: ResponseHandler>(handler: &mut H, event: SendEvent) {
    match event {
        SendEvent::BodySent(chunk) => handler.on_body_sent(&chunk),
        SendEvent::Warning(warning) => handler.on_warning(&warning),
        SendEvent::RequestSent => handler.on_request_sent(),
    }
}

/// HTTP/1.1 接続
pub struct Connection<S> {
    reader: Option<ReadHalf<S>>,
    writer: Option<SocketWriter<WriteHalf<S>>>,
    parser: ResponseParser,
    write_state: WriteState,
    read_state: ReadState,
    supervisor: TimeoutSupervisor,
    options: ConnectionOptions,
    read_buf: BytesMut,
    peer: Option<SocketAddr>,
    closed: bool,
    upgraded: bool,
    eof: bool,
}

impl<S> std::fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("closed", &self.closed)
            .field("upgraded", &self.upgraded)
            .field("requests", &self.write_state.request_count())
            .finish()
    }
}

impl Connection<TcpStream> {
    /// TCP で接続する
    ///
    /// Host が設定されていなければ `addr` をそのまま Host に使う。
    pub async fn connect(addr: &str, mut options: ConnectionOptions) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        if options.default_host.is_none() {
            options.default_host = Some(addr.to_string());
        }
        tracing::debug!(?peer, "connected");
        let mut conn = Connection::new(stream, options);
        conn.peer = peer;
        Ok(conn)
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// 確立済みのソケットから作成
    pub fn new(socket: S, options: ConnectionOptions) -> Self {
        let (reader, writer) = tokio::io::split(socket);
        Self {
            reader: Some(reader),
            writer: Some(SocketWriter::with_high_water_mark(
                writer,
                options.write_high_water_mark,
            )),
            parser: ResponseParser::with_limits(options.parser_limits.clone()),
            write_state: WriteState::new(),
            read_state: ReadState::new(),
            supervisor: TimeoutSupervisor::new(options.timeouts.clone()),
            read_buf: BytesMut::with_capacity(options.read_buffer_size),
            options,
            peer: None,
            closed: false,
            upgraded: false,
            eof: false,
        }
    }

    /// 接続先を設定 (エラーの状況に含まれる)
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// 接続先
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// 閉じられたかどうか
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// プロトコルが切り替わったかどうか
    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }

    /// ブロッキングリクエストのレスポンスヘッダー待ちか
    pub fn is_blocked(&self) -> bool {
        self.read_state.is_blocking()
    }

    /// 再利用できない印が付いているか
    pub fn is_reset(&self) -> bool {
        is_socket_reset(&self.write_state, &self.read_state)
    }

    /// 次のリクエストを送れるか
    pub fn can_dispatch(&self) -> bool {
        !self.closed && !self.upgraded && !self.is_blocked()
    }

    /// このソケットで送信したリクエスト数
    pub fn request_count(&self) -> u64 {
        self.write_state.request_count()
    }

    /// 交渉済みのアイドルタイムアウト
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.read_state.idle_timeout()
    }

    /// リクエストを送り、レスポンスを受信し終えるまで進める
    pub async fn dispatch<H: ResponseHandler>(
        &mut self,
        desc: RequestDescriptor,
        body: Body,
        handler: &mut H,
    ) -> Dispatched {
        self.dispatch_with_signal(desc, body, handler, None).await
    }

    /// 外部の中断シグナルと連動させてリクエストを送る
    ///
    /// `external` を中断するとこのリクエストが中断され、逆も同様。
    /// 連動は戻る時点で解除される。
    pub async fn dispatch_with_signal<H: ResponseHandler>(
        &mut self,
        desc: RequestDescriptor,
        body: Body,
        handler: &mut H,
        external: Option<&AbortSignal>,
    ) -> Dispatched {
        let signal = AbortSignal::new();
        let _link = external.map(|external| signal.link(external));

        if !self.can_dispatch() {
            self.notify_error(handler, &Error::ConnectionClosed, Phase::Transmit, false);
            return Dispatched::Failed;
        }
        let Some(mut writer) = self.writer.take() else {
            self.notify_error(handler, &Error::ConnectionClosed, Phase::Transmit, false);
            return Dispatched::Failed;
        };

        handler.on_connect(&signal);
        if signal.is_aborted() {
            self.writer = Some(writer);
            return self.abort(handler, &signal, Phase::Transmit).await;
        }

        self.supervisor.clear();
        self.parser
            .expect(ResponseContext::new(&desc.method).upgrade(desc.upgrade.is_some()));
        let blocking = desc.blocking;

        let backpressure = writer.backpressure();
        let mut write_state = std::mem::take(&mut self.write_state);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let transmit_options = self.options.transmit.clone();
        let default_host = self.options.default_host.clone();
        let transmit_signal = signal.clone();
        let transmit_fut = async move {
            let ctx = TransmitContext {
                options: &transmit_options,
                default_host: default_host.as_deref(),
                signal: &transmit_signal,
            };
            let outcome = transmit(&desc, body, &mut writer, &mut write_state, ctx, |event| {
                let _ = events_tx.send(event);
            })
            .await;
            (writer, write_state, outcome)
        };
        tokio::pin!(transmit_fut);

        let mut exchange = Exchange {
            transmitting: true,
            headers_received: false,
            paused: false,
            resume: ResumeHandle::new(),
        };

        loop {
            let deadline = self.supervisor.deadline();
            let read_size = self.options.read_buffer_size;
            let progress = tokio::select! {
                biased;
                _ = signal.aborted() => {
                    return self.abort(handler, &signal, exchange.phase()).await;
                }
                Some(event) = events_rx.recv(), if exchange.transmitting => {
                    deliver(handler, event);
                    Progress::Pending
                }
                (writer, state, outcome) = &mut transmit_fut, if exchange.transmitting => {
                    exchange.transmitting = false;
                    self.writer = Some(writer);
                    self.write_state = state;
                    while let Ok(event) = events_rx.try_recv() {
                        deliver(handler, event);
                    }
                    match outcome {
                        TransmitOutcome::Completed => {
                            if !exchange.headers_received {
                                if blocking {
                                    self.read_state.set_blocking();
                                }
                                self.supervisor.arm_headers(timeout::now());
                            }
                            Progress::Pending
                        }
                        TransmitOutcome::Rejected(err) => {
                            // 1 バイトも書いていないのでソケットはそのまま使える
                            self.parser.cancel_expectation();
                            self.arm_idle_if_idle();
                            self.notify_error(handler, &err, Phase::Transmit, false);
                            return Dispatched::Failed;
                        }
                        TransmitOutcome::Aborted(_) => {
                            return self.abort(handler, &signal, Phase::Transmit).await;
                        }
                        TransmitOutcome::Failed(err) => {
                            return self.fail(handler, err, Phase::Transmit).await;
                        }
                    }
                }
                _ = exchange.resume.wait(), if exchange.paused => {
                    tracing::trace!("response resumed");
                    exchange.paused = false;
                    self.parser.resume();
                    self.supervisor.refresh_phase(TimeoutPhase::Body, timeout::now());
                    self.process_events(handler, &mut exchange)
                }
                result = read_chunk(&mut self.reader, &mut self.read_buf, read_size),
                    if !exchange.paused && !self.eof =>
                {
                    match result {
                        Ok(0) => {
                            tracing::debug!("peer closed connection");
                            self.eof = true;
                            self.parser.push_eof();
                        }
                        Ok(_) => {
                            self.parser.push(&self.read_buf);
                            self.read_buf.clear();
                        }
                        Err(e) => {
                            return self.fail(handler, Error::Io(e), exchange.phase()).await;
                        }
                    }
                    self.process_events(handler, &mut exchange)
                }
                _ = timeout::sleep_until(deadline), if deadline.is_some() => {
                    let ctx = TimeoutContext {
                        writing: exchange.transmitting,
                        need_drain: backpressure.is_set(),
                        running: self.parser.in_flight(),
                        paused: exchange.paused,
                    };
                    match self.supervisor.fire(timeout::now(), ctx) {
                        Some(TimeoutAction::Fail(err)) => {
                            return self.fail(handler, Error::Http(err), exchange.phase()).await;
                        }
                        Some(TimeoutAction::Rearmed) => {
                            tracing::trace!(?ctx, "timeout ignored");
                        }
                        Some(TimeoutAction::CloseIdle) | None => {}
                    }
                    Progress::Pending
                }
            };

            match progress {
                Progress::Pending => {}
                Progress::Completed(complete) => {
                    let action = if exchange.transmitting {
                        // 送信中にレスポンスが完了した場合は送信を続けられない
                        NextAction::Close
                    } else {
                        next_action(
                            &complete,
                            &self.write_state,
                            &self.read_state,
                            self.parser.in_flight(),
                        )
                    };
                    tracing::debug!(
                        ?action,
                        keep_alive = complete.keep_alive,
                        "response complete"
                    );
                    match action {
                        NextAction::Close => self.destroy().await,
                        NextAction::Advance | NextAction::Continue => self.arm_idle_if_idle(),
                    }
                    return Dispatched::Completed;
                }
                Progress::Upgraded(head, remaining) => {
                    if exchange.transmitting {
                        // 送信の残りは headers_timeout の間だけ待つ
                        let wait = self.supervisor.config().headers_timeout;
                        let finished = if wait.is_zero() {
                            None
                        } else {
                            tokio::select! {
                                biased;
                                _ = signal.aborted() => {
                                    return self.abort(handler, &signal, Phase::Transmit).await;
                                }
                                finished = transmit_fut.as_mut() => Some(finished),
                                _ = tokio::time::sleep(wait) => None,
                            }
                        };
                        exchange.transmitting = false;
                        let sent = match finished {
                            Some((writer, state, outcome)) => {
                                self.writer = Some(writer);
                                self.write_state = state;
                                matches!(outcome, TransmitOutcome::Completed)
                            }
                            None => {
                                tracing::debug!(?wait, "request body still pending after upgrade");
                                false
                            }
                        };
                        while let Ok(event) = events_rx.try_recv() {
                            deliver(handler, event);
                        }
                        if !sent {
                            let err = Error::Http(shiguredo_http11_transport::Error::InvalidData(
                                "upgraded before request was sent".to_string(),
                            ));
                            return self.fail(handler, err, Phase::Transmit).await;
                        }
                    }
                    self.supervisor.clear();
                    self.upgraded = true;
                    tracing::debug!(
                        status = head.status_code,
                        remaining = remaining.len(),
                        "connection upgraded"
                    );
                    handler.on_upgrade(&head, Bytes::from(remaining));
                    return Dispatched::Upgraded;
                }
                Progress::Failed(err) => {
                    return self.fail(handler, Error::Http(err), exchange.phase()).await;
                }
            }
        }
    }

    fn process_events<H: ResponseHandler>(
        &mut self,
        handler: &mut H,
        exchange: &mut Exchange,
    ) -> Progress {
        loop {
            let event = match self.parser.next_event() {
                Ok(Some(event)) => event,
                Ok(None) => return Progress::Pending,
                Err(err) => return Progress::Failed(err),
            };
            match event {
                Event::MessageBegin => tracing::trace!("response begin"),
                Event::Status { status_code, .. } => tracing::trace!(status_code, "status line"),
                Event::HeadersComplete(headers) => {
                    exchange.resume.reset();
                    let flow = handler.on_headers(&headers.head, &exchange.resume);
                    if headers.informational {
                        tracing::debug!(
                            status = headers.head.status_code,
                            "informational response"
                        );
                        continue;
                    }
                    self.read_state.on_headers(
                        &headers,
                        self.options.transmit.pipelining,
                        self.supervisor.config(),
                    );
                    exchange.headers_received = true;
                    tracing::debug!(
                        status = headers.head.status_code,
                        keep_alive = headers.keep_alive,
                        framing = ?headers.framing,
                        idle_timeout = ?self.read_state.idle_timeout(),
                        "response headers"
                    );
                    self.supervisor.arm_body(timeout::now());
                    if flow == Flow::Pause {
                        self.pause(exchange);
                    }
                }
                Event::Body(chunk) => {
                    self.supervisor
                        .refresh_phase(TimeoutPhase::Body, timeout::now());
                    tracing::trace!(len = chunk.len(), "response body chunk");
                    exchange.resume.reset();
                    if handler.on_data(&chunk) == Flow::Pause {
                        self.pause(exchange);
                    }
                }
                Event::MessageComplete(complete) => {
                    if complete.informational {
                        continue;
                    }
                    self.supervisor.clear();
                    handler.on_complete(&complete.trailers);
                    return Progress::Completed(complete);
                }
                Event::Upgrade { head, remaining } => return Progress::Upgraded(head, remaining),
            }
        }
    }

    fn pause(&mut self, exchange: &mut Exchange) {
        tracing::trace!("response paused");
        self.parser.pause();
        exchange.paused = true;
    }

    fn arm_idle_if_idle(&mut self) {
        if !self.closed && self.parser.is_idle() {
            self.supervisor
                .arm_idle(self.read_state.idle_timeout(), timeout::now());
        }
    }

    fn notify_error<H: ResponseHandler>(
        &self,
        handler: &mut H,
        err: &Error,
        phase: Phase,
        aborted: bool,
    ) {
        let ctx = ErrorContext {
            phase,
            peer: self.peer,
            aborted,
        };
        handler.on_error(err, &ctx);
    }

    async fn fail<H: ResponseHandler>(
        &mut self,
        handler: &mut H,
        err: Error,
        phase: Phase,
    ) -> Dispatched {
        tracing::debug!(error = %err, %phase, "request failed");
        self.destroy().await;
        self.notify_error(handler, &err, phase, false);
        Dispatched::Failed
    }

    async fn abort<H: ResponseHandler>(
        &mut self,
        handler: &mut H,
        signal: &AbortSignal,
        phase: Phase,
    ) -> Dispatched {
        let reason = signal.reason();
        tracing::debug!(?reason, %phase, "request aborted");
        self.write_state.abort();
        self.destroy().await;
        let err = Error::Http(shiguredo_http11_transport::Error::Aborted(reason));
        self.notify_error(handler, &err, phase, true);
        Dispatched::Aborted
    }

    async fn destroy(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.supervisor.clear();
        if let Some(writer) = self.writer.as_mut() {
            writer.destroy().await;
        }
        self.writer = None;
        self.reader = None;
        tracing::debug!(peer = ?self.peer, "connection closed");
    }

    /// 接続を閉じる
    pub async fn close(&mut self) {
        self.destroy().await;
    }

    /// アイドル中の接続を見張る
    ///
    /// アイドルタイムアウト、または相手が閉じた時点で接続を閉じて `Ok(())` を返す。
    /// アイドル中にデータが届いた場合はエラーで閉じる。
    /// キャンセルしても接続の状態は壊れない。
    pub async fn wait_idle(&mut self) -> Result<()> {
        if self.closed || self.upgraded {
            return Err(Error::ConnectionClosed);
        }
        if self.supervisor.phase() != Some(TimeoutPhase::Idle) {
            self.arm_idle_if_idle();
        }
        loop {
            let deadline = self.supervisor.deadline();
            let read_size = self.options.read_buffer_size;
            tokio::select! {
                result = read_chunk(&mut self.reader, &mut self.read_buf, read_size), if !self.eof => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("peer closed idle connection");
                            self.eof = true;
                            self.destroy().await;
                            return Ok(());
                        }
                        Ok(_) => {
                            self.parser.push(&self.read_buf);
                            self.read_buf.clear();
                            let err = match self.parser.next_event() {
                                Err(err) => err,
                                Ok(_) => shiguredo_http11_transport::Error::InvalidData(
                                    "unexpected data on idle connection".to_string(),
                                ),
                            };
                            self.destroy().await;
                            return Err(Error::Http(err));
                        }
                        Err(e) => {
                            self.destroy().await;
                            return Err(Error::Io(e));
                        }
                    }
                }
                _ = timeout::sleep_until(deadline), if deadline.is_some() => {
                    if let Some(TimeoutAction::CloseIdle) =
                        self.supervisor.fire(timeout::now(), TimeoutContext::default())
                    {
                        tracing::debug!("idle timeout");
                        self.destroy().await;
                        return Ok(());
                    }
                }
                else => {
                    self.destroy().await;
                    return Ok(());
                }
            }
        }
    }

    /// ソケットを取り出す
    ///
    /// 閉じられた後、または送信中に破棄された後は `None`。
    pub fn into_inner(self) -> Option<S> {
        match (self.reader, self.writer) {
            (Some(reader), Some(writer)) => Some(reader.unsplit(writer.into_inner())),
            _ => None,
        }
    }
}
