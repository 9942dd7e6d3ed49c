//! HTTP レスポンスパーサー

use std::collections::VecDeque;

use crate::error::Error;
use crate::limits::ParserLimits;

use super::event::{Event, HeadersComplete, MessageComplete, ResponseFraming};
use super::head::ResponseHead;
use super::phase::{BodyPhase, ParsePhase};
use super::syntax::{
    find_line, parse_chunk_size, parse_header_line, parse_status_line, partial_line_len,
    resolve_body_headers,
};

/// 送信済みリクエストのうち、レスポンスの解釈に必要な情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseContext {
    /// リクエストメソッド
    pub method: String,
    /// アップグレードを要求したかどうか
    pub upgrade: bool,
}

impl ResponseContext {
    /// 新しいコンテキストを作成
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            upgrade: false,
        }
    }

    /// アップグレード要求を設定
    pub fn upgrade(mut self, upgrade: bool) -> Self {
        self.upgrade = upgrade;
        self
    }
}

/// HTTP レスポンスパーサー (Sans I/O)
///
/// 受信バイト列を [`Event`] の列に変換する。パースバッファは
/// 同じソケット上の全レスポンスで使い回す。
///
/// レスポンスはリクエストの送信順に対応付ける。送信するたびに
/// [`ResponseParser::expect`] でコンテキストを登録すること。
///
/// ```rust
/// use shiguredo_http11_transport::{Event, ResponseContext, ResponseParser};
///
/// let mut parser = ResponseParser::new();
/// parser.expect(ResponseContext::new("GET"));
///
/// let events = parser
///     .feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
///     .unwrap();
/// assert!(matches!(events[0], Event::MessageBegin));
/// assert!(matches!(events.last(), Some(Event::MessageComplete(_))));
/// ```
#[derive(Debug)]
pub struct ResponseParser {
    buf: Vec<u8>,
    phase: ParsePhase,
    limits: ParserLimits,
    pending: VecDeque<ResponseContext>,
    current: Option<ResponseContext>,
    begun: bool,
    status: Option<(String, u16, String)>,
    headers: Vec<(String, String)>,
    header_bytes: usize,
    keep_alive: bool,
    informational: bool,
    body_read: u64,
    trailers: Vec<(String, String)>,
    trailer_bytes: usize,
    paused: bool,
    eof: bool,
    eof_handled: bool,
    failed: Option<Error>,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseParser {
    /// 新しいパーサーを作成
    pub fn new() -> Self {
        Self::with_limits(ParserLimits::default())
    }

    /// 制限付きでパーサーを作成
    pub fn with_limits(limits: ParserLimits) -> Self {
        Self {
            buf: Vec::new(),
            phase: ParsePhase::AwaitingStatusLine,
            limits,
            pending: VecDeque::new(),
            current: None,
            begun: false,
            status: None,
            headers: Vec::new(),
            header_bytes: 0,
            keep_alive: false,
            informational: false,
            body_read: 0,
            trailers: Vec::new(),
            trailer_bytes: 0,
            paused: false,
            eof: false,
            eof_handled: false,
            failed: None,
        }
    }

    /// 制限設定を取得
    pub fn limits(&self) -> &ParserLimits {
        &self.limits
    }

    /// 送信したリクエストのコンテキストを登録
    pub fn expect(&mut self, context: ResponseContext) {
        self.pending.push_back(context);
    }

    /// 最後に登録したコンテキストを取り消す
    ///
    /// 1 バイトも送信せずに失敗したリクエストに使う。
    pub fn cancel_expectation(&mut self) -> Option<ResponseContext> {
        self.pending.pop_back()
    }

    /// レスポンス待ちのリクエスト数 (受信中のものを含む)
    pub fn in_flight(&self) -> usize {
        self.pending.len() + usize::from(self.current.is_some())
    }

    /// 受信中のレスポンスも待ちのリクエストもないか
    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0 && !self.begun
    }

    /// ボディ受信中かどうか
    pub fn is_receiving_body(&self) -> bool {
        matches!(self.phase, ParsePhase::Body(_))
    }

    /// もうレスポンスを受け付けない状態か (keep-alive なしの完了、またはアップグレード)
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, ParsePhase::Complete | ParsePhase::Upgraded)
    }

    /// 一時停止中かどうか
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// 一時停止する
    ///
    /// 未処理のバイトは保持され、[`ResponseParser::resume`] の後にその位置から再開する。
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// 再開する
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// バッファにデータを追加
    pub fn push(&mut self, data: &[u8]) {
        if !self.is_finished() {
            self.buf.extend_from_slice(data);
        }
    }

    /// 接続終了を通知
    ///
    /// バッファ内のデータを処理し終えた時点で close-delimited ボディを完了させる。
    /// メッセージの途中であればエラーになる。
    pub fn push_eof(&mut self) {
        self.eof = true;
    }

    /// データを追加して、その時点で取り出せるイベントを全て返す
    ///
    /// 途中で一時停止したい場合は [`ResponseParser::push`] と
    /// [`ResponseParser::next_event`] を使う。
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Event>, Error> {
        self.push(data);
        self.drain_events()
    }

    /// 接続終了を通知して、残りのイベントを全て返す
    pub fn finish(&mut self) -> Result<Vec<Event>, Error> {
        self.push_eof();
        self.drain_events()
    }

    fn drain_events(&mut self) -> Result<Vec<Event>, Error> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event()? {
            events.push(event);
        }
        Ok(events)
    }

    /// 次のイベントを 1 つ取り出す
    ///
    /// データ不足または一時停止中は `Ok(None)` を返す。
    /// エラーは記録され、以降の呼び出しでも同じエラーを返す。
    pub fn next_event(&mut self) -> Result<Option<Event>, Error> {
        if let Some(err) = &self.failed {
            return Err(err.clone());
        }
        if self.paused {
            return Ok(None);
        }
        let result = match self.step() {
            Ok(None) if self.eof && !self.eof_handled => {
                self.eof_handled = true;
                self.on_eof()
            }
            other => other,
        };
        if let Err(err) = &result {
            self.failed = Some(err.clone());
        }
        result
    }

    fn step(&mut self) -> Result<Option<Event>, Error> {
        loop {
            match self.phase {
                ParsePhase::AwaitingStatusLine => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    if !self.begun {
                        if self.current.is_none() {
                            let context = self.pending.pop_front().ok_or_else(|| {
                                Error::InvalidData("unexpected data: no pending request".to_string())
                            })?;
                            self.current = Some(context);
                        }
                        self.begun = true;
                        return Ok(Some(Event::MessageBegin));
                    }
                    let Some(pos) = find_line(&self.buf) else {
                        self.check_header_size(partial_line_len(&self.buf))?;
                        return Ok(None);
                    };
                    self.check_header_size(pos)?;
                    let (version, status_code, reason_phrase) =
                        parse_status_line(&self.buf[..pos])?;
                    self.buf.drain(..pos + 2);

                    // 100-continue は扱わない
                    if status_code == 100 {
                        return Err(Error::InvalidData(
                            "bad response: unexpected 100 Continue".to_string(),
                        ));
                    }

                    self.status = Some((version.clone(), status_code, reason_phrase.clone()));
                    self.phase = ParsePhase::AwaitingHeaders;
                    return Ok(Some(Event::Status {
                        version,
                        status_code,
                        reason_phrase,
                    }));
                }
                ParsePhase::AwaitingHeaders => {
                    let Some(pos) = find_line(&self.buf) else {
                        self.check_header_size(
                            self.header_bytes.saturating_add(partial_line_len(&self.buf)),
                        )?;
                        return Ok(None);
                    };
                    if pos == 0 {
                        self.buf.drain(..2);
                        return self.on_headers_complete().map(Some);
                    }

                    let size = self.header_bytes.saturating_add(pos);
                    self.check_header_size(size)?;
                    if self.headers.len() >= self.limits.max_headers_count {
                        return Err(Error::TooManyHeaders {
                            count: self.headers.len() + 1,
                            limit: self.limits.max_headers_count,
                        });
                    }
                    let header = parse_header_line(&self.buf[..pos])?;
                    self.buf.drain(..pos + 2);
                    self.header_bytes = size;
                    self.headers.push(header);
                }
                ParsePhase::Body(_) => return self.step_body(),
                ParsePhase::Complete => {
                    self.buf.clear();
                    return Ok(None);
                }
                ParsePhase::Upgraded => return Ok(None),
            }
        }
    }

    fn step_body(&mut self) -> Result<Option<Event>, Error> {
        loop {
            let ParsePhase::Body(phase) = self.phase else {
                return self.step();
            };
            match phase {
                BodyPhase::ContentLength { remaining: 0 } => {
                    return self.complete_message().map(Some);
                }
                BodyPhase::ContentLength { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let n = (self.buf.len() as u64).min(remaining);
                    let chunk = self.take_body(n)?;
                    self.phase = ParsePhase::Body(BodyPhase::ContentLength {
                        remaining: remaining - n,
                    });
                    return Ok(Some(Event::Body(chunk)));
                }
                BodyPhase::ChunkSize => {
                    let limit = self.limits.max_chunk_line_size;
                    let Some(pos) = find_line(&self.buf) else {
                        let size = partial_line_len(&self.buf);
                        if size > limit {
                            return Err(Error::ChunkLineTooLong { size, limit });
                        }
                        return Ok(None);
                    };
                    if pos > limit {
                        return Err(Error::ChunkLineTooLong { size: pos, limit });
                    }
                    let size = parse_chunk_size(&self.buf[..pos])?;
                    self.buf.drain(..pos + 2);
                    self.phase = ParsePhase::Body(if size == 0 {
                        BodyPhase::Trailers
                    } else {
                        BodyPhase::ChunkData { remaining: size }
                    });
                }
                BodyPhase::ChunkData { remaining } => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let n = (self.buf.len() as u64).min(remaining);
                    let chunk = self.take_body(n)?;
                    self.phase = ParsePhase::Body(if remaining == n {
                        BodyPhase::ChunkDataCrlf
                    } else {
                        BodyPhase::ChunkData {
                            remaining: remaining - n,
                        }
                    });
                    return Ok(Some(Event::Body(chunk)));
                }
                BodyPhase::ChunkDataCrlf => {
                    if self.buf.len() < 2 {
                        return Ok(None);
                    }
                    if self.buf[..2] != *b"\r\n" {
                        return Err(Error::InvalidData(
                            "invalid chunked encoding: expected CRLF after chunk data".to_string(),
                        ));
                    }
                    self.buf.drain(..2);
                    self.phase = ParsePhase::Body(BodyPhase::ChunkSize);
                }
                BodyPhase::Trailers => {
                    let Some(pos) = find_line(&self.buf) else {
                        self.check_header_size(
                            self.trailer_bytes.saturating_add(partial_line_len(&self.buf)),
                        )?;
                        return Ok(None);
                    };
                    if pos == 0 {
                        self.buf.drain(..2);
                        return self.complete_message().map(Some);
                    }
                    let size = self.trailer_bytes.saturating_add(pos);
                    self.check_header_size(size)?;
                    if self.trailers.len() >= self.limits.max_headers_count {
                        return Err(Error::TooManyHeaders {
                            count: self.trailers.len() + 1,
                            limit: self.limits.max_headers_count,
                        });
                    }
                    let trailer = parse_header_line(&self.buf[..pos])?;
                    self.buf.drain(..pos + 2);
                    self.trailer_bytes = size;
                    self.trailers.push(trailer);
                }
                BodyPhase::CloseDelimited => {
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    let chunk = self.take_body(self.buf.len() as u64)?;
                    return Ok(Some(Event::Body(chunk)));
                }
            }
        }
    }

    fn check_header_size(&self, size: usize) -> Result<(), Error> {
        if size > self.limits.max_header_size {
            return Err(Error::HeadersOverflow {
                size,
                limit: self.limits.max_header_size,
            });
        }
        Ok(())
    }

    fn take_body(&mut self, n: u64) -> Result<Vec<u8>, Error> {
        let size = self.body_read.saturating_add(n);
        if let Some(limit) = self.limits.max_response_size
            && size > limit
        {
            return Err(Error::ResponseExceededMaxSize { size, limit });
        }
        self.body_read = size;
        Ok(self.buf.drain(..n as usize).collect())
    }

    fn on_headers_complete(&mut self) -> Result<Event, Error> {
        let context = self
            .current
            .clone()
            .ok_or_else(|| Error::InvalidData("unexpected data: no pending request".to_string()))?;
        let (version, status_code, reason_phrase) = self
            .status
            .take()
            .ok_or_else(|| Error::InvalidData("missing status line".to_string()))?;
        let head = ResponseHead {
            version,
            status_code,
            reason_phrase,
            headers: std::mem::take(&mut self.headers),
        };

        if status_code == 101 {
            if !context.upgrade {
                return Err(Error::InvalidData("bad upgrade".to_string()));
            }
            return Ok(self.upgrade(head));
        }
        // CONNECT への 2xx はトンネルに切り替わり、TE と CL は無視される
        if context.method == "CONNECT" && head.is_success() {
            return Ok(self.upgrade(head));
        }

        let informational = head.is_informational();
        let (chunked, content_length) = resolve_body_headers(&head.headers)?;
        let no_body = context.method == "HEAD"
            || informational
            || status_code == 204
            || status_code == 304;

        let framing = if no_body {
            ResponseFraming::None
        } else if chunked {
            ResponseFraming::Chunked
        } else if let Some(len) = content_length {
            ResponseFraming::ContentLength(len)
        } else {
            ResponseFraming::CloseDelimited
        };

        if let (ResponseFraming::ContentLength(len), Some(limit)) =
            (framing, self.limits.max_response_size)
            && len > limit
        {
            return Err(Error::ResponseExceededMaxSize { size: len, limit });
        }

        // close-delimited は接続の終了がボディの終端なので再利用できない
        let keep_alive = framing != ResponseFraming::CloseDelimited && head.is_keep_alive();

        self.keep_alive = keep_alive;
        self.informational = informational;
        self.phase = ParsePhase::Body(match framing {
            ResponseFraming::ContentLength(len) => BodyPhase::ContentLength { remaining: len },
            ResponseFraming::Chunked => BodyPhase::ChunkSize,
            ResponseFraming::CloseDelimited => BodyPhase::CloseDelimited,
            ResponseFraming::None => BodyPhase::ContentLength { remaining: 0 },
        });

        let keep_alive_timeout = head.keep_alive_timeout();
        Ok(Event::HeadersComplete(HeadersComplete {
            head,
            keep_alive,
            keep_alive_timeout,
            framing,
            informational,
        }))
    }

    fn upgrade(&mut self, head: ResponseHead) -> Event {
        self.phase = ParsePhase::Upgraded;
        self.current = None;
        self.begun = false;
        Event::Upgrade {
            head,
            remaining: std::mem::take(&mut self.buf),
        }
    }

    fn complete_message(&mut self) -> Result<Event, Error> {
        let event = MessageComplete {
            trailers: std::mem::take(&mut self.trailers),
            keep_alive: self.keep_alive,
            informational: self.informational,
        };

        self.begun = false;
        self.status = None;
        self.headers.clear();
        self.header_bytes = 0;
        self.body_read = 0;
        self.trailer_bytes = 0;
        self.informational = false;

        // 情報レスポンスの後は同じリクエストの最終レスポンスを待つ
        if event.informational {
            self.phase = ParsePhase::AwaitingStatusLine;
        } else {
            self.current = None;
            self.phase = if event.keep_alive {
                ParsePhase::AwaitingStatusLine
            } else {
                ParsePhase::Complete
            };
        }
        Ok(Event::MessageComplete(event))
    }

    fn on_eof(&mut self) -> Result<Option<Event>, Error> {
        match self.phase {
            ParsePhase::AwaitingStatusLine if !self.begun && self.in_flight() == 0 => Ok(None),
            ParsePhase::Body(BodyPhase::CloseDelimited) => {
                self.keep_alive = false;
                self.complete_message().map(Some)
            }
            ParsePhase::Body(BodyPhase::ContentLength { remaining }) => {
                Err(Error::ResponseContentLengthMismatch {
                    expected: self.body_read + remaining,
                    actual: self.body_read,
                })
            }
            ParsePhase::Complete | ParsePhase::Upgraded => Ok(None),
            _ => Err(Error::SocketClosed),
        }
    }
}
