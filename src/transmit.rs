//! リクエスト送信の状態機械 (Sans I/O)
//!
//! リクエスト行とヘッダーを組み立て、ボディのフレーミング (固定長 / chunked) を行う。
//! 生成したバイト列は呼び出し側のバッファに追記するだけで、書き込みは行わない。
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_http11_transport::{
//!     BodyShape, RequestDescriptor, TransmitOptions, Transmission, WriteState, classify,
//! };
//!
//! let desc = RequestDescriptor::new("POST", "/upload").host("example.com");
//! let plan = classify(&BodyShape::Stream);
//! let mut state = WriteState::new();
//! let mut tx = Transmission::prepare(&desc, &plan, &mut state, &TransmitOptions::default())
//!     .unwrap();
//!
//! let mut out = Vec::new();
//! tx.write_chunk(b"hello", &mut out).unwrap();
//! tx.finish(&mut out).unwrap();
//! tx.complete(&mut state);
//!
//! assert!(out.ends_with(b"transfer-encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n"));
//! ```

use crate::body::{BodyPlan, Strategy};
use crate::error::{Error, Warning};
use crate::limits::TransmitOptions;
use crate::request::{RequestDescriptor, ResetPolicy, checks_content_length, expects_payload};

/// ボディのフレーミング
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// まだ決まっていない (最初のチャンク送信時に決まる)
    Pending,
    /// Content-Length による固定長
    ContentLength(u64),
    /// Transfer-Encoding: chunked
    Chunked,
    /// ボディなし
    None,
}

/// ソケット書き込み側の状態
///
/// 送信側だけが変更する。読み取り側の状態とは独立。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteState {
    request_count: u64,
    reset: bool,
    writing: bool,
}

impl WriteState {
    /// 新しい状態を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// このソケットで送信したリクエスト数
    pub fn request_count(&self) -> u64 {
        self.request_count
    }

    /// 現在のリクエストの後にソケットを閉じるかどうか
    pub fn is_reset(&self) -> bool {
        self.reset
    }

    /// ソケットを閉じる印を付ける
    pub fn mark_reset(&mut self) {
        self.reset = true;
    }

    /// 送信中かどうか
    pub fn is_writing(&self) -> bool {
        self.writing
    }

    /// 送信の中断を記録
    pub fn abort(&mut self) {
        self.writing = false;
        self.reset = true;
    }
}

/// 1 回のリクエスト送信の状態
#[derive(Debug)]
pub struct Transmission {
    strategy: Strategy,
    expects_payload: bool,
    strict: bool,
    /// リクエスト行とヘッダー (終端の空行とフレーミング行は含まない)
    header: Vec<u8>,
    content_length: Option<u64>,
    framing: Framing,
    bytes_written: u64,
    header_flushed: bool,
    finished: bool,
    reset_on_body: bool,
    warnings: Vec<Warning>,
    /// 不一致の警告は 1 回の送信につき 1 つだけ
    mismatch_warned: bool,
}

impl Transmission {
    /// 送信を準備する
    ///
    /// Content-Length を解決して検証し、接続管理ヘッダーを決めてヘッダーブロックを組み立てる。
    /// strict モードで長さが一致しない場合は、1 バイトも書く前にエラーを返す。
    pub fn prepare(
        desc: &RequestDescriptor,
        plan: &BodyPlan,
        state: &mut WriteState,
        options: &TransmitOptions,
    ) -> Result<Self, Error> {
        Self::prepare_with_host(desc, plan, state, options, None)
    }

    /// 接続のデフォルト Host を指定して送信を準備する
    ///
    /// 記述子に Host の上書きがない場合に `default_host` を使う。
    pub fn prepare_with_host(
        desc: &RequestDescriptor,
        plan: &BodyPlan,
        state: &mut WriteState,
        options: &TransmitOptions,
        default_host: Option<&str>,
    ) -> Result<Self, Error> {
        let method = desc.method.as_str();
        let expects_payload = expects_payload(method);

        let mut content_length = plan.measured_len.or(desc.content_length);
        if content_length == Some(0) && !expects_payload {
            content_length = None;
        }

        let mut warnings = Vec::new();
        if let (Some(measured), Some(declared)) = (plan.measured_len, desc.content_length)
            && measured != declared
            && checks_content_length(method)
        {
            if options.strict_content_length {
                return Err(Error::ContentLengthMismatch {
                    declared,
                    actual: measured,
                });
            }
            warnings.push(Warning::ContentLengthMismatch {
                declared,
                actual: measured,
            });
        }

        // ここから先はソケット状態を変更する
        if method == "HEAD" || method == "CONNECT" || desc.upgrade.is_some() {
            state.reset = true;
        }
        match desc.reset {
            ResetPolicy::ForceClose => state.reset = true,
            ResetPolicy::ForceKeepAlive => state.reset = false,
            ResetPolicy::Unset => {}
        }
        state.request_count += 1;
        if let Some(max) = options.max_requests_per_connection
            && state.request_count > max
        {
            state.reset = true;
        }
        state.writing = true;

        let mut header = Vec::with_capacity(256);

        // Request line: METHOD SP PATH SP HTTP/1.1 CRLF
        header.extend_from_slice(method.as_bytes());
        header.push(b' ');
        header.extend_from_slice(desc.path.as_bytes());
        header.extend_from_slice(b" HTTP/1.1\r\n");

        // ヘッダー一覧に Host があればそちらを使う
        if !desc.has_header("host")
            && let Some(host) = desc.host.as_deref().or(default_host)
        {
            push_header(&mut header, "host", host);
        }

        if let Some(protocol) = &desc.upgrade {
            push_header(&mut header, "connection", "upgrade");
            push_header(&mut header, "upgrade", protocol);
        } else if options.pipelining > 0 && !state.reset {
            push_header(&mut header, "connection", "keep-alive");
        } else {
            push_header(&mut header, "connection", "close");
        }

        for (name, value) in &desc.headers {
            for v in value.iter() {
                push_header(&mut header, name, v);
            }
        }

        if let Some(ct) = &plan.content_type
            && !desc.has_header("content-type")
        {
            push_header(&mut header, "content-type", ct);
        }

        Ok(Self {
            strategy: plan.strategy,
            expects_payload,
            strict: options.strict_content_length,
            header,
            content_length,
            framing: Framing::Pending,
            bytes_written: 0,
            header_flushed: false,
            finished: false,
            reset_on_body: !expects_payload && desc.reset != ResetPolicy::ForceKeepAlive,
            mismatch_warned: !warnings.is_empty(),
            warnings,
        })
    }

    /// 送信戦略
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// 解決済みの Content-Length
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// 決定したフレーミング
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// 送信済みボディバイト数
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// ヘッダーを出力済みかどうか
    pub fn is_header_flushed(&self) -> bool {
        self.header_flushed
    }

    /// 蓄積された警告を取り出す
    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Content-Length 不一致を strict / lenient に従って処理
    fn mismatch(&mut self, declared: u64, actual: u64) -> Result<(), Error> {
        if self.strict {
            return Err(Error::ContentLengthMismatch { declared, actual });
        }
        if !self.mismatch_warned {
            self.mismatch_warned = true;
            self.warnings
                .push(Warning::ContentLengthMismatch { declared, actual });
        }
        Ok(())
    }

    fn take_header(&mut self, out: &mut Vec<u8>) {
        debug_assert!(!self.header_flushed);
        out.append(&mut self.header);
        self.header_flushed = true;
    }

    /// ボディなしで送信を完了する
    ///
    /// 解決した長さがちょうど 0 の場合のみ `content-length: 0` を付ける。
    pub fn write_empty(&mut self, out: &mut Vec<u8>) {
        self.take_header(out);
        if self.content_length == Some(0) {
            out.extend_from_slice(b"content-length: 0\r\n\r\n");
        } else {
            out.extend_from_slice(b"\r\n");
        }
        self.framing = Framing::None;
        self.finished = true;
    }

    /// メモリ上のボディを一括で出力する
    ///
    /// 遅延ソースを読み切った結果もここに渡す。宣言と実際の長さが違う場合は
    /// 不一致規則を適用し、lenient なら実際の長さで送る。
    pub fn write_fixed(&mut self, body: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        let actual = body.len() as u64;
        if actual == 0 {
            self.content_length = self.content_length.filter(|_| self.expects_payload);
            if let Some(declared) = self.content_length
                && declared != 0
            {
                self.mismatch(declared, 0)?;
                self.content_length = Some(0);
            }
            self.write_empty(out);
            return Ok(());
        }
        if let Some(expected) = self.content_length
            && expected != actual
        {
            self.mismatch(expected, actual)?;
        }
        self.content_length = Some(actual);

        self.take_header(out);
        out.extend_from_slice(b"content-length: ");
        out.extend_from_slice(actual.to_string().as_bytes());
        out.extend_from_slice(b"\r\n\r\n");
        out.extend_from_slice(body);

        self.framing = Framing::ContentLength(actual);
        self.bytes_written = actual;
        self.finished = true;
        Ok(())
    }

    /// ストリームのチャンクを 1 つ出力する
    ///
    /// 最初のチャンクでヘッダーとフレーミング行を出力する。
    /// 長さが分からない場合は chunked になる。
    pub fn write_chunk(&mut self, chunk: &[u8], out: &mut Vec<u8>) -> Result<(), Error> {
        if self.finished {
            return Err(Error::InvalidData(
                "write_chunk called after finish".to_string(),
            ));
        }
        let len = chunk.len() as u64;
        if len == 0 {
            return Ok(());
        }

        if let Some(expected) = self.content_length
            && self.bytes_written + len > expected
        {
            self.mismatch(expected, self.bytes_written + len)?;
        }

        if !self.header_flushed {
            self.take_header(out);
            match self.content_length {
                Some(n) => {
                    out.extend_from_slice(b"content-length: ");
                    out.extend_from_slice(n.to_string().as_bytes());
                    out.extend_from_slice(b"\r\n\r\n");
                    self.framing = Framing::ContentLength(n);
                }
                None => {
                    out.extend_from_slice(b"transfer-encoding: chunked\r\n\r\n");
                    self.framing = Framing::Chunked;
                }
            }
        }

        if self.framing == Framing::Chunked {
            out.extend_from_slice(format!("{:x}\r\n", len).as_bytes());
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
        } else {
            out.extend_from_slice(chunk);
        }
        self.bytes_written += len;
        Ok(())
    }

    /// ストリームの終端を出力する
    ///
    /// 1 バイトも送っていなければ空ボディとして扱う。宣言長に届かなかった場合も
    /// 不一致規則を適用する。
    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        if !self.header_flushed {
            self.take_header(out);
            if self.expects_payload {
                out.extend_from_slice(b"content-length: 0\r\n\r\n");
            } else {
                out.extend_from_slice(b"\r\n");
            }
            self.framing = Framing::None;
        } else if self.framing == Framing::Chunked {
            out.extend_from_slice(b"0\r\n\r\n");
        }
        self.finished = true;

        if let Some(expected) = self.content_length
            && self.bytes_written != expected
        {
            self.mismatch(expected, self.bytes_written)?;
        }
        Ok(())
    }

    /// 送信完了をソケット状態に反映する
    ///
    /// ペイロードを期待しないメソッドでボディを送った場合は、
    /// keep-alive が明示されていない限りソケットを閉じる印を付ける。
    pub fn complete(&self, state: &mut WriteState) {
        if self.bytes_written > 0 && self.reset_on_body {
            state.reset = true;
        }
        state.writing = false;
    }
}

fn push_header(buf: &mut Vec<u8>, name: &str, value: &str) {
    buf.extend_from_slice(name.as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}
