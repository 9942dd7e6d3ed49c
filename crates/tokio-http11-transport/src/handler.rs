//! レスポンスハンドラー
//!
//! リクエストごとのライフサイクルコールバック。全てデフォルト実装を持つので、
//! 必要なものだけ実装すればよい。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use shiguredo_http11_transport::{ResponseHead, Warning};
use tokio::sync::Notify;

use crate::abort::AbortSignal;
use crate::error::{Error, ErrorContext};

/// 受信を続けるかどうか
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// 続ける
    Continue,
    /// 一時停止する ([`ResumeHandle::resume`] で再開)
    Pause,
}

/// レスポンスハンドラー
pub trait ResponseHandler: Send {
    /// 送信を開始する直前に呼ばれる
    ///
    /// `abort` で中断するとソケットは閉じられ、`on_error` が中断として呼ばれる。
    fn on_connect(&mut self, abort: &AbortSignal) {
        let _ = abort;
    }

    /// ボディのチャンクを送信バッファに積んだ
    fn on_body_sent(&mut self, chunk: &[u8]) {
        let _ = chunk;
    }

    /// リクエストを全て送信した
    fn on_request_sent(&mut self) {}

    /// レスポンスヘッダーを受信した
    ///
    /// 1xx の情報レスポンスでも呼ばれる。その場合、戻り値は無視される。
    fn on_headers(&mut self, head: &ResponseHead, resume: &ResumeHandle) -> Flow {
        let _ = (head, resume);
        Flow::Continue
    }

    /// レスポンスボディのチャンクを受信した
    fn on_data(&mut self, chunk: &[u8]) -> Flow {
        let _ = chunk;
        Flow::Continue
    }

    /// レスポンスを全て受信した
    fn on_complete(&mut self, trailers: &[(String, String)]) {
        let _ = trailers;
    }

    /// プロトコルが切り替わった
    ///
    /// `remaining` はヘッダー終端より後に受信済みのバイト列。
    /// ソケットは [`crate::Connection::into_inner`] で取り出す。
    fn on_upgrade(&mut self, head: &ResponseHead, remaining: Bytes) {
        let _ = (head, remaining);
    }

    /// 致命的でない問題
    fn on_warning(&mut self, warning: &Warning) {
        let _ = warning;
    }

    /// 致命的エラー (リクエストごとに最大 1 回)
    fn on_error(&mut self, err: &Error, ctx: &ErrorContext) {
        let _ = (err, ctx);
    }
}

#[derive(Debug, Default)]
struct ResumeInner {
    requested: AtomicBool,
    notify: Notify,
}

/// 一時停止した受信を再開するハンドル
///
/// 複製して別タスクに渡せる。
#[derive(Debug, Clone, Default)]
pub struct ResumeHandle {
    inner: Arc<ResumeInner>,
}

impl ResumeHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 受信を再開する
    pub fn resume(&self) {
        self.inner.requested.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    /// ハンドラー呼び出し前に古い再開要求を捨てる
    pub(crate) fn reset(&self) {
        self.inner.requested.store(false, Ordering::Release);
    }

    /// 再開されるまで待つ
    ///
    /// キャンセルされても再開要求は失われない。
    pub(crate) async fn wait(&self) {
        loop {
            if self.inner.requested.swap(false, Ordering::AcqRel) {
                return;
            }
            self.inner.notify.notified().await;
        }
    }
}
