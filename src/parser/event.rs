//! パーサーが生成するイベント

use std::time::Duration;

use super::head::ResponseHead;

/// レスポンスボディのフレーミング
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    /// Content-Length で指定された固定長
    ContentLength(u64),
    /// Transfer-Encoding: chunked
    Chunked,
    /// 接続が閉じるまでがボディ (close-delimited)
    CloseDelimited,
    /// ボディなし (HEAD, 1xx, 204, 304)
    None,
}

/// ヘッダー完了イベントの内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadersComplete {
    /// ステータス行とヘッダー
    pub head: ResponseHead,
    /// このレスポンスの後に接続を再利用できるか
    pub keep_alive: bool,
    /// `Keep-Alive: timeout=N` のヒント
    pub keep_alive_timeout: Option<Duration>,
    /// ボディのフレーミング
    pub framing: ResponseFraming,
    /// 1xx 情報レスポンスかどうか (最終レスポンスはこの後に続く)
    pub informational: bool,
}

/// メッセージ完了イベントの内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageComplete {
    /// chunked のトレーラー
    pub trailers: Vec<(String, String)>,
    /// このレスポンスの後に接続を再利用できるか
    pub keep_alive: bool,
    /// 1xx 情報レスポンスの完了かどうか
    pub informational: bool,
}

/// レスポンスのライフサイクルイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// 新しいレスポンスの最初のバイトを受信した
    MessageBegin,
    /// ステータス行を受信した
    Status {
        version: String,
        status_code: u16,
        reason_phrase: String,
    },
    /// ヘッダーを全て受信した
    HeadersComplete(HeadersComplete),
    /// ボディのチャンク
    Body(Vec<u8>),
    /// レスポンスを全て受信した
    MessageComplete(MessageComplete),
    /// プロトコルが切り替わった
    ///
    /// `remaining` はヘッダー終端より後に受信済みのバイト列そのもの。
    Upgrade {
        head: ResponseHead,
        remaining: Vec<u8>,
    },
}
