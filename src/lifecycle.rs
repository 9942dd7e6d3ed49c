//! レスポンス受信後の接続判断
//!
//! 書き込み側 ([`WriteState`]) と読み取り側 ([`ReadState`]) はそれぞれ
//! 片方だけが変更する。ここの判断関数は両方を読むだけ。

use std::time::Duration;

use crate::limits::TimeoutConfig;
use crate::parser::{HeadersComplete, MessageComplete};
use crate::transmit::WriteState;

/// ソケット読み取り側の状態
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadState {
    reset: bool,
    blocking: bool,
    idle_timeout: Option<Duration>,
}

impl ReadState {
    /// 新しい状態を作成
    pub fn new() -> Self {
        Self::default()
    }

    /// レスポンスにより接続を閉じることになったか
    pub fn is_reset(&self) -> bool {
        self.reset
    }

    /// ブロッキングリクエストがレスポンスヘッダーを待っているか
    ///
    /// この間は次のリクエストを送らない。
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// ブロッキングリクエストの送信を記録
    pub fn set_blocking(&mut self) {
        self.blocking = true;
    }

    /// 交渉済みのアイドルタイムアウト
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// レスポンスヘッダー受信時の keep-alive 判定
    ///
    /// 最終レスポンスのヘッダーでブロッキングも解除する。
    /// keep-alive が許可されない、パイプラインが無効、または交渉したタイムアウトが
    /// 残らない場合は接続を閉じる印を付ける。
    pub fn on_headers(
        &mut self,
        headers: &HeadersComplete,
        pipelining: usize,
        config: &TimeoutConfig,
    ) {
        if headers.informational {
            return;
        }
        self.blocking = false;
        if !headers.keep_alive || pipelining == 0 {
            self.reset = true;
            return;
        }
        match config.negotiate_keep_alive(headers.keep_alive_timeout) {
            Some(timeout) => self.idle_timeout = Some(timeout),
            None => self.reset = true,
        }
    }
}

/// レスポンス完了後の動作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// 同じリクエストの最終レスポンスを待つ (情報レスポンスの後)
    Continue,
    /// 次のリクエストに進む
    Advance,
    /// 接続を閉じる
    Close,
}

/// レスポンス完了後の動作を決める
///
/// `running` はこのレスポンスを除いた処理中のリクエスト数。
pub fn next_action(
    complete: &MessageComplete,
    write: &WriteState,
    read: &ReadState,
    running: usize,
) -> NextAction {
    if complete.informational {
        return NextAction::Continue;
    }
    // ボディ送信中にレスポンスが完了した場合は送信を続けられない
    if write.is_writing() {
        return NextAction::Close;
    }
    if !complete.keep_alive {
        return NextAction::Close;
    }
    if (write.is_reset() || read.is_reset()) && running == 0 {
        return NextAction::Close;
    }
    NextAction::Advance
}

/// ソケットが再利用できない印が付いているか
pub fn is_socket_reset(write: &WriteState, read: &ReadState) -> bool {
    write.is_reset() || read.is_reset()
}
