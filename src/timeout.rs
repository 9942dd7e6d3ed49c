//! フェーズ別タイムアウトの状態機械 (Sans I/O)
//!
//! ソケットごとに有効なタイマーは常に 1 つだけ。フェーズや期限を変えると
//! 前のタイマーは置き換えられる。時刻は呼び出し側が渡す。

use std::time::{Duration, Instant};

use crate::error::Error;
use crate::limits::TimeoutConfig;

/// タイマーのフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// レスポンスヘッダー待ち
    Headers,
    /// レスポンスボディ受信中
    Body,
    /// アイドル (処理中のリクエストなし)
    Idle,
}

/// 期限切れ時点のソケットの状況
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutContext {
    /// 送信中かどうか
    pub writing: bool,
    /// 書き込みバッファが溢れていて drain 待ちかどうか
    pub need_drain: bool,
    /// 処理中のリクエスト数
    pub running: usize,
    /// パーサーが一時停止中かどうか
    pub paused: bool,
}

/// 期限切れ時の動作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutAction {
    /// 致命的エラーでソケットを閉じる
    Fail(Error),
    /// アイドルのためソケットを閉じる (エラーではない)
    CloseIdle,
    /// 今回は無視して同じ長さで張り直した
    Rearmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timer {
    phase: TimeoutPhase,
    duration: Duration,
    deadline: Instant,
}

/// タイムアウト監視
#[derive(Debug, Clone)]
pub struct TimeoutSupervisor {
    config: TimeoutConfig,
    timer: Option<Timer>,
}

impl TimeoutSupervisor {
    /// 新しい監視を作成
    pub fn new(config: TimeoutConfig) -> Self {
        Self {
            config,
            timer: None,
        }
    }

    /// 設定を取得
    pub fn config(&self) -> &TimeoutConfig {
        &self.config
    }

    /// 現在のフェーズ
    pub fn phase(&self) -> Option<TimeoutPhase> {
        self.timer.map(|t| t.phase)
    }

    /// 現在の期限
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.map(|t| t.deadline)
    }

    /// タイマーを張る
    ///
    /// 長さが 0 の場合はタイマーを解除する。
    pub fn arm(&mut self, phase: TimeoutPhase, duration: Duration, now: Instant) {
        if duration.is_zero() {
            self.timer = None;
            return;
        }
        self.timer = Some(Timer {
            phase,
            duration,
            deadline: now + duration,
        });
    }

    /// ヘッダー待ちタイマーを張る
    pub fn arm_headers(&mut self, now: Instant) {
        self.arm(TimeoutPhase::Headers, self.config.headers_timeout, now);
    }

    /// ボディ受信タイマーを張る
    pub fn arm_body(&mut self, now: Instant) {
        self.arm(TimeoutPhase::Body, self.config.body_timeout, now);
    }

    /// アイドルタイマーを張る
    ///
    /// `timeout` は keep-alive の交渉結果。`None` なら設定のデフォルト値を使う。
    pub fn arm_idle(&mut self, timeout: Option<Duration>, now: Instant) {
        let duration = timeout.unwrap_or(self.config.keep_alive_timeout);
        self.arm(TimeoutPhase::Idle, duration, now);
    }

    /// 進捗があったので期限を延ばす
    pub fn refresh(&mut self, now: Instant) {
        if let Some(timer) = &mut self.timer {
            timer.deadline = now + timer.duration;
        }
    }

    /// 指定フェーズのタイマーであれば期限を延ばす
    pub fn refresh_phase(&mut self, phase: TimeoutPhase, now: Instant) {
        if self.phase() == Some(phase) {
            self.refresh(now);
        }
    }

    /// タイマーを解除
    pub fn clear(&mut self) {
        self.timer = None;
    }

    /// 期限切れを判定する
    ///
    /// 期限前またはタイマーがない場合は `None`。
    pub fn fire(&mut self, now: Instant, ctx: TimeoutContext) -> Option<TimeoutAction> {
        let timer = self.timer?;
        if now < timer.deadline {
            return None;
        }

        let action = match timer.phase {
            TimeoutPhase::Headers => {
                // 送信中で後続のリクエストもない場合は、送信完了まで待つ
                if ctx.writing && !ctx.need_drain && ctx.running <= 1 {
                    TimeoutAction::Rearmed
                } else {
                    TimeoutAction::Fail(Error::HeadersTimeout)
                }
            }
            TimeoutPhase::Body => {
                if ctx.paused {
                    TimeoutAction::Rearmed
                } else {
                    TimeoutAction::Fail(Error::BodyTimeout)
                }
            }
            TimeoutPhase::Idle => TimeoutAction::CloseIdle,
        };

        if action == TimeoutAction::Rearmed {
            self.refresh(now);
        } else {
            self.timer = None;
        }
        Some(action)
    }
}
