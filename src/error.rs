use std::fmt;

/// エラーが発生したフェーズ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// リクエスト送信中
    Transmit,
    /// レスポンスヘッダー待ち
    Headers,
    /// レスポンスボディ受信中
    Body,
    /// アイドル (処理中のリクエストなし)
    Idle,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Transmit => write!(f, "transmit"),
            Phase::Headers => write!(f, "headers"),
            Phase::Body => write!(f, "body"),
            Phase::Idle => write!(f, "idle"),
        }
    }
}

/// トランスポートエラー
///
/// この層はリトライしない。分類して呼び出し側に返すだけ。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// 宣言された Content-Length と実際のボディ長が一致しない (strict モード)
    ContentLengthMismatch { declared: u64, actual: u64 },
    /// レスポンスヘッダーのバイト数が上限を超えた
    HeadersOverflow { size: usize, limit: usize },
    /// ヘッダー数超過
    TooManyHeaders { count: usize, limit: usize },
    /// ヘッダー待ちタイムアウト
    HeadersTimeout,
    /// ボディ受信タイムアウト
    BodyTimeout,
    /// 不正なチャンクサイズ行
    InvalidChunkSize(String),
    /// チャンクサイズ行が長すぎる
    ChunkLineTooLong { size: usize, limit: usize },
    /// プロトコル違反 (不正なステータス行、不正なヘッダーなど)
    InvalidData(String),
    /// レスポンスサイズが上限を超えた
    ResponseExceededMaxSize { size: u64, limit: u64 },
    /// 受信したボディ長が Content-Length と一致しない
    ResponseContentLengthMismatch { expected: u64, actual: u64 },
    /// レスポンス完了前に相手が接続を閉じた
    SocketClosed,
    /// 呼び出し側または上流からの中断
    Aborted(Option<String>),
}

impl Error {
    /// タイムアウトかどうか
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::HeadersTimeout | Error::BodyTimeout)
    }

    /// 中断かどうか
    ///
    /// 中断はサーバー側の障害ではないため、呼び出し側はこれで区別する。
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Aborted(_))
    }

    /// プロトコル違反かどうか
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::InvalidChunkSize(_)
                | Error::ChunkLineTooLong { .. }
                | Error::InvalidData(_)
                | Error::TooManyHeaders { .. }
                | Error::SocketClosed
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ContentLengthMismatch { declared, actual } => write!(
                f,
                "request body length does not match content-length header: declared {}, actual {}",
                declared, actual
            ),
            Error::HeadersOverflow { size, limit } => {
                write!(f, "headers overflow: {} > {}", size, limit)
            }
            Error::TooManyHeaders { count, limit } => {
                write!(f, "too many headers: {} > {}", count, limit)
            }
            Error::HeadersTimeout => write!(f, "headers timeout"),
            Error::BodyTimeout => write!(f, "body timeout"),
            Error::InvalidChunkSize(line) => write!(f, "invalid chunk size: {}", line),
            Error::ChunkLineTooLong { size, limit } => {
                write!(f, "chunk line too long: {} > {}", size, limit)
            }
            Error::InvalidData(msg) => write!(f, "invalid data: {}", msg),
            Error::ResponseExceededMaxSize { size, limit } => {
                write!(f, "response exceeded max size: {} > {}", size, limit)
            }
            Error::ResponseContentLengthMismatch { expected, actual } => write!(
                f,
                "response body length does not match content-length header: expected {}, actual {}",
                expected, actual
            ),
            Error::SocketClosed => write!(f, "other side closed"),
            Error::Aborted(Some(reason)) => write!(f, "request aborted: {}", reason),
            Error::Aborted(None) => write!(f, "request aborted"),
        }
    }
}

impl std::error::Error for Error {}

/// 非致命的な警告
///
/// lenient モードの Content-Length 不一致など、送信を止めない状態を横流しする。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    /// 宣言された Content-Length と実際のボディ長が一致しない
    ContentLengthMismatch { declared: u64, actual: u64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::ContentLengthMismatch { declared, actual } => write!(
                f,
                "request body length does not match content-length header: declared {}, actual {}",
                declared, actual
            ),
        }
    }
}
