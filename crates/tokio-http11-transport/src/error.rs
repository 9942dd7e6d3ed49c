//! tokio_http11_transport エラー型

use std::fmt;
use std::net::SocketAddr;

use shiguredo_http11_transport::Phase;

/// tokio_http11_transport エラー
#[derive(Debug)]
pub enum Error {
    /// I/O エラー
    Io(std::io::Error),
    /// HTTP トランスポートエラー
    Http(shiguredo_http11_transport::Error),
    /// 接続が既に閉じられている
    ConnectionClosed,
}

impl Error {
    /// タイムアウトによるエラーかどうか
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_timeout())
    }

    /// 中断によるエラーかどうか
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_aborted())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Http(e) => write!(f, "HTTP error: {}", e),
            Error::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Http(e) => Some(e),
            Error::ConnectionClosed => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<shiguredo_http11_transport::Error> for Error {
    fn from(e: shiguredo_http11_transport::Error) -> Self {
        Error::Http(e)
    }
}

/// Result 型エイリアス
pub type Result<T> = std::result::Result<T, Error>;

/// エラー発生時の状況
///
/// ハンドラーの `on_error` に渡される。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorContext {
    /// エラーが起きたフェーズ
    pub phase: Phase,
    /// 接続先
    pub peer: Option<SocketAddr>,
    /// 利用者の中断によるものか
    pub aborted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let err = Error::from(shiguredo_http11_transport::Error::HeadersTimeout);
        assert!(err.is_timeout());
        assert!(!err.is_aborted());

        let err = Error::from(shiguredo_http11_transport::Error::Aborted(None));
        assert!(err.is_aborted());

        let err = Error::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(!err.is_timeout());
        assert!(err.to_string().starts_with("I/O error"));
    }
}
