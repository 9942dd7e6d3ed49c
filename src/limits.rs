use std::time::Duration;

/// パーサーの制限設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserLimits {
    /// レスポンスヘッダーの最大バイト数 (デフォルト: 16KB)
    ///
    /// ヘッダー名と値のバイト数を累積して判定する。
    pub max_header_size: usize,
    /// 最大ヘッダー数 (デフォルト: 100)
    pub max_headers_count: usize,
    /// レスポンスボディの最大バイト数 (デフォルト: 無制限)
    pub max_response_size: Option<u64>,
    /// 最大チャンクサイズ行長 (デフォルト: 1KB)
    ///
    /// チャンク拡張を含むため、16 進数のサイズだけより長くなりうる。
    pub max_chunk_line_size: usize,
}

impl Default for ParserLimits {
    fn default() -> Self {
        Self {
            max_header_size: 16 * 1024, // 16KB
            max_headers_count: 100,
            max_response_size: None,
            max_chunk_line_size: 1024,
        }
    }
}

impl ParserLimits {
    /// 制限なしの設定を作成
    pub fn unlimited() -> Self {
        Self {
            max_header_size: usize::MAX,
            max_headers_count: usize::MAX,
            max_response_size: None,
            max_chunk_line_size: usize::MAX,
        }
    }
}

/// 送信側の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransmitOptions {
    /// Content-Length 不一致をエラーにする (デフォルト: true)
    ///
    /// false の場合は警告を出して送信を続ける。
    pub strict_content_length: bool,
    /// パイプライン深さ (デフォルト: 1)
    ///
    /// 0 の場合は keep-alive を要求しない。
    pub pipelining: usize,
    /// 1 接続あたりの最大リクエスト数 (デフォルト: 無制限)
    pub max_requests_per_connection: Option<u64>,
}

impl Default for TransmitOptions {
    fn default() -> Self {
        Self {
            strict_content_length: true,
            pipelining: 1,
            max_requests_per_connection: None,
        }
    }
}

/// タイムアウト設定
///
/// `Duration::ZERO` はそのフェーズのタイマーを無効にする。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// ヘッダー待ちタイムアウト (デフォルト: 300 秒)
    pub headers_timeout: Duration,
    /// ボディ受信タイムアウト (デフォルト: 300 秒)
    pub body_timeout: Duration,
    /// サーバーが keep-alive ヒントを返さない場合のアイドルタイムアウト (デフォルト: 4 秒)
    pub keep_alive_timeout: Duration,
    /// keep-alive ヒントの上限 (デフォルト: 600 秒)
    pub keep_alive_max_timeout: Duration,
    /// keep-alive ヒントから差し引く余裕 (デフォルト: 2 秒)
    ///
    /// サーバーが閉じる直前の接続を再利用しないためのもの。
    pub keep_alive_timeout_threshold: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            headers_timeout: Duration::from_secs(300),
            body_timeout: Duration::from_secs(300),
            keep_alive_timeout: Duration::from_secs(4),
            keep_alive_max_timeout: Duration::from_secs(600),
            keep_alive_timeout_threshold: Duration::from_secs(2),
        }
    }
}

impl TimeoutConfig {
    /// サーバーの keep-alive ヒントからアイドルタイムアウトを決定
    ///
    /// ヒント - 閾値 を上限で切り詰める。結果が 0 以下になる場合は `None`
    /// (この接続は再利用しない) を返す。ヒントがない場合はデフォルト値。
    pub fn negotiate_keep_alive(&self, hint: Option<Duration>) -> Option<Duration> {
        match hint {
            Some(hint) => {
                let timeout = hint
                    .saturating_sub(self.keep_alive_timeout_threshold)
                    .min(self.keep_alive_max_timeout);
                if timeout.is_zero() {
                    None
                } else {
                    Some(timeout)
                }
            }
            None => Some(self.keep_alive_timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_keep_alive() {
        let config = TimeoutConfig::default();
        assert_eq!(
            config.negotiate_keep_alive(None),
            Some(Duration::from_secs(4))
        );
        assert_eq!(
            config.negotiate_keep_alive(Some(Duration::from_secs(5))),
            Some(Duration::from_secs(3))
        );
        // 閾値以下は再利用しない
        assert_eq!(config.negotiate_keep_alive(Some(Duration::from_secs(2))), None);
        assert_eq!(
            config.negotiate_keep_alive(Some(Duration::from_secs(10_000))),
            Some(Duration::from_secs(600))
        );
    }
}
