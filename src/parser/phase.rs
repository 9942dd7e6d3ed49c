//! パース状態の定義

/// ボディのパース状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BodyPhase {
    /// Content-Length の残りバイト待ち
    ContentLength { remaining: u64 },
    /// チャンクサイズ行待ち
    ChunkSize,
    /// チャンクデータ待ち
    ChunkData { remaining: u64 },
    /// チャンクデータ後の CRLF 待ち
    ChunkDataCrlf,
    /// トレーラー待ち
    Trailers,
    /// 接続が閉じるまでがボディ
    CloseDelimited,
}

/// パース状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParsePhase {
    /// ステータス行待ち
    AwaitingStatusLine,
    /// ヘッダー待ち
    AwaitingHeaders,
    /// ボディ受信中
    Body(BodyPhase),
    /// keep-alive なしで完了 (以降のバイトは読み捨てる)
    Complete,
    /// アップグレード済み (終端)
    Upgraded,
}
