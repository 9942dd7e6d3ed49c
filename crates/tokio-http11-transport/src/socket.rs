//! バッファ付きソケット書き込み
//!
//! [`SocketWriter::write`] はバッファに積むだけで、戻り値でまだ書けるかを返す。
//! 実際の送信は [`SocketWriter::drain`] で行う。送信側が待つのは drain だけ。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// 書き込みバッファのデフォルトの上限 (64 KiB)
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

/// drain 待ちの状態
///
/// 送信中の書き込み側を借用せずに読み取り側から参照するために共有する。
#[derive(Debug, Clone, Default)]
pub struct Backpressure(Arc<AtomicBool>);

impl Backpressure {
    /// drain 待ちかどうか
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

/// バッファ付きソケット書き込み
#[derive(Debug)]
pub struct SocketWriter<W> {
    inner: W,
    buf: BytesMut,
    high_water_mark: usize,
    backpressure: Backpressure,
    destroyed: bool,
}

impl<W: AsyncWrite + Unpin> SocketWriter<W> {
    /// 新しい書き込みを作成
    pub fn new(inner: W) -> Self {
        Self::with_high_water_mark(inner, DEFAULT_HIGH_WATER_MARK)
    }

    /// バッファの上限を指定して作成
    pub fn with_high_water_mark(inner: W, high_water_mark: usize) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            high_water_mark: high_water_mark.max(1),
            backpressure: Backpressure::default(),
            destroyed: false,
        }
    }

    /// バッファに積む
    ///
    /// バッファが上限に達したら `false` を返す。その場合は drain してから次を書く。
    pub fn write(&mut self, data: &[u8]) -> bool {
        self.buf.extend_from_slice(data);
        let ready = self.buf.len() < self.high_water_mark;
        if !ready {
            self.backpressure.set(true);
        }
        ready
    }

    /// 未送信のバイト数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// drain 待ちかどうか
    pub fn need_drain(&self) -> bool {
        self.buf.len() >= self.high_water_mark
    }

    /// drain 待ちの状態の共有ハンドル
    pub fn backpressure(&self) -> Backpressure {
        self.backpressure.clone()
    }

    /// バッファを全て送信して flush する
    ///
    /// キャンセルされても送信済みの分だけバッファから取り除かれる。
    pub async fn drain(&mut self) -> std::io::Result<()> {
        if self.destroyed {
            return Err(std::io::ErrorKind::NotConnected.into());
        }
        while self.buf.has_remaining() {
            let n = self.inner.write_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::WriteZero.into());
            }
        }
        self.inner.flush().await?;
        self.backpressure.set(false);
        Ok(())
    }

    /// 未送信のバッファを捨てて書き込み側を閉じる
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.buf.clear();
        self.backpressure.set(false);
        // 相手が先に閉じている場合もあるのでエラーは無視する
        let _ = self.inner.shutdown().await;
    }

    /// 閉じられたかどうか
    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    /// 内部の書き込みを取り出す
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_and_drain() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut writer = SocketWriter::with_high_water_mark(client, 8);
        assert!(writer.write(b"abc"));
        assert!(!writer.write(b"defgh"));
        assert!(writer.need_drain());
        assert!(writer.backpressure().is_set());

        writer.drain().await.unwrap();
        assert_eq!(writer.buffered(), 0);
        assert!(!writer.backpressure().is_set());

        let mut buf = [0u8; 8];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"abcdefgh");
    }

    #[tokio::test]
    async fn test_destroy() {
        let (client, mut server) = tokio::io::duplex(1024);
        let mut writer = SocketWriter::new(client);
        writer.write(b"dropped");
        writer.destroy().await;
        assert!(writer.is_destroyed());
        assert!(writer.drain().await.is_err());

        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
