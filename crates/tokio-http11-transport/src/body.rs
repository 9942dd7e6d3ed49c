//! リクエストボディ
//!
//! [`Body`] はボディのソースを保持し、[`Body::shape`] で I/O なしに分類できる形を返す。

use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use shiguredo_http11_transport::BodyShape;
use shiguredo_http11_transport::multipart::{FormLayout, FormPartHead};
use tokio::io::AsyncRead;
use tokio::sync::mpsc;

/// リクエストボディ
pub enum Body {
    /// ボディなし
    Empty,
    /// メモリ上のバッファ
    Fixed(Bytes),
    /// 長さが分かっている遅延ソース
    Sized(SizedBody),
    /// [`Body::channel`] で作るプッシュ型ストリーム
    Stream(BodyStream),
    /// プル型の非同期シーケンス
    Sequence(BoxStream<'static, io::Result<Bytes>>),
    /// multipart/form-data
    Form(FormData),
}

impl std::fmt::Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Empty => f.write_str("Empty"),
            Body::Fixed(b) => f.debug_tuple("Fixed").field(&b.len()).finish(),
            Body::Sized(s) => f.debug_tuple("Sized").field(&s.len).finish(),
            Body::Stream(_) => f.write_str("Stream"),
            Body::Sequence(_) => f.write_str("Sequence"),
            Body::Form(form) => f.debug_tuple("Form").field(&form.layout).finish(),
        }
    }
}

impl Body {
    /// プッシュ型ストリームを作成
    ///
    /// 送信側が追いつかない間、[`BodySender::send`] は `capacity` 個を超えて積まずに待つ。
    pub fn channel(capacity: usize) -> (BodySender, Body) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (BodySender { tx }, Body::Stream(BodyStream { rx }))
    }

    /// 非同期シーケンスから作成
    pub fn sequence<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Body::Sequence(stream.boxed())
    }

    /// 長さの分かっている読み取りソースから作成
    pub fn sized<R>(len: u64, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Body::Sized(SizedBody {
            len,
            content_type: None,
            reader: Box::pin(reader),
        })
    }

    /// 分類用の形
    pub fn shape(&self) -> BodyShape {
        match self {
            Body::Empty => BodyShape::Empty,
            Body::Fixed(b) => BodyShape::Fixed {
                len: b.len() as u64,
            },
            Body::Sized(s) => BodyShape::SizedLazy {
                len: s.len,
                content_type: s.content_type.clone(),
            },
            Body::Stream(_) => BodyShape::Stream,
            Body::Sequence(_) => BodyShape::AsyncSequence,
            Body::Form(form) => BodyShape::Form(form.layout.clone()),
        }
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Fixed(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::Fixed(Bytes::from(v))
    }
}

impl From<&'static [u8]> for Body {
    fn from(s: &'static [u8]) -> Self {
        Body::Fixed(Bytes::from_static(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Fixed(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Fixed(Bytes::from(s))
    }
}

/// 長さの分かっている遅延ソース
pub struct SizedBody {
    pub(crate) len: u64,
    pub(crate) content_type: Option<String>,
    pub(crate) reader: Pin<Box<dyn AsyncRead + Send>>,
}

impl SizedBody {
    /// Content-Type を設定
    pub fn content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }
}

impl Body {
    /// 遅延ソースに Content-Type を設定
    ///
    /// 遅延ソース以外では何もしない。
    pub fn with_content_type(self, content_type: &str) -> Self {
        match self {
            Body::Sized(s) => Body::Sized(s.content_type(content_type)),
            other => other,
        }
    }
}

/// プッシュ型ストリームの受信側
pub struct BodyStream {
    rx: mpsc::Receiver<io::Result<Bytes>>,
}

impl BodyStream {
    pub(crate) fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        stream::unfold(self.rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }
}

/// プッシュ型ストリームの送信側
///
/// drop するとストリームの終端になる。
#[derive(Debug, Clone)]
pub struct BodySender {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

/// 送信が中断され、ボディがもう読まれない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BodyClosed;

impl std::fmt::Display for BodyClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request body closed")
    }
}

impl std::error::Error for BodyClosed {}

impl BodySender {
    /// チャンクを送る
    ///
    /// バッファが一杯の間は待つ。
    pub async fn send(&self, chunk: impl Into<Bytes>) -> Result<(), BodyClosed> {
        self.tx.send(Ok(chunk.into())).await.map_err(|_| BodyClosed)
    }

    /// エラーでストリームを終わらせる
    ///
    /// 送信は失敗として扱われ、ソケットは閉じられる。
    pub async fn fail(self, err: io::Error) {
        let _ = self.tx.send(Err(err)).await;
    }

    /// 受信側が既に閉じられているか
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

enum FormPartData {
    Bytes(Bytes),
    Stream(BoxStream<'static, io::Result<Bytes>>),
}

/// multipart/form-data ボディ
pub struct FormData {
    layout: FormLayout,
    data: Vec<FormPartData>,
}

impl Default for FormData {
    fn default() -> Self {
        Self::new()
    }
}

impl FormData {
    /// ランダムな境界で作成
    pub fn new() -> Self {
        Self::with_layout(FormLayout::new(rand::random::<u64>()))
    }

    /// 境界を指定して作成
    pub fn with_boundary(boundary: &str) -> Self {
        Self::with_layout(FormLayout::with_boundary(boundary))
    }

    fn with_layout(layout: FormLayout) -> Self {
        Self {
            layout,
            data: Vec::new(),
        }
    }

    /// テキストフィールドを追加
    pub fn text(self, name: &str, value: &str) -> Self {
        self.bytes(FormPartHead::new(name), Bytes::from(value.to_string()))
    }

    /// バッファのパートを追加
    ///
    /// パートの長さはバッファの長さになる。
    pub fn bytes(mut self, head: FormPartHead, data: Bytes) -> Self {
        self.layout.push_part(head.len(data.len() as u64));
        self.data.push(FormPartData::Bytes(data));
        self
    }

    /// ストリームのパートを追加
    ///
    /// `head` に長さがなければボディ全体の長さも不明になる。
    pub fn stream<S>(mut self, head: FormPartHead, stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        self.layout.push_part(head);
        self.data.push(FormPartData::Stream(stream.boxed()));
        self
    }

    /// レイアウトを取得
    pub fn layout(&self) -> &FormLayout {
        &self.layout
    }

    /// 境界行、パートヘッダー、パートのボディ、終了境界を順に流すストリームにする
    pub(crate) fn into_stream(self) -> BoxStream<'static, io::Result<Bytes>> {
        let mut pieces: Vec<BoxStream<'static, io::Result<Bytes>>> = Vec::new();
        for (index, data) in self.data.into_iter().enumerate() {
            if let Some(header) = self.layout.part_header(index) {
                pieces.push(stream::once(async move { Ok(Bytes::from(header)) }).boxed());
            }
            match data {
                FormPartData::Bytes(b) => {
                    pieces.push(stream::once(async move { Ok(b) }).boxed());
                }
                FormPartData::Stream(s) => pieces.push(s),
            }
            pieces.push(
                stream::once(async { Ok(Bytes::from_static(FormLayout::PART_TERMINATOR)) })
                    .boxed(),
            );
        }
        let closing = Bytes::from(self.layout.closing());
        pieces.push(stream::once(async move { Ok(closing) }).boxed());
        stream::iter(pieces).flatten().boxed()
    }
}
