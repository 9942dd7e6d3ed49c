//! リクエスト送信
//!
//! [`transmit`] は送信の状態機械 ([`Transmission`]) を駆動してソケットに書き込む。
//! 送信中に待つのはバッファの drain とボディの次のチャンクだけで、
//! どちらの間も中断シグナルを監視する。

use std::io;

use bytes::Bytes;
use futures::FutureExt;
use futures::stream::{BoxStream, StreamExt};
use shiguredo_http11_transport::{
    RequestDescriptor, Strategy, TransmitOptions, Transmission, Warning, WriteState, classify,
};
use tokio::io::{AsyncReadExt, AsyncWrite};

use crate::abort::AbortSignal;
use crate::body::Body;
use crate::error::Error;
use crate::socket::SocketWriter;

/// 送信の結果
#[derive(Debug)]
pub enum TransmitOutcome {
    /// 全て送信した
    Completed,
    /// 1 バイトも書く前に失敗した (ソケットはそのまま使える)
    Rejected(Error),
    /// 中断された
    Aborted(Option<String>),
    /// 送信途中で失敗した
    Failed(Error),
}

/// 送信中に起きたこと
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendEvent {
    /// ボディのチャンクを積んだ
    ///
    /// 一括で送るボディはソケットへの drain が終わってから通知する。
    BodySent(Bytes),
    /// 致命的でない問題
    Warning(Warning),
    /// リクエストを全て送信した
    RequestSent,
}

enum Stop {
    Aborted,
    Failed(Error),
}

impl From<io::Error> for Stop {
    fn from(e: io::Error) -> Self {
        Stop::Failed(Error::Io(e))
    }
}

impl From<shiguredo_http11_transport::Error> for Stop {
    fn from(e: shiguredo_http11_transport::Error) -> Self {
        Stop::Failed(Error::Http(e))
    }
}

/// 送信の設定
#[derive(Debug, Clone, Copy)]
pub struct TransmitContext<'a> {
    /// 送信オプション
    pub options: &'a TransmitOptions,
    /// 記述子に Host がない場合に使う Host
    pub default_host: Option<&'a str>,
    /// 中断シグナル
    pub signal: &'a AbortSignal,
}

/// リクエストを送信する
///
/// `on_event` には送信中の出来事が順に渡される。
/// 中断または途中の失敗では書き込み側の状態に閉じる印が付き、ボディのソースは drop される。
pub async fn transmit<W, F>(
    desc: &RequestDescriptor,
    body: Body,
    writer: &mut SocketWriter<W>,
    state: &mut WriteState,
    ctx: TransmitContext<'_>,
    mut on_event: F,
) -> TransmitOutcome
where
    W: AsyncWrite + Unpin,
    F: FnMut(SendEvent),
{
    if ctx.signal.is_aborted() {
        return TransmitOutcome::Aborted(ctx.signal.reason());
    }

    let plan = classify(&body.shape());
    let mut tx = match Transmission::prepare_with_host(
        desc,
        &plan,
        state,
        ctx.options,
        ctx.default_host,
    ) {
        Ok(tx) => tx,
        Err(e) => {
            tracing::debug!(method = %desc.method, path = %desc.path, error = %e, "request rejected");
            return TransmitOutcome::Rejected(Error::Http(e));
        }
    };
    tracing::debug!(
        method = %desc.method,
        path = %desc.path,
        strategy = ?tx.strategy(),
        content_length = ?tx.content_length(),
        "sending request"
    );
    emit_warnings(&mut tx, &mut on_event);

    match send_body(&mut tx, body, writer, ctx.signal, &mut on_event).await {
        Ok(()) => {
            tx.complete(state);
            tracing::debug!(
                framing = ?tx.framing(),
                bytes = tx.bytes_written(),
                reset = state.is_reset(),
                "request sent"
            );
            on_event(SendEvent::RequestSent);
            TransmitOutcome::Completed
        }
        Err(Stop::Aborted) => {
            state.abort();
            tracing::debug!("request aborted");
            TransmitOutcome::Aborted(ctx.signal.reason())
        }
        Err(Stop::Failed(e)) => {
            state.abort();
            tracing::debug!(error = %e, "request failed");
            TransmitOutcome::Failed(e)
        }
    }
}

fn emit_warnings<F: FnMut(SendEvent)>(tx: &mut Transmission, on_event: &mut F) {
    for warning in tx.take_warnings() {
        tracing::warn!(%warning, "lenient request body");
        on_event(SendEvent::Warning(warning));
    }
}

async fn drain<W: AsyncWrite + Unpin>(
    writer: &mut SocketWriter<W>,
    signal: &AbortSignal,
) -> Result<(), Stop> {
    tokio::select! {
        biased;
        _ = signal.aborted() => Err(Stop::Aborted),
        result = writer.drain() => Ok(result?),
    }
}

async fn send_body<W, F>(
    tx: &mut Transmission,
    body: Body,
    writer: &mut SocketWriter<W>,
    signal: &AbortSignal,
    on_event: &mut F,
) -> Result<(), Stop>
where
    W: AsyncWrite + Unpin,
    F: FnMut(SendEvent),
{
    let mut out = Vec::new();
    match (tx.strategy(), body) {
        (Strategy::Fixed, Body::Fixed(bytes)) => {
            tx.write_fixed(&bytes, &mut out)?;
            emit_warnings(tx, on_event);
            writer.write(&out);
            drain(writer, signal).await?;
            on_event(SendEvent::BodySent(bytes));
            return Ok(());
        }
        (Strategy::SizedLazy, Body::Sized(mut sized)) => {
            let mut buf = Vec::new();
            tokio::select! {
                biased;
                _ = signal.aborted() => return Err(Stop::Aborted),
                result = sized.reader.read_to_end(&mut buf) => { result?; }
            }
            tx.write_fixed(&buf, &mut out)?;
            emit_warnings(tx, on_event);
            writer.write(&out);
            drain(writer, signal).await?;
            if !buf.is_empty() {
                on_event(SendEvent::BodySent(Bytes::from(buf)));
            }
            return Ok(());
        }
        (Strategy::Stream | Strategy::AsyncSequence, body) => {
            let stream = match body {
                Body::Stream(s) => s.into_stream(),
                Body::Sequence(s) => s,
                Body::Form(form) => form.into_stream(),
                other => {
                    return Err(Stop::Failed(Error::Http(
                        shiguredo_http11_transport::Error::InvalidData(format!(
                            "body {:?} is not a stream",
                            other
                        )),
                    )));
                }
            };
            send_stream(tx, stream, writer, signal, on_event).await?;
        }
        // 空バッファは Empty に分類される
        (_, _) => {
            tx.write_empty(&mut out);
            writer.write(&out);
        }
    }
    drain(writer, signal).await
}

async fn send_stream<W, F>(
    tx: &mut Transmission,
    mut stream: BoxStream<'static, io::Result<Bytes>>,
    writer: &mut SocketWriter<W>,
    signal: &AbortSignal,
    on_event: &mut F,
) -> Result<(), Stop>
where
    W: AsyncWrite + Unpin,
    F: FnMut(SendEvent),
{
    let mut out = Vec::new();
    loop {
        if signal.is_aborted() {
            return Err(Stop::Aborted);
        }
        let item = match stream.next().now_or_never() {
            Some(item) => item,
            None => {
                // 次のチャンクを待つ前に積んだ分を送る
                drain(writer, signal).await?;
                tokio::select! {
                    biased;
                    _ = signal.aborted() => return Err(Stop::Aborted),
                    item = stream.next() => item,
                }
            }
        };
        let Some(chunk) = item else {
            break;
        };
        let chunk = chunk?;
        tx.write_chunk(&chunk, &mut out)?;
        emit_warnings(tx, on_event);
        if out.is_empty() {
            continue;
        }
        tracing::trace!(len = chunk.len(), "request body chunk");
        let ready = writer.write(&out);
        out.clear();
        on_event(SendEvent::BodySent(chunk));
        if !ready {
            drain(writer, signal).await?;
        }
    }
    tx.finish(&mut out)?;
    emit_warnings(tx, on_event);
    writer.write(&out);
    Ok(())
}
