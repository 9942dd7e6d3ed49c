//! HTTP/1.1 レスポンスパーサー (Sans I/O)
//!
//! 受信したバイト列を少しずつ与え、レスポンスのライフサイクルイベントを取り出す。
//! 読み取り境界がどこにあっても同じイベント列になる (ボディは連結して比較した場合)。

mod event;
mod head;
mod phase;
mod response;
mod syntax;

pub use event::{Event, HeadersComplete, MessageComplete, ResponseFraming};
pub use head::ResponseHead;
pub use response::{ResponseContext, ResponseParser};
