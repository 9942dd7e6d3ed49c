//! # shiguredo_http11_transport
//!
//! 依存なしの HTTP/1.1 クライアントトランスポート (Sans I/O)
//!
//! ## 特徴
//!
//! - **依存なし**: 標準ライブラリのみ使用
//! - **Sans I/O**: バイト列の生成と解釈だけを行い、I/O とタイマーは呼び出し側が持つ
//! - **ストリーミング**: リクエストボディはチャンク単位で送信し、レスポンスはイベント単位で受信する
//!
//! ## 使い方
//!
//! ```rust
//! use shiguredo_http11_transport::{
//!     BodyShape, Event, RequestDescriptor, ResponseContext, ResponseParser, TransmitOptions,
//!     Transmission, WriteState, classify,
//! };
//!
//! // リクエストを送信用バイト列にする
//! let desc = RequestDescriptor::new("GET", "/").host("example.com");
//! let mut state = WriteState::new();
//! let mut tx = Transmission::prepare(
//!     &desc,
//!     &classify(&BodyShape::Empty),
//!     &mut state,
//!     &TransmitOptions::default(),
//! )
//! .unwrap();
//! let mut out = Vec::new();
//! tx.write_empty(&mut out);
//! tx.complete(&mut state);
//! // out を送信...
//!
//! // レスポンスをパース
//! let mut parser = ResponseParser::new();
//! parser.expect(ResponseContext::new("GET"));
//! let events = parser
//!     .feed(b"HTTP/1.1 204 No Content\r\n\r\n")
//!     .unwrap();
//! assert!(matches!(events.last(), Some(Event::MessageComplete(_))));
//! ```

mod body;
mod error;
mod lifecycle;
mod limits;
pub mod multipart;
mod parser;
mod request;
mod timeout;
mod transmit;

pub use body::{BodyPlan, BodyShape, Strategy, classify};
pub use error::{Error, Phase, Warning};
pub use lifecycle::{NextAction, ReadState, is_socket_reset, next_action};
pub use limits::{ParserLimits, TimeoutConfig, TransmitOptions};
pub use parser::{
    Event, HeadersComplete, MessageComplete, ResponseContext, ResponseFraming, ResponseHead,
    ResponseParser,
};
pub use request::{
    HeaderValue, RequestDescriptor, ResetPolicy, checks_content_length, expects_payload,
};
pub use timeout::{TimeoutAction, TimeoutContext, TimeoutPhase, TimeoutSupervisor};
pub use transmit::{Framing, Transmission, WriteState};
