//! tokio_http11_transport - Tokio integration for shiguredo_http11_transport
//!
//! Sans I/O の送信・パース・タイムアウトの状態機械を tokio のソケットとタイマーで駆動する。
//!
//! ## 特徴
//!
//! - **shiguredo_http11_transport ベース**: プロトコル判断は全て Sans I/O ライブラリが行う
//! - **ストリーミング**: リクエストボディはバックプレッシャー付きで逐次送信し、
//!   レスポンスはハンドラーのコールバックで逐次受け取る
//! - **任意のソケット**: `AsyncRead + AsyncWrite` なら TCP 以外でも使える
//!
//! ## 使い方
//!
//! ```ignore
//! use tokio_http11_transport::{
//!     Body, Connection, ConnectionOptions, Dispatched, RequestDescriptor, ResponseHandler,
//!     ResponseHead, ResumeHandle, Flow,
//! };
//!
//! struct Print;
//!
//! impl ResponseHandler for Print {
//!     fn on_headers(&mut self, head: &ResponseHead, _resume: &ResumeHandle) -> Flow {
//!         println!("{} {}", head.status_code, head.reason_phrase);
//!         Flow::Continue
//!     }
//!
//!     fn on_data(&mut self, chunk: &[u8]) -> Flow {
//!         print!("{}", String::from_utf8_lossy(chunk));
//!         Flow::Continue
//!     }
//! }
//!
//! let mut conn = Connection::connect("example.com:80", ConnectionOptions::default()).await?;
//! let outcome = conn
//!     .dispatch(RequestDescriptor::new("GET", "/"), Body::Empty, &mut Print)
//!     .await;
//! assert_eq!(outcome, Dispatched::Completed);
//! ```

mod abort;
mod body;
mod connection;
mod error;
mod handler;
mod socket;
mod timeout;
mod transmit;

pub use abort::{AbortLink, AbortSignal, ListenerId};
pub use body::{Body, BodyClosed, BodySender, BodyStream, FormData, SizedBody};
pub use connection::{Connection, ConnectionOptions, DEFAULT_READ_BUFFER_SIZE, Dispatched};
pub use error::{Error, ErrorContext, Result};
pub use handler::{Flow, ResponseHandler, ResumeHandle};
pub use socket::{Backpressure, DEFAULT_HIGH_WATER_MARK, SocketWriter};
pub use transmit::{SendEvent, TransmitContext, TransmitOutcome, transmit};

pub use shiguredo_http11_transport::multipart::FormPartHead;
pub use shiguredo_http11_transport::{
    HeaderValue, ParserLimits, Phase, RequestDescriptor, ResetPolicy, ResponseHead, TimeoutConfig,
    TransmitOptions, Warning,
};
