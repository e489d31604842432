//! Ports - 抽象化レイヤー
//!
//! dispatch のコアは、この trait だけを通して外部とやり取りします。
//! - **Session**: transport 層のセッション
//! - **EventSink**: dispatch イベントの出力先

pub mod event_sink;
pub mod session;

pub use self::event_sink::EventSink;
pub use self::session::{Attachment, SEQUENCE_KEY, Session, SessionRef};
