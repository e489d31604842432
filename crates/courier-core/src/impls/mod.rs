//! Impls - ports の実装（開発用・テスト用）
//!
//! - **MemorySession**: socket を持たない Session
//! - **TracingEventSink**: デフォルトの EventSink
//! - **RecordingEventSink**: イベントをメモリに溜める EventSink
//!
//! 本番の transport は自前の `Session` を別 crate で実装します。

pub mod event_sink;
pub mod memory_session;

pub use self::event_sink::{RecordingEventSink, TracingEventSink};
pub use self::memory_session::MemorySession;
