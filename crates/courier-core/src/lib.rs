//! courier-core
//!
//! 共有ワーカー pool 上での opcode ディスパッチと、セッション単位の順序保証。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（Opcode, Message, ids, events）
//! - **ports**: 抽象化レイヤー（Session, EventSink）
//! - **typed**: Handler trait, payload descriptor, HandlerRegistry
//! - **worker**: 名前付きワーカーの固定サイズ pool
//! - **app**: Dispatcher, Sequencer, 登録, Courier（起動・停止）
//! - **impls**: 実装（MemorySession, TracingEventSink など開発用）
//! - **config**: TOML 設定
//! - **observability**: pool のカウンタ
//! - **error**: dispatch / handler / startup のエラー型
//!
//! # 使用例
//! ```ignore
//! let table = RegistrationTable::new()
//!     .handler(1u16, || EchoHandler, || RawDescriptor::new("echo"));
//! let courier = Courier::start(table, &CourierConfig::default(), Arc::new(TracingEventSink))?;
//!
//! let session: SessionRef = Arc::new(MemorySession::new());
//! courier.dispatcher().attach_sequencer(&session);
//! courier.dispatcher().handle(&session, Message::new(1u16, "hello"))?;
//!
//! let report = courier.stop_default().await;
//! ```

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;
pub mod worker;
