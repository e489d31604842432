//! App - アプリケーション層
//!
//! このモジュールは、ports と typed を組み合わせて dispatch を実装します。
//!
//! # 主要コンポーネント
//! - **Registration / RegistrationTable**: handler 登録と registry の構築
//! - **Dispatcher**: (session, message) → pool か sequencer
//! - **Sequencer**: セッション単位の FIFO 実行
//! - **Task**: handler 呼び出し1回分（fault はここで止まる）
//! - **Courier**: 起動と停止

pub mod builder;
pub mod dispatcher;
pub mod lifecycle;
pub mod sequencer;
pub mod task;

// 主要な型を再エクスポート
pub use self::builder::{Registration, RegistrationSource, RegistrationTable, populate};
pub use self::dispatcher::{Dispatcher, Routing};
pub use self::lifecycle::Courier;
pub use self::sequencer::{Sequencer, SequencerState};
pub use self::task::{Task, TaskOutcome};
