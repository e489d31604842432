//! Domain - ドメインモデル（メッセージ, ID, イベント）

pub mod events;
pub mod ids;
pub mod message;

pub use self::events::{DispatchEvent, EventLevel, FaultKind};
pub use self::ids::{SequencerId, SessionId};
pub use self::message::{Message, Opcode};
