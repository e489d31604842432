//! Typed - handler と payload descriptor の定義、registry
//!
//! - **Handler**: object-safe, registry に格納される
//! - **Request / RequestHandler**: opcode と payload 型を静的に対応付ける
//! - **PayloadDescriptor**: opcode ごとの期待ペイロード
//! - **HandlerRegistry**: opcode → (handler, descriptor)

pub mod codec;
pub mod handler;
pub mod registry;
pub mod request;

pub use self::codec::{CodecError, JsonDescriptor, PayloadDescriptor, RawDescriptor};
pub use self::handler::{Handler, RequestHandler, TypedHandler};
pub use self::registry::{HandlerRegistry, RegistryError};
pub use self::request::Request;
