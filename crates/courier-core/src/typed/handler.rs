//! Handler traits
//!
//! # Two layers
//! - **Dyn**: `Handler` - object-safe, held by the registry as `Arc<dyn Handler>`
//! - **Typed**: `RequestHandler<R>` - receives the payload already decoded as `R`
//!
//! `TypedHandler<R, H>` bridges the two by decoding the JSON payload before
//! calling the typed handler.

use async_trait::async_trait;

use super::codec::JsonDescriptor;
use super::request::Request;
use crate::domain::Message;
use crate::error::HandlerError;
use crate::ports::SessionRef;

/// A handler for every message carrying one opcode.
///
/// Handlers run on pool workers. A handler attached through a sequencer never
/// runs concurrently with another task of the same session, but the same
/// handler instance is shared by all sessions, so it must be `Sync`.
///
/// Handlers should finish quickly: a slow handler holds a worker, and on a
/// sequenced session it holds back every later message of that session.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, session: &SessionRef, message: &Message) -> Result<(), HandlerError>;
}

/// Handler for a decoded request type.
///
/// # Example
/// ```ignore
/// struct LoginHandler;
///
/// #[async_trait]
/// impl RequestHandler<Login> for LoginHandler {
///     async fn handle(&self, session: &SessionRef, request: Login) -> Result<(), HandlerError> {
///         tracing::info!(session = %session.id(), "login");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    async fn handle(&self, session: &SessionRef, request: R) -> Result<(), HandlerError>;
}

/// Type erasure: `RequestHandler<R>` → `Handler`.
pub struct TypedHandler<R: Request, H: RequestHandler<R>> {
    handler: H,
    codec: JsonDescriptor<R>,
}

impl<R: Request, H: RequestHandler<R>> TypedHandler<R, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            codec: JsonDescriptor::new(),
        }
    }
}

#[async_trait]
impl<R: Request, H: RequestHandler<R>> Handler for TypedHandler<R, H> {
    async fn handle(&self, session: &SessionRef, message: &Message) -> Result<(), HandlerError> {
        let request = self.codec.decode(message.payload())?;
        self.handler.handle(session, request).await
    }
}
