//! Session port - a logical connection owned by the transport layer
//!
//! The core never creates or tears down connections. It only needs to read
//! and write named attachments and to close a session that sent something
//! it cannot route.

use std::any::Any;
use std::sync::Arc;

use crate::domain::SessionId;

/// Reserved attachment slot holding the session's [`Sequencer`].
///
/// A session whose slot holds a sequencer gets strict FIFO execution;
/// everything else goes straight to the shared pool.
///
/// [`Sequencer`]: crate::app::Sequencer
pub const SEQUENCE_KEY: &str = "SEQUENCE_KEY";

/// A value stored on a session under a string key.
pub type Attachment = Arc<dyn Any + Send + Sync>;

/// Shared handle to a session.
pub type SessionRef = Arc<dyn Session>;

/// One transport-level connection.
///
/// Implementations must be safe to call from any thread: the dispatcher runs
/// on transport threads and handlers run on pool workers.
pub trait Session: Send + Sync {
    fn id(&self) -> SessionId;

    fn attachment(&self, key: &str) -> Option<Attachment>;

    fn set_attachment(&self, key: &str, value: Attachment);

    /// Close the underlying connection. Idempotent.
    fn close(&self);

    fn is_closed(&self) -> bool;
}
