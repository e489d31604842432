//! EventSink port - where dispatch events go
//!
//! - `TracingEventSink`: forwards to tracing (default)
//! - `RecordingEventSink`: keeps events in memory (tests, diagnostics)

use crate::domain::DispatchEvent;

/// Receives dispatch events.
///
/// `emit` is called inline on transport threads and pool workers, so it
/// must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DispatchEvent);
}
