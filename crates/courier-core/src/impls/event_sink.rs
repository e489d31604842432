use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::domain::{DispatchEvent, EventLevel};
use crate::ports::EventSink;

/// Default sink: every event becomes one tracing event at its level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: DispatchEvent) {
        match &event {
            DispatchEvent::UnknownOpcode { session, opcode } => {
                warn!(%session, %opcode, "no handler for opcode; session closed");
            }
            DispatchEvent::HandlerFault {
                session,
                opcode,
                sequencer,
                kind,
                reason,
            } => match event.level() {
                EventLevel::Error => error!(
                    %session,
                    %opcode,
                    sequencer = ?sequencer,
                    ?kind,
                    reason = %reason,
                    "handler panicked"
                ),
                _ => warn!(
                    %session,
                    %opcode,
                    sequencer = ?sequencer,
                    ?kind,
                    reason = %reason,
                    "handler failed"
                ),
            },
            DispatchEvent::SkippedClosedSession { session, opcode } => {
                debug!(%session, %opcode, "session closed; task skipped");
            }
        }
    }
}

/// Keeps every event in memory. Useful in tests and for diagnostics
/// endpoints.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DispatchEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DispatchEvent> {
        self.events.lock().clone()
    }

    pub fn count_at(&self, level: EventLevel) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.level() == level)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: DispatchEvent) {
        self.events.lock().push(event);
    }
}
