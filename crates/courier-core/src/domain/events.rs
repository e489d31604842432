//! Events - what the dispatch machinery reports
//!
//! Events are emitted through the [`EventSink`](crate::ports::EventSink) port
//! whenever the dispatcher has to handle something on the caller's behalf
//! (drop a message, swallow a handler fault, skip a closed session).

use serde::{Deserialize, Serialize};

use super::ids::{SequencerId, SessionId};
use super::message::Opcode;

/// Severity attached to an event; maps 1:1 onto tracing levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLevel {
    Debug,
    Warn,
    Error,
}

/// How a handler failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The handler returned `Err`.
    Error,
    /// The handler panicked.
    Panic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// No handler is bound to the opcode; the session was closed.
    UnknownOpcode { session: SessionId, opcode: Opcode },

    /// A handler failed. The fault stops at the task boundary.
    HandlerFault {
        session: SessionId,
        opcode: Opcode,
        sequencer: Option<SequencerId>,
        kind: FaultKind,
        reason: String,
    },

    /// The task was skipped because its session was already closed.
    SkippedClosedSession { session: SessionId, opcode: Opcode },
}

impl DispatchEvent {
    pub fn level(&self) -> EventLevel {
        match self {
            DispatchEvent::UnknownOpcode { .. } => EventLevel::Warn,
            DispatchEvent::HandlerFault {
                kind: FaultKind::Error,
                ..
            } => EventLevel::Warn,
            DispatchEvent::HandlerFault {
                kind: FaultKind::Panic,
                ..
            } => EventLevel::Error,
            DispatchEvent::SkippedClosedSession { .. } => EventLevel::Debug,
        }
    }

    pub fn session(&self) -> SessionId {
        match self {
            DispatchEvent::UnknownOpcode { session, .. }
            | DispatchEvent::HandlerFault { session, .. }
            | DispatchEvent::SkippedClosedSession { session, .. } => *session,
        }
    }
}
