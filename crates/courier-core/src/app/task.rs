//! Task - one (handler, session, message) invocation
//!
//! The task boundary is where handler faults stop: an `Err` or a panic is
//! turned into a `HandlerFault` event and the caller (pool worker or
//! sequencer drain) carries on.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::domain::{DispatchEvent, FaultKind, Message, Opcode, SequencerId};
use crate::ports::{EventSink, SessionRef};
use crate::typed::Handler;
use crate::worker::{Job, JobContext, JobReport};

/// Settings every task of one dispatcher shares.
pub(crate) struct Execution {
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) skip_closed_sessions: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Faulted,
    /// Session was already closed and the liveness check is enabled.
    Skipped,
}

impl TaskOutcome {
    pub(crate) fn report(self) -> JobReport {
        match self {
            TaskOutcome::Completed => JobReport {
                executed: 1,
                ..JobReport::default()
            },
            TaskOutcome::Faulted => JobReport {
                executed: 1,
                faulted: 1,
                ..JobReport::default()
            },
            TaskOutcome::Skipped => JobReport {
                skipped: 1,
                ..JobReport::default()
            },
        }
    }
}

pub struct Task {
    handler: Arc<dyn Handler>,
    session: SessionRef,
    message: Message,
    sequencer: Option<SequencerId>,
    exec: Arc<Execution>,
}

impl Task {
    pub(crate) fn new(
        handler: Arc<dyn Handler>,
        session: SessionRef,
        message: Message,
        exec: Arc<Execution>,
    ) -> Self {
        Self {
            handler,
            session,
            message,
            sequencer: None,
            exec,
        }
    }

    pub(crate) fn in_sequence(mut self, sequencer: SequencerId) -> Self {
        self.sequencer = Some(sequencer);
        self
    }

    pub fn opcode(&self) -> Opcode {
        self.message.opcode()
    }

    pub fn session(&self) -> &SessionRef {
        &self.session
    }

    pub fn sequencer(&self) -> Option<SequencerId> {
        self.sequencer
    }

    /// Run the handler to completion. Never panics and never returns the
    /// handler's error.
    pub async fn execute(self) -> TaskOutcome {
        let session_id = self.session.id();
        let opcode = self.message.opcode();

        if self.exec.skip_closed_sessions && self.session.is_closed() {
            self.exec.events.emit(DispatchEvent::SkippedClosedSession {
                session: session_id,
                opcode,
            });
            return TaskOutcome::Skipped;
        }

        let result = AssertUnwindSafe(self.handler.handle(&self.session, &self.message))
            .catch_unwind()
            .await;

        let (kind, reason) = match result {
            Ok(Ok(())) => return TaskOutcome::Completed,
            Ok(Err(err)) => (FaultKind::Error, err.to_string()),
            Err(panic) => (FaultKind::Panic, panic_message(panic.as_ref())),
        };

        self.exec.events.emit(DispatchEvent::HandlerFault {
            session: session_id,
            opcode,
            sequencer: self.sequencer,
            kind,
            reason,
        });
        TaskOutcome::Faulted
    }
}

/// Unordered path: the task itself is the pool job.
#[async_trait]
impl Job for Task {
    async fn run(self: Box<Self>, _ctx: &JobContext) -> JobReport {
        self.execute().await.report()
    }

    fn cancel(self: Box<Self>) -> u64 {
        1
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
