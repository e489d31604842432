//! Dispatcher - routes (session, message) pairs to handlers
//!
//! `handle()` is a plain function: transport threads call it directly and it
//! never waits on a handler. Execution happens on the shared worker pool,
//! either as an independent job (unordered) or through the session's
//! sequencer (ordered).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::sequencer::Sequencer;
use super::task::{Execution, Task};
use crate::domain::{DispatchEvent, Message, SequencerId};
use crate::error::DispatchError;
use crate::ports::{EventSink, SEQUENCE_KEY, SessionRef};
use crate::typed::{Handler, HandlerRegistry};
use crate::worker::WorkerPool;

/// Where a message went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "route", content = "sequencer")]
pub enum Routing {
    /// Submitted to the pool as an independent job.
    Unordered,
    /// Appended to the session's sequencer.
    Sequenced(SequencerId),
    /// No handler for the opcode; the session was closed.
    Dropped,
}

/// Cloneable; clones share the registry, the pool and the event sink.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    pool: WorkerPool,
    exec: Arc<Execution>,
}

impl Dispatcher {
    pub(crate) fn new(
        registry: Arc<HandlerRegistry>,
        pool: WorkerPool,
        events: Arc<dyn EventSink>,
        skip_closed_sessions: bool,
    ) -> Self {
        Self {
            registry,
            pool,
            exec: Arc::new(Execution {
                events,
                skip_closed_sessions,
            }),
        }
    }

    /// Route one inbound message.
    ///
    /// An unknown opcode closes the session and is reported through the
    /// event sink; it is not an error for the caller. The only error is
    /// [`DispatchError::PoolClosed`].
    pub fn handle(&self, session: &SessionRef, message: Message) -> Result<Routing, DispatchError> {
        let opcode = message.opcode();
        let Some(handler) = self.registry.lookup(opcode) else {
            session.close();
            self.exec.events.emit(DispatchEvent::UnknownOpcode {
                session: session.id(),
                opcode,
            });
            return Ok(Routing::Dropped);
        };

        self.submit(session, handler, message)
    }

    /// Run `handler` for `message`, ordered if the session carries a
    /// sequencer.
    pub fn submit(
        &self,
        session: &SessionRef,
        handler: Arc<dyn Handler>,
        message: Message,
    ) -> Result<Routing, DispatchError> {
        let task = Task::new(handler, Arc::clone(session), message, Arc::clone(&self.exec));

        match self.sequencer_of(session) {
            Some(sequencer) => {
                sequencer.enqueue(task)?;
                Ok(Routing::Sequenced(sequencer.id()))
            }
            None => {
                self.pool.submit(Box::new(task))?;
                Ok(Routing::Unordered)
            }
        }
    }

    /// A fresh sequencer on the shared pool. Attach it to the session before
    /// the first message that must be ordered.
    pub fn new_sequencer(&self) -> Sequencer {
        Sequencer::new(self.pool.clone())
    }

    /// Create a sequencer and store it under [`SEQUENCE_KEY`].
    ///
    /// Replaces whatever was in the slot. Tasks already appended to a
    /// previous sequencer still run on it.
    pub fn attach_sequencer(&self, session: &SessionRef) -> Sequencer {
        let sequencer = self.new_sequencer();
        session.set_attachment(SEQUENCE_KEY, Arc::new(sequencer.clone()));
        debug!(session = %session.id(), sequencer = %sequencer.id(), "sequencer attached");
        sequencer
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    fn sequencer_of(&self, session: &SessionRef) -> Option<Sequencer> {
        let attachment = session.attachment(SEQUENCE_KEY)?;
        match attachment.downcast_ref::<Sequencer>() {
            Some(sequencer) => Some(sequencer.clone()),
            None => {
                debug!(session = %session.id(), "attachment under SEQUENCE_KEY is not a sequencer; ignored");
                None
            }
        }
    }
}
