//! HandlerRegistry - opcode → (handler, descriptor)
//!
//! Design:
//! - Built during startup (mutable).
//! - Used during runtime (immutable, shared behind `Arc`).
//!
//! No locking on lookup: once [`Courier::start`](crate::app::Courier::start)
//! hands the registry to the dispatcher, nobody can mutate it anymore.

use std::collections::HashMap;
use std::sync::Arc;

use super::codec::PayloadDescriptor;
use super::handler::Handler;
use crate::domain::Opcode;

/// Errors while building the registry. All of them are fatal at startup.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate handler registration for opcode {0}")]
    DuplicateRegistration(Opcode),

    #[error("factory for opcode {opcode} failed: {reason}")]
    FactoryFailed { opcode: Opcode, reason: String },

    #[error("missing handlers for opcodes {0:?}; these were expected but not registered")]
    MissingOpcodes(Vec<Opcode>),
}

struct Route {
    handler: Arc<dyn Handler>,
    descriptor: Arc<dyn PayloadDescriptor>,
}

#[derive(Default)]
pub struct HandlerRegistry {
    routes: HashMap<Opcode, Route>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Bind `opcode` to a handler and its payload descriptor.
    ///
    /// The first registration wins; a second one for the same opcode is an
    /// error and leaves the registry unchanged.
    pub fn register(
        &mut self,
        opcode: Opcode,
        handler: Arc<dyn Handler>,
        descriptor: Arc<dyn PayloadDescriptor>,
    ) -> Result<(), RegistryError> {
        if self.routes.contains_key(&opcode) {
            return Err(RegistryError::DuplicateRegistration(opcode));
        }
        self.routes.insert(
            opcode,
            Route {
                handler,
                descriptor,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, opcode: Opcode) -> Option<Arc<dyn Handler>> {
        self.routes.get(&opcode).map(|r| Arc::clone(&r.handler))
    }

    pub fn descriptor(&self, opcode: Opcode) -> Option<Arc<dyn PayloadDescriptor>> {
        self.routes.get(&opcode).map(|r| Arc::clone(&r.descriptor))
    }

    pub fn contains(&self, opcode: Opcode) -> bool {
        self.routes.contains_key(&opcode)
    }

    /// Registered opcodes in ascending order.
    pub fn opcodes(&self) -> Vec<Opcode> {
        let mut opcodes: Vec<Opcode> = self.routes.keys().copied().collect();
        opcodes.sort_unstable();
        opcodes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
