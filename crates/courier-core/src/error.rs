use thiserror::Error;

use crate::worker::PoolError;
use crate::typed::{CodecError, RegistryError};

/// Errors returned to whoever hands a message to the dispatcher.
///
/// Unknown opcodes and handler faults are handled locally and never show up
/// here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("worker pool is closed")]
    PoolClosed,
}

impl From<PoolError> for DispatchError {
    fn from(_: PoolError) -> Self {
        // submit() only ever fails because the pool stopped accepting work
        DispatchError::PoolClosed
    }
}

/// What a handler reports when it cannot process a message.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("payload decode failed: {0}")]
    Decode(#[from] CodecError),

    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }
}

/// Startup failed; nothing was left running.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("worker pool: {0}")]
    Pool(#[from] PoolError),

    #[error("handler registry: {0}")]
    Registry(#[from] RegistryError),
}
