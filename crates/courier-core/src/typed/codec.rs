//! Payload descriptors - the expected payload per opcode
//!
//! A descriptor is registered alongside each handler and describes what the
//! payload for that opcode should look like. The dispatcher itself never
//! consults it; decoders sitting between the transport and the dispatcher
//! use [`HandlerRegistry::descriptor`](super::HandlerRegistry::descriptor) to
//! reject malformed frames early.

use std::fmt;
use std::marker::PhantomData;

use super::request::Request;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("rejected: {0}")]
    Rejected(String),
}

/// Shape of the payload bound to one opcode.
pub trait PayloadDescriptor: Send + Sync + 'static {
    /// Human readable name of the expected payload type.
    fn name(&self) -> &str;

    /// Check that `payload` has the expected shape.
    fn validate(&self, payload: &[u8]) -> Result<(), CodecError>;
}

impl fmt::Debug for dyn PayloadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PayloadDescriptor").field(&self.name()).finish()
    }
}

/// Accepts any bytes. For opcodes whose payload is opaque to the server.
#[derive(Debug, Clone)]
pub struct RawDescriptor {
    name: &'static str,
    max_len: Option<usize>,
}

impl RawDescriptor {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            max_len: None,
        }
    }

    /// Reject payloads longer than `max_len` bytes.
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = Some(max_len);
        self
    }
}

impl PayloadDescriptor for RawDescriptor {
    fn name(&self) -> &str {
        self.name
    }

    fn validate(&self, payload: &[u8]) -> Result<(), CodecError> {
        match self.max_len {
            Some(max) if payload.len() > max => Err(CodecError::Rejected(format!(
                "{} payload is {} bytes, limit is {max}",
                self.name,
                payload.len()
            ))),
            _ => Ok(()),
        }
    }
}

/// Payload must be a JSON document decoding to `R`.
pub struct JsonDescriptor<R: Request> {
    _marker: PhantomData<fn() -> R>,
}

impl<R: Request> JsonDescriptor<R> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<R, CodecError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

impl<R: Request> Default for JsonDescriptor<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Request> PayloadDescriptor for JsonDescriptor<R> {
    fn name(&self) -> &str {
        R::NAME
    }

    fn validate(&self, payload: &[u8]) -> Result<(), CodecError> {
        self.decode(payload).map(|_| ())
    }
}
