//! MemorySession - a Session for development and tests
//!
//! No socket behind it: `close()` just flips a flag and counts the call, which
//! is what tests and the demo CLI need.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::domain::SessionId;
use crate::ports::{Attachment, Session};

pub struct MemorySession {
    id: SessionId,
    attachments: Mutex<HashMap<String, Attachment>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::with_id(SessionId::generate())
    }

    pub fn with_id(id: SessionId) -> Self {
        Self {
            id,
            attachments: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        }
    }

    /// How many times `close()` was called, including repeated calls.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl Session for MemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn attachment(&self, key: &str) -> Option<Attachment> {
        self.attachments.lock().get(key).cloned()
    }

    fn set_attachment(&self, key: &str, value: Attachment) {
        self.attachments.lock().insert(key.to_string(), value);
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
