//! Message handlers attached to a core.
//!
//! Messages go to the `log` facade first and then to every registered
//! handler, synchronously, on the calling thread.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Severity of a core message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Debugging output.
    Debug,
    /// Informational output.
    Information,
    /// Something unexpected that does not stop processing.
    Warning,
    /// A serious error.
    Critical,
    /// An unrecoverable error.
    Fatal,
}

impl MessageType {
    fn level(self) -> log::Level {
        match self {
            MessageType::Debug => log::Level::Debug,
            MessageType::Information => log::Level::Info,
            MessageType::Warning => log::Level::Warn,
            MessageType::Critical | MessageType::Fatal => log::Level::Error,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Debug => "Debug",
            MessageType::Information => "Information",
            MessageType::Warning => "Warning",
            MessageType::Critical => "Critical",
            MessageType::Fatal => "Fatal",
        };
        write!(f, "{}", name)
    }
}

/// A registered message handler.
pub type LogHandler = Arc<dyn Fn(MessageType, &str) + Send + Sync>;

/// Handle identifying a registered handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogHandle(u64);

/// Handler list owned by a core.
#[derive(Default)]
pub(crate) struct LogHandlers {
    handlers: RwLock<Vec<(LogHandle, LogHandler)>>,
    next_id: AtomicU64,
}

impl LogHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: LogHandler) -> LogHandle {
        let handle = LogHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((handle, handler));
        handle
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn remove(&self, handle: LogHandle) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != handle);
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn dispatch(&self, message_type: MessageType, message: &str) {
        log::log!(target: "framegraph", message_type.level(), "{}", message);

        // Handlers may add or remove handlers, so call them outside the lock.
        let snapshot: Vec<LogHandler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in snapshot {
            handler(message_type, message);
        }
    }
}
