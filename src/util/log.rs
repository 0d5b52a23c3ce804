//! Log forwarding from the worker thread to the polling thread.
//!
//! Code running on the worker never emits through `tracing` directly. It
//! queues [`LogEntry`] values on a [`LogSender`]; the owning thread drains
//! them with [`LogQueue::flush`] each time it polls, which keeps their
//! original order.

use crossbeam_channel::{unbounded, Receiver, Sender};

/// Severity of a queued log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

/// A single queued log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

/// Producer half handed to code that may run off the polling thread.
#[derive(Debug, Clone)]
pub struct LogSender {
    tx: Sender<LogEntry>,
}

impl LogSender {
    fn send(&self, level: Level, message: String) {
        // The queue may already be gone if the owner was dropped mid-run.
        let _ = self.tx.send(LogEntry { level, message });
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.send(Level::Debug, message.into());
    }

    pub fn info(&self, message: impl Into<String>) {
        self.send(Level::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.send(Level::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(Level::Error, message.into());
    }
}

/// Consumer half, owned by the polling thread.
#[derive(Debug)]
pub struct LogQueue {
    tx: Sender<LogEntry>,
    rx: Receiver<LogEntry>,
}

impl LogQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        LogQueue { tx, rx }
    }

    /// Create a sender feeding this queue.
    pub fn sender(&self) -> LogSender {
        LogSender {
            tx: self.tx.clone(),
        }
    }

    /// Take every entry queued so far, oldest first.
    pub fn drain(&self) -> Vec<LogEntry> {
        self.rx.try_iter().collect()
    }

    /// Emit every queued entry through `tracing`, returning how many were emitted.
    pub fn flush(&self) -> usize {
        let mut count = 0;
        for entry in self.rx.try_iter() {
            match entry.level {
                Level::Debug => tracing::debug!("{}", entry.message),
                Level::Info => tracing::info!("{}", entry.message),
                Level::Warn => tracing::warn!("{}", entry.message),
                Level::Error => tracing::error!("{}", entry.message),
            }
            count += 1;
        }
        count
    }
}

impl Default for LogQueue {
    fn default() -> Self {
        Self::new()
    }
}
