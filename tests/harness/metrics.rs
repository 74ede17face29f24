use std::sync::atomic::{AtomicUsize, Ordering};

/// Counters shared between the echo server's connection tasks.
#[derive(Debug, Default)]
pub struct Metrics {
    pub connections: AtomicUsize,
    pub messages: AtomicUsize,
    pub errors: AtomicUsize,
}

impl Metrics {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn messages(&self) -> usize {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::Relaxed)
    }
}
