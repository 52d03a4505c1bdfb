//! Bounded line buffer with broadcast for live log panels.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Default line cap for log panels.
pub const DEFAULT_LOG_LINES: usize = 1500;

struct Inner {
    lines: VecDeque<String>,
    cap: usize,
}

/// Ordered, size-bounded sequence of log lines.
///
/// Append-only; once `cap` is exceeded the oldest lines are dropped first.
/// Listeners can take a snapshot and then follow live appends.
pub struct LogBuffer {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<String>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LINES)
    }
}

impl LogBuffer {
    /// Create a buffer holding at most `cap` lines (minimum 1).
    #[must_use]
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        let (sender, _) = broadcast::channel(cap.min(4096));
        Self {
            inner: RwLock::new(Inner {
                lines: VecDeque::with_capacity(cap.min(256)),
                cap,
            }),
            sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append one line, evicting from the front if over capacity.
    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        {
            let mut inner = self.write();
            inner.lines.push_back(line.clone());
            while inner.lines.len() > inner.cap {
                inner.lines.pop_front();
            }
        }
        let _ = self.sender.send(line); // live listeners
    }

    /// Append a chunk that may contain several newline-separated lines.
    pub fn push_text(&self, text: &str) {
        for line in text.lines() {
            self.push(line);
        }
    }

    /// Drop every line. Used when the panel switches to another resource.
    pub fn clear(&self) {
        self.write().lines.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().lines.is_empty()
    }

    #[must_use]
    pub fn cap(&self) -> usize {
        self.read().cap
    }

    /// Copy of the current lines, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.read().lines.iter().cloned().collect()
    }

    /// Receiver for lines appended after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.sender.subscribe()
    }

    /// Stream that yields the current snapshot, then live appends.
    ///
    /// Lagged receivers skip what they missed rather than erroring.
    #[must_use]
    pub fn snapshot_plus_stream(&self) -> futures::stream::BoxStream<'static, String> {
        let (rx, history) = (self.subscribe(), self.snapshot());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_first_once_over_cap() {
        let buffer = LogBuffer::new(3);
        for n in 0..5 {
            buffer.push(format!("line {n}"));
        }
        assert_eq!(buffer.snapshot(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn never_exceeds_default_cap() {
        let buffer = LogBuffer::default();
        for n in 0..(DEFAULT_LOG_LINES + 250) {
            buffer.push(n.to_string());
            assert!(buffer.len() <= DEFAULT_LOG_LINES);
        }
        let lines = buffer.snapshot();
        assert_eq!(lines.len(), 1500);
        assert_eq!(lines.first().map(String::as_str), Some("250"));
        assert_eq!(lines.last().map(String::as_str), Some("1749"));
    }

    #[test]
    fn zero_cap_is_clamped() {
        let buffer = LogBuffer::new(0);
        buffer.push("a");
        buffer.push("b");
        assert_eq!(buffer.snapshot(), vec!["b"]);
        assert_eq!(buffer.cap(), 1);
    }

    #[test]
    fn push_text_splits_lines() {
        let buffer = LogBuffer::new(10);
        buffer.push_text("one\ntwo\r\nthree");
        assert_eq!(buffer.snapshot(), vec!["one", "two", "three"]);
        buffer.clear();
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn snapshot_then_live() {
        let buffer = LogBuffer::new(10);
        buffer.push("old");
        let mut stream = buffer.snapshot_plus_stream();
        buffer.push("new");

        assert_eq!(stream.next().await.as_deref(), Some("old"));
        assert_eq!(stream.next().await.as_deref(), Some("new"));
    }
}
