//! Fixed-depth message queue between the mailbox handler and readers.
//!
//! The producer side runs on the interrupt service thread and must never
//! block, so a full queue drops the new message rather than waiting.
//! Consumers block on a condition variable and re-check emptiness after
//! every wake.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};

use tracing::warn;

use crate::error::{DspError, Result};
use crate::message::AdsbMessage;

/// Queue capacity in messages.
pub const BRIDGE_DEPTH: usize = 32;

/// Emit a drop warning on the first drop and then once per this many drops.
const DROP_WARN_INTERVAL: u64 = 64;

struct Inner {
    queue: VecDeque<AdsbMessage>,
    interrupted: bool,
    dropped: u64,
}

/// Bounded FIFO bridging interrupt context to blocking consumers.
pub struct MessageBridge {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl MessageBridge {
    /// Create an empty bridge.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(BRIDGE_DEPTH),
                interrupted: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue one message and wake a consumer.
    ///
    /// Returns `false` if the queue was full; the message is dropped and a
    /// rate-limited warning logged.
    pub fn produce(&self, msg: AdsbMessage) -> bool {
        let mut inner = self.lock();
        if inner.queue.len() >= BRIDGE_DEPTH {
            if inner.dropped % DROP_WARN_INTERVAL == 0 {
                warn!(dropped = inner.dropped + 1, "message queue full, dropping");
            }
            inner.dropped += 1;
            return false;
        }
        inner.queue.push_back(msg);
        drop(inner);
        self.ready.notify_one();
        true
    }

    /// Dequeue the oldest message, blocking until one arrives.
    ///
    /// # Errors
    ///
    /// Returns [`DspError::Interrupted`] once [`Self::interrupt`] has been
    /// called, until the next [`Self::reset`].
    pub fn consume(&self) -> Result<AdsbMessage> {
        let mut inner = self.lock();
        loop {
            if inner.interrupted {
                return Err(DspError::Interrupted);
            }
            if let Some(msg) = inner.queue.pop_front() {
                return Ok(msg);
            }
            inner = self
                .ready
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Whether any message is waiting to be consumed.
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Abort all pending and future `consume` calls until the next reset.
    pub fn interrupt(&self) {
        self.lock().interrupted = true;
        self.ready.notify_all();
    }

    /// Clear queued messages and the interrupt flag for a new session.
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.queue.clear();
        inner.interrupted = false;
        inner.dropped = 0;
    }
}

impl Default for MessageBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn msg(tag: u8) -> AdsbMessage {
        let mut m = AdsbMessage::zeroed();
        m.payload[0] = tag;
        m
    }

    #[test]
    fn fifo_order_preserved() {
        let bridge = MessageBridge::new();
        assert!(bridge.produce(msg(1)));
        assert!(bridge.produce(msg(2)));
        assert_eq!(bridge.consume().unwrap().payload[0], 1);
        assert_eq!(bridge.consume().unwrap().payload[0], 2);
    }

    #[test]
    fn overflow_drops_newest() {
        let bridge = MessageBridge::new();
        for i in 0..BRIDGE_DEPTH {
            assert!(bridge.produce(msg(i as u8)));
        }
        assert!(!bridge.produce(msg(0xFF)), "33rd message must be dropped");
        for i in 0..BRIDGE_DEPTH {
            assert_eq!(bridge.consume().unwrap().payload[0], i as u8);
        }
        assert!(bridge.is_empty());
    }

    #[test]
    fn consume_blocks_until_produce() {
        let bridge = Arc::new(MessageBridge::new());
        let producer = Arc::clone(&bridge);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.produce(msg(7));
        });
        assert_eq!(bridge.consume().unwrap().payload[0], 7);
        handle.join().unwrap();
    }

    #[test]
    fn interrupt_aborts_blocked_consumer() {
        let bridge = Arc::new(MessageBridge::new());
        let waker = Arc::clone(&bridge);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.interrupt();
        });
        assert!(matches!(bridge.consume(), Err(DspError::Interrupted)));
        handle.join().unwrap();
    }

    #[test]
    fn interrupt_persists_until_reset() {
        let bridge = MessageBridge::new();
        bridge.interrupt();
        assert!(matches!(bridge.consume(), Err(DspError::Interrupted)));
        assert!(matches!(bridge.consume(), Err(DspError::Interrupted)));
        bridge.reset();
        bridge.produce(msg(1));
        assert!(bridge.consume().is_ok());
    }

    #[test]
    fn reset_discards_stale_messages() {
        let bridge = MessageBridge::new();
        bridge.produce(msg(1));
        bridge.reset();
        assert!(bridge.is_empty());
    }
}
