//! Message-box protocol engine.
//!
//! Inbound: a drain routine called from interrupt context that empties
//! every pending channel FIFO and hands each word to the registered sink.
//! Outbound: a non-blocking send gated on the hardware FIFO fill level.

use tracing::trace;

use winglet_chip::msgbox::{rd_irq_pend_shift, CHANNELS, FIFO_DEPTH, RD_IRQ_PEND_MASK};

use crate::error::{DspError, Result};
use crate::hal::DspHal;

/// Consumer of inbound message-box words.
///
/// Invoked from interrupt context: implementations must not block and must
/// swallow their own internal errors (log and drop the word).
pub trait MailboxSink: Send + Sync {
    /// One word arrived on `channel`.
    fn on_message(&self, channel: usize, word: u32);
}

/// Drain every pending inbound channel, feeding words to `sink`.
///
/// Channels are fully emptied before their pending bit is cleared; the
/// hardware only honors a pending-clear on an empty FIFO. The fill level is
/// re-read after every word so messages arriving mid-drain are picked up in
/// the same pass. With no sink attached, words are still drained and
/// dropped so the interrupt line deasserts.
pub fn drain_inbound(hal: &dyn DspHal, sink: Option<&dyn MailboxSink>) {
    let status = hal.inbound_irq_status();
    for channel in 0..CHANNELS {
        if status & (RD_IRQ_PEND_MASK << rd_irq_pend_shift(channel)) == 0 {
            continue;
        }
        let mut drained = 0u32;
        while hal.inbound_fifo_level(channel) > 0 {
            let word = hal.inbound_fifo_read(channel);
            if let Some(sink) = sink {
                sink.on_message(channel, word);
            }
            drained += 1;
        }
        hal.inbound_clear_pending(channel);
        trace!(channel, drained, "drained inbound mailbox channel");
    }
}

/// Send one word on an outbound channel.
///
/// # Errors
///
/// Returns [`DspError::MailboxFull`] without touching the hardware when the
/// FIFO has no free slot. Never waits.
pub fn send(hal: &dyn DspHal, channel: usize, value: u32) -> Result<()> {
    if hal.outbound_fifo_level(channel) >= FIFO_DEPTH {
        return Err(DspError::MailboxFull { channel });
    }
    hal.outbound_fifo_write(channel, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::hal::mock::MockHal;

    #[derive(Default)]
    struct Collect {
        words: Mutex<Vec<(usize, u32)>>,
    }

    impl MailboxSink for Collect {
        fn on_message(&self, channel: usize, word: u32) {
            self.words.lock().unwrap().push((channel, word));
        }
    }

    #[test]
    fn drains_all_pending_channels() {
        let hal = MockHal::new();
        hal.push_inbound(0, 0x10);
        hal.push_inbound(0, 0x11);
        hal.push_inbound(3, 0x30);
        let sink = Collect::default();
        drain_inbound(&hal, Some(&sink));
        assert_eq!(
            *sink.words.lock().unwrap(),
            vec![(0, 0x10), (0, 0x11), (3, 0x30)]
        );
        assert_eq!(hal.inbound_irq_status(), 0);
    }

    #[test]
    fn no_sink_still_drains() {
        let hal = MockHal::new();
        hal.push_inbound(1, 0xAB);
        drain_inbound(&hal, None);
        assert_eq!(hal.inbound_fifo_level(1), 0);
        assert_eq!(hal.inbound_irq_status(), 0);
    }

    #[test]
    fn idle_channels_untouched() {
        let hal = MockHal::new();
        drain_inbound(&hal, None);
        assert_eq!(hal.inbound_irq_status(), 0);
    }

    #[test]
    fn send_succeeds_below_depth() {
        let hal = MockHal::new();
        hal.set_outbound_level(0, FIFO_DEPTH - 1);
        send(&hal, 0, 0xDEAD_BEEF).unwrap();
        assert_eq!(hal.sent(), vec![(0, 0xDEAD_BEEF)]);
    }

    #[test]
    fn send_fails_on_full_fifo_without_writing() {
        let hal = MockHal::new();
        hal.set_outbound_level(2, FIFO_DEPTH);
        let err = send(&hal, 2, 0x1234);
        assert!(matches!(err, Err(DspError::MailboxFull { channel: 2 })));
        assert!(hal.sent().is_empty());
    }
}
