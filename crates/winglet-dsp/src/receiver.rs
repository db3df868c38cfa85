//! ADSB receiver device.
//!
//! The external surface of the driver: open/close drive the resource
//! controller, read drains the message bridge (or, in test mode, pulls a
//! bulk sample capture straight from the DMA buffer), poll reports
//! readiness. The mailbox callback lives here too: it fetches each
//! announced record from DSP data RAM, acknowledges it, and feeds the
//! bridge.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tracing::{debug, trace, warn};

use winglet_chip::mem::{self, SAMPLE_BUF_LEN};

use crate::allocator::MinorAllocator;
use crate::bridge::MessageBridge;
use crate::controller::{ControllerConfig, DspController, CONTROL_CHANNEL};
use crate::error::{DspError, Result};
use crate::firmware::DEFAULT_FIRMWARE;
use crate::hal::DspHal;
use crate::mailbox::{self, MailboxSink};
use crate::message::AdsbMessage;

/// Sentinel the firmware posts when a bulk sample capture has finished.
pub const CAPTURE_COMPLETE: u32 = 0xCA91_D04E;

/// Device slots one allocator hands out.
pub const MAX_DEVICES: usize = 4;

/// Receiver tunables.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Firmware blob loaded on first open.
    pub firmware: String,
    /// Resource controller tunables.
    pub controller: ControllerConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            firmware: DEFAULT_FIRMWARE.to_owned(),
            controller: ControllerConfig::default(),
        }
    }
}

#[derive(Default)]
struct CaptureState {
    done: bool,
    cancelled: bool,
}

/// Wakes a test-mode reader when the firmware reports capture completion.
#[derive(Default)]
struct CaptureGate {
    state: Mutex<CaptureState>,
    cv: Condvar,
}

impl CaptureGate {
    fn lock(&self) -> std::sync::MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self) {
        self.lock().done = false;
    }

    fn complete(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    fn cancel(&self) {
        self.lock().cancelled = true;
        self.cv.notify_all();
    }

    fn reset(&self) {
        let mut st = self.lock();
        st.done = false;
        st.cancelled = false;
    }

    fn wait(&self) -> Result<()> {
        let mut st = self.lock();
        loop {
            if st.cancelled {
                return Err(DspError::Interrupted);
            }
            if st.done {
                return Ok(());
            }
            st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// State shared with the interrupt path.
struct Shared {
    hal: Arc<dyn DspHal>,
    queue: MessageBridge,
    test_mode: AtomicBool,
    capture: CaptureGate,
}

impl Shared {
    /// Fetch one message record from DSP data RAM.
    fn fetch(&self, addr: u32) -> Result<AdsbMessage> {
        let (window, offset) = mem::locate_data(addr, AdsbMessage::WIRE_LEN)
            .ok_or(DspError::InvalidAddress { addr })?;
        let mut wire = [0u8; AdsbMessage::WIRE_LEN];
        self.hal.window_read(window, offset, &mut wire)?;
        Ok(AdsbMessage::from_wire(wire))
    }
}

impl MailboxSink for Shared {
    // Interrupt context: nothing here may block. Lookup failures are
    // logged and the word dropped; draining continues.
    fn on_message(&self, channel: usize, word: u32) {
        if channel != CONTROL_CHANNEL {
            trace!(channel, word, "ignoring word on unexpected channel");
            return;
        }
        if self.test_mode.load(Ordering::Acquire) && word == CAPTURE_COMPLETE {
            self.capture.complete();
            return;
        }
        match self.fetch(word) {
            Ok(msg) => {
                // Echo the record address back so the firmware can reuse
                // the slot, then hand the message to readers.
                if let Err(e) = mailbox::send(&*self.hal, CONTROL_CHANNEL, word) {
                    warn!(error = %e, "message ack not sent");
                }
                self.queue.produce(msg);
            }
            Err(e) => warn!(addr = word, error = %e, "dropping unreadable message"),
        }
    }
}

/// One ADSB receiver device instance.
pub struct AdsbReceiver {
    controller: DspController,
    shared: Arc<Shared>,
    config: ReceiverConfig,
    open_count: Mutex<usize>,
    minors: Arc<MinorAllocator>,
    minor: usize,
}

impl std::fmt::Debug for AdsbReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdsbReceiver")
            .field("minor", &self.minor)
            .field("enabled", &self.controller.is_enabled())
            .finish_non_exhaustive()
    }
}

impl AdsbReceiver {
    /// Create a receiver over `hal`, claiming a device slot from `minors`.
    ///
    /// # Errors
    ///
    /// Returns [`DspError::NoFreeMinor`] when every slot is taken.
    pub fn new(
        hal: Arc<dyn DspHal>,
        config: ReceiverConfig,
        minors: Arc<MinorAllocator>,
    ) -> Result<Self> {
        let minor = minors.acquire()?;
        let shared = Arc::new(Shared {
            hal: Arc::clone(&hal),
            queue: MessageBridge::new(),
            test_mode: AtomicBool::new(false),
            capture: CaptureGate::default(),
        });
        Ok(Self {
            controller: DspController::new(hal, config.controller.clone()),
            shared,
            config,
            open_count: Mutex::new(0),
            minors,
            minor,
        })
    }

    /// Assigned device minor number.
    #[must_use]
    pub fn minor(&self) -> usize {
        self.minor
    }

    /// Open the device. The first open brings the DSP up with a fresh
    /// message queue; further opens share the running session.
    ///
    /// # Errors
    ///
    /// Propagates any bring-up failure; the open count is unchanged on
    /// error.
    pub fn open(&self) -> Result<()> {
        let mut count = self
            .open_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *count == 0 {
            self.shared.queue.reset();
            self.shared.capture.reset();
            self.controller
                .enable(&self.config.firmware, Arc::clone(&self.shared) as _)?;
        }
        *count += 1;
        debug!(minor = self.minor, opens = *count, "device opened");
        Ok(())
    }

    /// Close the device. The last close interrupts blocked readers and
    /// shuts the DSP down. Closing an unopened device is a no-op.
    pub fn close(&self) {
        let mut count = self
            .open_count
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *count {
            0 => warn!(minor = self.minor, "close without open"),
            1 => {
                *count = 0;
                self.shared.queue.interrupt();
                self.shared.capture.cancel();
                self.controller.disable();
                debug!(minor = self.minor, "device closed, DSP stopped");
            }
            _ => *count -= 1,
        }
    }

    /// Read one message body (7 or 14 bytes), blocking until a message is
    /// available. In test mode, instead performs a bulk sample capture of
    /// `buf.len()` bytes (rounded down to even, capped at the sample
    /// buffer size) straight from the DMA buffer.
    ///
    /// # Errors
    ///
    /// [`DspError::BufferTooSmall`] if `buf` cannot hold the message body;
    /// [`DspError::Interrupted`] if the device is closed mid-wait.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.shared.test_mode.load(Ordering::Acquire) {
            return self.read_samples(buf);
        }
        let msg = self.shared.queue.consume()?;
        let len = msg.body_len();
        if buf.len() < len {
            // The message has already been dequeued and is lost, matching
            // the device contract of no partial reads.
            return Err(DspError::BufferTooSmall {
                needed: len,
                got: buf.len(),
            });
        }
        buf[..len].copy_from_slice(msg.body());
        Ok(len)
    }

    /// Request a bulk capture and copy it out of the sample buffer.
    fn read_samples(&self, buf: &mut [u8]) -> Result<usize> {
        let len = (buf.len() & !1).min(SAMPLE_BUF_LEN);
        if len == 0 {
            return Ok(0);
        }
        self.shared.capture.arm();
        self.controller.send(CONTROL_CHANNEL, len as u32)?;
        self.shared.capture.wait()?;
        self.controller.hal().dma_read(0, &mut buf[..len])?;
        Ok(len)
    }

    /// Whether a read would return without blocking.
    #[must_use]
    pub fn poll_ready(&self) -> bool {
        !self.shared.queue.is_empty()
    }

    /// Toggle bulk-capture test mode.
    pub fn set_test_mode(&self, on: bool) {
        self.shared.test_mode.store(on, Ordering::Release);
    }

    /// Current test-mode setting.
    #[must_use]
    pub fn test_mode(&self) -> bool {
        self.shared.test_mode.load(Ordering::Acquire)
    }
}

impl Drop for AdsbReceiver {
    fn drop(&mut self) {
        self.controller.disable();
        self.minors.release(self.minor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minors_are_released_on_drop() {
        let minors = Arc::new(MinorAllocator::new(1));
        let hal = Arc::new(crate::hal::mock::MockHal::new());
        let rx = AdsbReceiver::new(
            Arc::clone(&hal) as Arc<dyn DspHal>,
            ReceiverConfig::default(),
            Arc::clone(&minors),
        )
        .unwrap();
        assert_eq!(rx.minor(), 0);
        assert!(AdsbReceiver::new(
            Arc::clone(&hal) as Arc<dyn DspHal>,
            ReceiverConfig::default(),
            Arc::clone(&minors),
        )
        .is_err());
        drop(rx);
        assert!(AdsbReceiver::new(hal, ReceiverConfig::default(), minors).is_ok());
    }

    #[test]
    fn close_without_open_is_harmless() {
        let minors = Arc::new(MinorAllocator::new(MAX_DEVICES));
        let hal = Arc::new(crate::hal::mock::MockHal::new());
        let rx = AdsbReceiver::new(hal, ReceiverConfig::default(), minors).unwrap();
        rx.close();
        assert!(!rx.poll_ready());
    }

    #[test]
    fn test_mode_toggle_round_trips() {
        let minors = Arc::new(MinorAllocator::new(MAX_DEVICES));
        let hal = Arc::new(crate::hal::mock::MockHal::new());
        let rx = AdsbReceiver::new(hal, ReceiverConfig::default(), minors).unwrap();
        assert!(!rx.test_mode());
        rx.set_test_mode(true);
        assert!(rx.test_mode());
    }
}
