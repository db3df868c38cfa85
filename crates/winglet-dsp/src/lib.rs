//! Userspace driver for the winglet ADSB receiver on the D1 HiFi4 DSP.
//!
//! The DSP runs the demodulation firmware; this crate owns everything on
//! the host side: clock/reset bring-up, Intel-HEX firmware load, the
//! message-box protocol, and the device surface readers consume.
//!
//! # Stack
//!
//! ```text
//! AdsbReceiver        open/close/read/poll, test-mode capture
//!   DspController     ordered bring-up with reverse rollback
//!     ihex            streaming firmware decoder
//!     mailbox         inbound drain + non-blocking send
//!   MessageBridge     32-slot queue, interrupt producer, blocking reader
//! DspHal              hardware seam: UioHal on target, MockHal in CI
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use winglet_dsp::{AdsbReceiver, MinorAllocator, ReceiverConfig, MAX_DEVICES};
//! use winglet_dsp::hal::uio::{UioConfig, UioHal};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hal = Arc::new(UioHal::open(&UioConfig {
//!     device: "/dev/uio0".into(),
//!     fatal_irq: "/dev/uio1".into(),
//!     mailbox_irq: "/dev/uio2".into(),
//!     sample_buf_addr: 0x4800_0000,
//! })?);
//! let minors = Arc::new(MinorAllocator::new(MAX_DEVICES));
//! let rx = AdsbReceiver::new(hal, ReceiverConfig::default(), minors)?;
//! rx.open()?;
//! let mut body = [0u8; 14];
//! let len = rx.read(&mut body)?;
//! println!("message: {:02x?}", &body[..len]);
//! rx.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod allocator;
mod bridge;
mod controller;
mod error;
mod firmware;
pub mod hal;
pub mod ihex;
pub mod mailbox;
mod message;
mod receiver;

pub use allocator::MinorAllocator;
pub use bridge::{MessageBridge, BRIDGE_DEPTH};
pub use controller::{ControllerConfig, DspController, CONTROL_CHANNEL};
pub use error::{DspError, Result};
pub use firmware::{default_search_path, load as load_firmware, DEFAULT_FIRMWARE};
pub use message::{AdsbMessage, MSG_FLAG_LONG, MSG_LEN_LONG, MSG_LEN_SHORT};
pub use receiver::{AdsbReceiver, ReceiverConfig, CAPTURE_COMPLETE, MAX_DEVICES};
