//! Hardware access layer for the DSP subsystem.
//!
//! Everything the resource controller and mailbox engine touch on the SoC
//! goes through [`DspHal`], so the whole driver runs unmodified against
//! either real hardware ([`uio::UioHal`]) or the in-process simulator
//! ([`mock::MockHal`]) used in CI.

pub mod mock;
pub mod uio;

use std::fmt::Debug;
use std::sync::Arc;

use winglet_chip::mem::MemWindow;

use crate::error::Result;

/// Clock gates the bring-up sequence controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockLine {
    /// DSP module clock (the core's own clock).
    Mod,
    /// Bus clock feeding the DSP config peripheral.
    Bus,
    /// CPU-side message-box clock.
    CpuMsgbox,
    /// DSP-side message-box clock.
    DspMsgbox,
}

impl ClockLine {
    /// Stable lowercase name, used in logs and step names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mod => "mod",
            Self::Bus => "bus",
            Self::CpuMsgbox => "cpu-msgbox",
            Self::DspMsgbox => "dsp-msgbox",
        }
    }
}

/// Reset lines the bring-up sequence controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetLine {
    /// DSP config peripheral reset.
    Cfg,
    /// CPU-side message-box reset.
    CpuMsgbox,
    /// DSP-side message-box reset.
    DspMsgbox,
    /// Debug peripheral reset.
    Dbg,
    /// The DSP core's own reset.
    Core,
}

impl ResetLine {
    /// Stable lowercase name, used in logs and step names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cfg => "cfg",
            Self::CpuMsgbox => "cpu-msgbox",
            Self::DspMsgbox => "dsp-msgbox",
            Self::Dbg => "dbg",
            Self::Core => "core",
        }
    }
}

/// Which side owns the shared SRAM addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SramMap {
    /// Host-local striping; required while the host sets up DMA views.
    HostLocal,
    /// DSP-local striping; required before firmware load and while running.
    DspLocal,
}

/// Interrupt lines the driver services.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqLine {
    /// DSP fatal-error / panic line.
    FatalError,
    /// Inbound message-box line.
    InboundMsgbox,
}

/// Interrupt handler invoked from the HAL's interrupt service context.
///
/// Handlers must not block: no blocking locks, no waits. They run
/// concurrently with ordinary driver calls.
pub trait IrqHandler: Send + Sync {
    /// Service one interrupt on `line`.
    fn handle_irq(&self, line: IrqLine);
}

/// Hardware operations required to run the DSP subsystem.
///
/// All methods take `&self`; implementations handle their own interior
/// synchronization. Register accessors (`cfg_*`, `inbound_*`, `outbound_*`)
/// are non-blocking and safe to call from an [`IrqHandler`].
pub trait DspHal: Debug + Send + Sync {
    /// Set the module clock rate and claim it exclusively until
    /// [`Self::clock_release_rate`].
    ///
    /// # Errors
    ///
    /// Fails if the rate cannot be programmed or another owner holds the
    /// exclusivity claim.
    fn clock_set_rate_exclusive(&self, rate_hz: u32) -> Result<()>;

    /// Release the exclusivity claim taken by
    /// [`Self::clock_set_rate_exclusive`]. No-op without a claim.
    fn clock_release_rate(&self);

    /// Ungate one clock line.
    ///
    /// # Errors
    ///
    /// Fails if the gate cannot be programmed.
    fn clock_enable(&self, line: ClockLine) -> Result<()>;

    /// Gate one clock line.
    fn clock_disable(&self, line: ClockLine);

    /// Take one reset line out of reset.
    ///
    /// # Errors
    ///
    /// Fails if the line cannot be programmed.
    fn reset_deassert(&self, line: ResetLine) -> Result<()>;

    /// Put one reset line into reset.
    fn reset_assert(&self, line: ResetLine);

    /// Switch shared SRAM ownership, waiting (bounded) for the remap to
    /// take effect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DspError::HardwareTimeout`] if the busy bit never
    /// clears.
    fn sram_remap(&self, map: SramMap) -> Result<()>;

    /// Read a DSP config register.
    fn cfg_read(&self, offset: usize) -> u32;

    /// Write a DSP config register.
    fn cfg_write(&self, offset: usize, value: u32);

    /// Write bytes into a DSP memory window at a window-relative offset.
    ///
    /// # Errors
    ///
    /// Fails if the write would run past the end of the window.
    fn window_write(&self, window: MemWindow, offset: usize, data: &[u8]) -> Result<()>;

    /// Read bytes from a DSP memory window at a window-relative offset.
    ///
    /// # Errors
    ///
    /// Fails if the read would run past the end of the window.
    fn window_read(&self, window: MemWindow, offset: usize, buf: &mut [u8]) -> Result<()>;

    /// Raw inbound interrupt status register.
    fn inbound_irq_status(&self) -> u32;

    /// Current fill level of one inbound FIFO.
    fn inbound_fifo_level(&self, channel: usize) -> usize;

    /// Pop one word from an inbound FIFO. Only valid when the fill level
    /// is non-zero.
    fn inbound_fifo_read(&self, channel: usize) -> u32;

    /// Clear one channel's inbound pending bit. Hardware requires the
    /// FIFO to be empty first.
    fn inbound_clear_pending(&self, channel: usize);

    /// Enable all inbound message-box interrupt sources.
    fn inbound_irq_enable_all(&self);

    /// Disable all inbound message-box interrupt sources.
    fn inbound_irq_disable_all(&self);

    /// Current fill level of one outbound FIFO.
    fn outbound_fifo_level(&self, channel: usize) -> usize;

    /// Push one word into an outbound FIFO. Only valid when the fill
    /// level is below the FIFO depth.
    fn outbound_fifo_write(&self, channel: usize, value: u32);

    /// Attach a handler to an interrupt line and start delivering
    /// interrupts to it.
    ///
    /// # Errors
    ///
    /// Fails if the line is already claimed or cannot be armed.
    fn irq_register(&self, line: IrqLine, handler: Arc<dyn IrqHandler>) -> Result<()>;

    /// Stop delivering interrupts on a line without detaching its
    /// handler. Non-blocking and callable from the handler itself; the
    /// line stays claimed until [`Self::irq_free`].
    fn irq_mask(&self, line: IrqLine);

    /// Detach the handler from an interrupt line. Blocks until any
    /// in-flight invocation of the handler has completed, so the handler
    /// may be dropped safely afterwards. No-op if the line is free.
    fn irq_free(&self, line: IrqLine);

    /// Allocate the DMA-visible sample buffer and return its device-side
    /// address.
    ///
    /// # Errors
    ///
    /// Fails if the buffer cannot be allocated or mapped.
    fn dma_alloc(&self, len: usize) -> Result<u32>;

    /// Free the sample buffer. No-op if none is allocated.
    fn dma_free(&self);

    /// Copy bytes out of the sample buffer.
    ///
    /// # Errors
    ///
    /// Fails if no buffer is allocated or the range is out of bounds.
    fn dma_read(&self, offset: usize, buf: &mut [u8]) -> Result<()>;
}
