//! DSP resource controller.
//!
//! Owns bring-up and bring-down of everything the core needs to run:
//! clocks, resets, the SRAM ownership switch, firmware load, interrupt
//! wiring, and the DMA sample buffer. Bring-up is a strict ordered
//! sequence; a failure at any step rolls the completed steps back in
//! reverse order and leaves the instance disabled and reusable.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info, warn};

use winglet_chip::cfg::{ctrl, stat, ALT_RESET_VEC, CTRL_REG0, STAT_REG};
use winglet_chip::mem::{self, MemWindow, SAMPLE_BUF_LEN};

use crate::error::{DspError, Result};
use crate::firmware;
use crate::hal::{ClockLine, DspHal, IrqHandler, IrqLine, ResetLine, SramMap};
use crate::ihex::{self, RecordSink};
use crate::mailbox::{self, drain_inbound, MailboxSink};

/// Outbound channel carrying control words to the firmware (the sample
/// buffer address at bring-up, acknowledgements afterwards).
pub const CONTROL_CHANNEL: usize = 0;

/// Controller tunables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Target core clock rate.
    pub clock_rate_hz: u32,
    /// Firmware search directories, first hit wins.
    pub firmware_dirs: Vec<std::path::PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            clock_rate_hz: 600_000_000,
            firmware_dirs: firmware::default_search_path(),
        }
    }
}

/// How far bring-up got; drives reverse-order rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Progress {
    None,
    SramHost,
    ClockRate,
    ClockMod,
    ClockBus,
    ClockCpuMbox,
    ClockDspMbox,
    RstCfg,
    RstCpuMbox,
    RstDspMbox,
    RstDbg,
    CoreStalled,
    RstCore,
    SramDsp,
    Loaded,
    CoreRestarted,
    IrqsOn,
    CoreRunning,
    IrqFatal,
    IrqMailbox,
    DmaReady,
}

/// Swappable callback slot shared with the interrupt handler.
///
/// The mutex is held only for pointer clone/swap, never across a callback
/// invocation, so taking it from interrupt context cannot stall.
struct SinkSlot(Mutex<Option<Arc<dyn MailboxSink>>>);

impl SinkSlot {
    fn get(&self) -> Option<Arc<dyn MailboxSink>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set(&self, sink: Option<Arc<dyn MailboxSink>>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = sink;
    }
}

/// Writes decoded firmware records into the DSP memory windows.
struct LoadSink<'a> {
    hal: &'a dyn DspHal,
}

impl RecordSink for LoadSink<'_> {
    fn data(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let (window, offset) =
            mem::locate(addr, data.len()).ok_or(DspError::InvalidAddress { addr })?;
        self.hal.window_write(window, offset, data)
    }

    fn start_address(&mut self, addr: u32) -> Result<()> {
        // The entry vector must point into executable memory.
        if !MemWindow::Iram.contains(addr, 4) {
            return Err(DspError::InvalidAddress { addr });
        }
        self.hal.cfg_write(ALT_RESET_VEC, addr);
        let v = self.hal.cfg_read(CTRL_REG0);
        self.hal.cfg_write(CTRL_REG0, v | ctrl::START_VEC_SEL);
        debug!(addr, "programmed start vector");
        Ok(())
    }
}

struct FatalIrqHandler {
    hal: Arc<dyn DspHal>,
}

impl IrqHandler for FatalIrqHandler {
    fn handle_irq(&self, line: IrqLine) {
        let status = self.hal.cfg_read(STAT_REG);
        if status & stat::DEBUG_MODE != 0 {
            error!(status, "DSP core parked in debug mode");
        } else {
            error!(status, "DSP core crashed");
        }
        // One report per session; the line would otherwise storm until
        // the device is disabled.
        self.hal.irq_mask(line);
    }
}

struct MailboxIrqHandler {
    hal: Arc<dyn DspHal>,
    sink: Arc<SinkSlot>,
}

impl IrqHandler for MailboxIrqHandler {
    fn handle_irq(&self, _line: IrqLine) {
        let sink = self.sink.get();
        drain_inbound(&*self.hal, sink.as_deref());
    }
}

/// One co-processor instance.
pub struct DspController {
    hal: Arc<dyn DspHal>,
    config: ControllerConfig,
    enabled: Mutex<bool>,
    sink: Arc<SinkSlot>,
}

impl std::fmt::Debug for DspController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DspController")
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

impl DspController {
    /// Create a controller over `hal`. No hardware is touched until
    /// [`Self::enable`].
    #[must_use]
    pub fn new(hal: Arc<dyn DspHal>, config: ControllerConfig) -> Self {
        Self {
            hal,
            config,
            enabled: Mutex::new(false),
            sink: Arc::new(SinkSlot(Mutex::new(None))),
        }
    }

    fn lock_enabled(&self) -> MutexGuard<'_, bool> {
        self.enabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the core is currently enabled.
    pub fn is_enabled(&self) -> bool {
        *self.lock_enabled()
    }

    /// Bring the core up: load `firmware_name`, start execution, wire
    /// interrupts to `sink`, and hand the sample buffer to the firmware.
    ///
    /// # Errors
    ///
    /// Returns [`DspError::Busy`] if already enabled. Any other failure
    /// has rolled every completed step back; the instance stays disabled
    /// and a retry is valid.
    pub fn enable(&self, firmware_name: &str, sink: Arc<dyn MailboxSink>) -> Result<()> {
        let mut enabled = self.lock_enabled();
        if *enabled {
            return Err(DspError::Busy);
        }

        let blob = firmware::load(firmware_name, &self.config.firmware_dirs)?;

        let mut progress = Progress::None;
        match self.bring_up(&blob, &mut progress) {
            Ok(()) => {
                self.sink.set(Some(sink));
                *enabled = true;
                info!(firmware = firmware_name, "DSP enabled");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "DSP enable failed, rolling back");
                self.unwind(progress);
                Err(e)
            }
        }
    }

    fn bring_up(&self, blob: &[u8], progress: &mut Progress) -> Result<()> {
        let hal = &*self.hal;
        let res = |step: &'static str, r: Result<()>| {
            r.map_err(|e| DspError::resource(step, e.to_string()))
        };

        // Host-local addressing while the host prepares memory views.
        res("sram host remap", hal.sram_remap(SramMap::HostLocal))?;
        *progress = Progress::SramHost;

        res(
            "clock rate claim",
            hal.clock_set_rate_exclusive(self.config.clock_rate_hz),
        )?;
        *progress = Progress::ClockRate;
        res("mod clock", hal.clock_enable(ClockLine::Mod))?;
        *progress = Progress::ClockMod;
        res("bus clock", hal.clock_enable(ClockLine::Bus))?;
        *progress = Progress::ClockBus;
        res("cpu msgbox clock", hal.clock_enable(ClockLine::CpuMsgbox))?;
        *progress = Progress::ClockCpuMbox;
        res("dsp msgbox clock", hal.clock_enable(ClockLine::DspMsgbox))?;
        *progress = Progress::ClockDspMbox;

        res("cfg reset", hal.reset_deassert(ResetLine::Cfg))?;
        *progress = Progress::RstCfg;
        res("cpu msgbox reset", hal.reset_deassert(ResetLine::CpuMsgbox))?;
        *progress = Progress::RstCpuMbox;
        res("dsp msgbox reset", hal.reset_deassert(ResetLine::DspMsgbox))?;
        *progress = Progress::RstDspMbox;
        res("dbg reset", hal.reset_deassert(ResetLine::Dbg))?;
        *progress = Progress::RstDbg;

        // Halt the core before releasing its reset; it must not fetch
        // until the firmware is in place.
        hal.cfg_write(CTRL_REG0, ctrl::RUN_STALL | ctrl::DSP_CLKEN);
        *progress = Progress::CoreStalled;

        res("core reset", hal.reset_deassert(ResetLine::Core))?;
        *progress = Progress::RstCore;

        // The load path needs DSP-local striping.
        res("sram dsp remap", hal.sram_remap(SramMap::DspLocal))?;
        *progress = Progress::SramDsp;

        let mut load = LoadSink { hal };
        let records = ihex::decode(blob, &mut load)?;
        debug!(records, "firmware image loaded");
        *progress = Progress::Loaded;

        // The reset vector is sampled at reset release, and the load may
        // have reprogrammed it; pulse the core reset once more.
        hal.reset_assert(ResetLine::Core);
        res("core reset pulse", hal.reset_deassert(ResetLine::Core))?;
        *progress = Progress::CoreRestarted;

        hal.inbound_irq_enable_all();
        // Pick up anything that arrived before handler registration.
        drain_inbound(hal, self.sink.get().as_deref());
        *progress = Progress::IrqsOn;

        let v = hal.cfg_read(CTRL_REG0);
        hal.cfg_write(CTRL_REG0, v & !ctrl::RUN_STALL);
        *progress = Progress::CoreRunning;

        res(
            "fatal irq",
            hal.irq_register(
                IrqLine::FatalError,
                Arc::new(FatalIrqHandler {
                    hal: Arc::clone(&self.hal),
                }),
            ),
        )?;
        *progress = Progress::IrqFatal;
        res(
            "mailbox irq",
            hal.irq_register(
                IrqLine::InboundMsgbox,
                Arc::new(MailboxIrqHandler {
                    hal: Arc::clone(&self.hal),
                    sink: Arc::clone(&self.sink),
                }),
            ),
        )?;
        *progress = Progress::IrqMailbox;

        let addr = hal.dma_alloc(SAMPLE_BUF_LEN)?;
        *progress = Progress::DmaReady;
        mailbox::send(hal, CONTROL_CHANNEL, addr)?;

        Ok(())
    }

    /// Reverse-order teardown of every step at or below `progress`.
    fn unwind(&self, progress: Progress) {
        let hal = &*self.hal;
        let p = progress;

        if p >= Progress::DmaReady {
            hal.dma_free();
        }
        if p >= Progress::IrqMailbox {
            hal.irq_free(IrqLine::InboundMsgbox);
        }
        if p >= Progress::IrqFatal {
            hal.irq_free(IrqLine::FatalError);
        }
        if p >= Progress::CoreRunning {
            let v = hal.cfg_read(CTRL_REG0);
            hal.cfg_write(CTRL_REG0, v | ctrl::RUN_STALL);
        }
        if p >= Progress::IrqsOn {
            hal.inbound_irq_disable_all();
        }
        self.power_down(p);
    }

    /// Teardown below the interrupt layer: SRAM ownership, resets, clocks,
    /// and the rate claim, in reverse bring-up order.
    fn power_down(&self, p: Progress) {
        let hal = &*self.hal;
        if p >= Progress::SramDsp {
            if let Err(e) = hal.sram_remap(SramMap::HostLocal) {
                warn!(error = %e, "sram host remap failed during teardown");
            }
        }
        if p >= Progress::RstCore {
            hal.reset_assert(ResetLine::Core);
        }
        if p >= Progress::RstDbg {
            hal.reset_assert(ResetLine::Dbg);
        }
        if p >= Progress::RstDspMbox {
            hal.reset_assert(ResetLine::DspMsgbox);
        }
        if p >= Progress::RstCpuMbox {
            hal.reset_assert(ResetLine::CpuMsgbox);
        }
        if p >= Progress::RstCfg {
            hal.reset_assert(ResetLine::Cfg);
        }
        if p >= Progress::ClockDspMbox {
            hal.clock_disable(ClockLine::DspMsgbox);
        }
        if p >= Progress::ClockCpuMbox {
            hal.clock_disable(ClockLine::CpuMsgbox);
        }
        if p >= Progress::ClockBus {
            hal.clock_disable(ClockLine::Bus);
        }
        if p >= Progress::ClockMod {
            hal.clock_disable(ClockLine::Mod);
        }
        if p >= Progress::ClockRate {
            hal.clock_release_rate();
        }
    }

    /// Stop the core and release every resource. Idempotent.
    ///
    /// The interrupt source is masked and both handlers freed (waiting out
    /// any in-flight invocation) before the callback is dropped, so no
    /// handler can observe a half-torn-down instance.
    pub fn disable(&self) {
        let mut enabled = self.lock_enabled();
        if !*enabled {
            return;
        }
        self.hal.inbound_irq_disable_all();
        self.hal.irq_free(IrqLine::InboundMsgbox);
        self.hal.irq_free(IrqLine::FatalError);
        self.sink.set(None);
        self.hal.dma_free();
        let v = self.hal.cfg_read(CTRL_REG0);
        self.hal.cfg_write(CTRL_REG0, v | ctrl::RUN_STALL);
        self.power_down(Progress::DmaReady);
        *enabled = false;
        info!("DSP disabled");
    }

    /// Send one word to the firmware.
    ///
    /// # Errors
    ///
    /// Returns [`DspError::MailboxFull`] when the FIFO has no free slot.
    pub fn send(&self, channel: usize, value: u32) -> Result<()> {
        mailbox::send(&*self.hal, channel, value)
    }

    /// Translate a DSP-side data address into a window and offset.
    ///
    /// Only the data RAM banks are addressable here; instruction RAM is
    /// not a valid source for runtime records.
    ///
    /// # Errors
    ///
    /// Returns [`DspError::InvalidAddress`] for anything outside the data
    /// banks.
    pub fn lookup_local_address(&self, addr: u32, len: usize) -> Result<(MemWindow, usize)> {
        mem::locate_data(addr, len).ok_or(DspError::InvalidAddress { addr })
    }

    /// Shared handle to the underlying hardware.
    #[must_use]
    pub fn hal(&self) -> &Arc<dyn DspHal> {
        &self.hal
    }
}
