//! UIO-backed hardware access.
//!
//! The kernel side is a thin UIO binding that exposes the DSP register
//! blocks, the SRAM windows, and a reserved sample buffer as mmap'able
//! maps, plus one UIO node per interrupt line. Everything else (clock tree
//! programming, resets, the load and mailbox protocol) lives here in
//! userspace.
//!
//! UIO map N is mmap'ed at offset `N * page_size` per the UIO convention.

// MMIO pointer casts are exact by construction; registers are naturally
// aligned by hardware.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_ptr_alignment)]

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use rustix::event::{poll, PollFd, PollFlags};
use rustix::fs::{flock, FlockOperation};
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::os::unix::io::AsFd;

use winglet_chip::ccu::{dsp_bgr, dsp_clk, msgbox_bgr, sram_remap, DSP_BGR_REG, DSP_CLK_REG, MSGBOX_BGR_REG, SRAM_REMAP_REG};
use winglet_chip::mem::{MemWindow, SAMPLE_BUF_LEN};
use winglet_chip::msgbox;

use crate::error::{DspError, Result};
use crate::hal::{ClockLine, DspHal, IrqHandler, IrqLine, ResetLine, SramMap};

/// UIO map indices exported by the kernel binding. The message box is two
/// mirrored units at distinct physical addresses: the CPU-side unit holds
/// the FIFOs the host drains, the DSP-side unit the FIFOs the host fills.
mod map_index {
    pub const CFG: u64 = 0;
    pub const CCU: u64 = 1;
    pub const SYS: u64 = 2;
    pub const CPU_MSGBOX: u64 = 3;
    pub const DSP_MSGBOX: u64 = 4;
    pub const IRAM: u64 = 5;
    pub const DRAM0: u64 = 6;
    pub const DRAM1: u64 = 7;
    pub const DMA: u64 = 8;
}

/// Length of each register-block map.
const REG_MAP_LEN: usize = 0x1000;

/// Parent rate of the DSP module clock divider.
const DSP_CLK_PARENT_HZ: u32 = 600_000_000;

/// Iteration bound for the SRAM remap busy poll.
const REMAP_POLL_LIMIT: u32 = 100_000;

/// Interrupt worker poll granularity, milliseconds.
const IRQ_POLL_MS: i32 = 50;

/// Paths and addresses describing the UIO binding.
#[derive(Debug, Clone)]
pub struct UioConfig {
    /// Main UIO node carrying the register and memory maps.
    pub device: PathBuf,
    /// UIO node delivering the fatal-error interrupt.
    pub fatal_irq: PathBuf,
    /// UIO node delivering the inbound message-box interrupt.
    pub mailbox_irq: PathBuf,
    /// Bus address of the reserved sample buffer, as the DSP sees it.
    pub sample_buf_addr: u32,
}

/// One mmap'ed UIO map.
struct Region {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: Send - the region owns its mapping exclusively; mmap'd memory is
// process-wide, not thread-local.
unsafe impl Send for Region {}

// SAFETY: Sync - accesses are volatile and bounds-checked; concurrent MMIO
// accesses to distinct registers are well-defined, and each register has a
// single logical owner in this driver.
unsafe impl Sync for Region {}

impl Region {
    fn map(device: &File, offset: u64, len: usize) -> Result<Self> {
        // SAFETY: mmap of a UIO map. The fd is open, offset selects the
        // map per the UIO convention, and on success ptr is valid for len
        // bytes until munmap in Drop.
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                device.as_fd(),
                offset,
            )
            .map_err(std::io::Error::from)?
        };
        Ok(Self {
            ptr: ptr.cast(),
            len,
        })
    }

    fn read32(&self, offset: usize) -> u32 {
        assert!(offset + 4 <= self.len, "register offset out of bounds");
        // SAFETY: ptr is valid for len bytes, offset+4 <= len, registers
        // are 4-byte aligned. Volatile because hardware changes the value.
        unsafe { std::ptr::read_volatile(self.ptr.add(offset).cast::<u32>()) }
    }

    fn write32(&self, offset: usize, value: u32) {
        assert!(offset + 4 <= self.len, "register offset out of bounds");
        // SAFETY: ptr is valid for len bytes, offset+4 <= len. Volatile
        // because the write has hardware side effects.
        unsafe {
            std::ptr::write_volatile(self.ptr.add(offset).cast::<u32>(), value);
        }
    }

    fn write_bytes(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "range out of bounds");
        // SAFETY: ptr is valid for len bytes and the range is checked; the
        // source slice cannot overlap a device mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.add(offset), data.len());
        }
    }

    fn read_bytes(&self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= self.len, "range out of bounds");
        // SAFETY: ptr is valid for len bytes and the range is checked.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), buf.as_mut_ptr(), buf.len());
        }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        // SAFETY: ptr/len came from a successful mmap and Drop runs once.
        unsafe {
            let _ = munmap(self.ptr.cast(), self.len);
        }
    }
}

struct IrqWorker {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Real hardware access over the UIO binding.
pub struct UioHal {
    device: File,
    cfg: Region,
    ccu: Region,
    sys: Region,
    cpu_msgbox: Region,
    dsp_msgbox: Region,
    windows: [Region; 3],
    dma: Region,
    dma_addr: u32,
    dma_active: Mutex<Option<usize>>,
    rate_claimed: AtomicBool,
    irq_paths: [PathBuf; 2],
    irq_workers: Mutex<[Option<IrqWorker>; 2]>,
}

impl std::fmt::Debug for UioHal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UioHal")
            .field("dma_addr", &format_args!("{:#010x}", self.dma_addr))
            .finish_non_exhaustive()
    }
}

const fn irq_index(line: IrqLine) -> usize {
    match line {
        IrqLine::FatalError => 0,
        IrqLine::InboundMsgbox => 1,
    }
}

impl UioHal {
    /// Open the UIO binding and map every register block and window.
    ///
    /// # Errors
    ///
    /// Fails if any node cannot be opened or any map cannot be mmap'ed.
    pub fn open(config: &UioConfig) -> Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)?;
        let page = rustix::param::page_size() as u64;
        let map = |idx: u64, len: usize| Region::map(&device, idx * page, len);

        let hal = Self {
            cfg: map(map_index::CFG, REG_MAP_LEN)?,
            ccu: map(map_index::CCU, REG_MAP_LEN)?,
            sys: map(map_index::SYS, REG_MAP_LEN)?,
            cpu_msgbox: map(map_index::CPU_MSGBOX, REG_MAP_LEN)?,
            dsp_msgbox: map(map_index::DSP_MSGBOX, REG_MAP_LEN)?,
            windows: [
                map(map_index::IRAM, MemWindow::Iram.size())?,
                map(map_index::DRAM0, MemWindow::Dram0.size())?,
                map(map_index::DRAM1, MemWindow::Dram1.size())?,
            ],
            dma: map(map_index::DMA, SAMPLE_BUF_LEN)?,
            dma_addr: config.sample_buf_addr,
            dma_active: Mutex::new(None),
            rate_claimed: AtomicBool::new(false),
            irq_paths: [config.fatal_irq.clone(), config.mailbox_irq.clone()],
            irq_workers: Mutex::new([None, None]),
            device,
        };
        tracing::info!(device = %config.device.display(), "mapped DSP UIO binding");
        Ok(hal)
    }

    fn window(&self, window: MemWindow) -> &Region {
        match window {
            MemWindow::Iram => &self.windows[0],
            MemWindow::Dram0 => &self.windows[1],
            MemWindow::Dram1 => &self.windows[2],
        }
    }

    fn ccu_update(&self, reg: usize, set: u32, clear: u32) {
        let v = self.ccu.read32(reg);
        self.ccu.write32(reg, (v & !clear) | set);
    }

    fn workers(&self) -> MutexGuard<'_, [Option<IrqWorker>; 2]> {
        self.irq_workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unmask, wait for, and dispatch interrupts on one UIO node.
fn irq_loop(fd: &File, line: IrqLine, handler: &Arc<dyn IrqHandler>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        // UIO requires a re-enable write before each interrupt.
        if let Err(e) = (&*fd).write_all(&1u32.to_ne_bytes()) {
            tracing::warn!(?line, error = %e, "irq unmask failed, stopping service thread");
            return;
        }
        let mut fds = [PollFd::new(fd, PollFlags::IN)];
        match poll(&mut fds, IRQ_POLL_MS) {
            Ok(0) => continue,
            Ok(_) => {
                let mut count = [0u8; 4];
                if (&*fd).read_exact(&mut count).is_ok() {
                    handler.handle_irq(line);
                }
            }
            Err(rustix::io::Errno::INTR) => continue,
            Err(e) => {
                tracing::warn!(?line, error = %e, "irq poll failed, stopping service thread");
                return;
            }
        }
    }
}

impl DspHal for UioHal {
    fn clock_set_rate_exclusive(&self, rate_hz: u32) -> Result<()> {
        // Validate the rate before claiming; a failed claim must leave
        // nothing for the caller to release.
        let div = (DSP_CLK_PARENT_HZ / rate_hz.max(1)).max(1) - 1;
        if div > dsp_clk::DIV_MASK {
            return Err(DspError::config(format!("unreachable DSP clock rate {rate_hz} Hz")));
        }

        // The advisory lock on the UIO node is the cross-process claim on
        // the DSP clock divider.
        flock(self.device.as_fd(), FlockOperation::NonBlockingLockExclusive)
            .map_err(std::io::Error::from)?;
        self.rate_claimed.store(true, Ordering::Release);
        self.ccu_update(DSP_CLK_REG, div, dsp_clk::DIV_MASK);
        Ok(())
    }

    fn clock_release_rate(&self) {
        if self.rate_claimed.swap(false, Ordering::AcqRel) {
            let _ = flock(self.device.as_fd(), FlockOperation::Unlock);
        }
    }

    fn clock_enable(&self, line: ClockLine) -> Result<()> {
        match line {
            ClockLine::Mod => self.ccu_update(DSP_CLK_REG, dsp_clk::GATE, 0),
            ClockLine::Bus => self.ccu_update(DSP_BGR_REG, dsp_bgr::BUS_GATE, 0),
            ClockLine::CpuMsgbox => self.ccu_update(MSGBOX_BGR_REG, msgbox_bgr::CPU_GATE, 0),
            ClockLine::DspMsgbox => self.ccu_update(MSGBOX_BGR_REG, msgbox_bgr::DSP_GATE, 0),
        }
        Ok(())
    }

    fn clock_disable(&self, line: ClockLine) {
        match line {
            ClockLine::Mod => self.ccu_update(DSP_CLK_REG, 0, dsp_clk::GATE),
            ClockLine::Bus => self.ccu_update(DSP_BGR_REG, 0, dsp_bgr::BUS_GATE),
            ClockLine::CpuMsgbox => self.ccu_update(MSGBOX_BGR_REG, 0, msgbox_bgr::CPU_GATE),
            ClockLine::DspMsgbox => self.ccu_update(MSGBOX_BGR_REG, 0, msgbox_bgr::DSP_GATE),
        }
    }

    fn reset_deassert(&self, line: ResetLine) -> Result<()> {
        match line {
            ResetLine::Cfg => self.ccu_update(DSP_BGR_REG, dsp_bgr::CFG_RST, 0),
            ResetLine::Dbg => self.ccu_update(DSP_BGR_REG, dsp_bgr::DBG_RST, 0),
            ResetLine::Core => self.ccu_update(DSP_BGR_REG, dsp_bgr::CORE_RST, 0),
            ResetLine::CpuMsgbox => self.ccu_update(MSGBOX_BGR_REG, msgbox_bgr::CPU_RST, 0),
            ResetLine::DspMsgbox => self.ccu_update(MSGBOX_BGR_REG, msgbox_bgr::DSP_RST, 0),
        }
        Ok(())
    }

    fn reset_assert(&self, line: ResetLine) {
        match line {
            ResetLine::Cfg => self.ccu_update(DSP_BGR_REG, 0, dsp_bgr::CFG_RST),
            ResetLine::Dbg => self.ccu_update(DSP_BGR_REG, 0, dsp_bgr::DBG_RST),
            ResetLine::Core => self.ccu_update(DSP_BGR_REG, 0, dsp_bgr::CORE_RST),
            ResetLine::CpuMsgbox => self.ccu_update(MSGBOX_BGR_REG, 0, msgbox_bgr::CPU_RST),
            ResetLine::DspMsgbox => self.ccu_update(MSGBOX_BGR_REG, 0, msgbox_bgr::DSP_RST),
        }
    }

    fn sram_remap(&self, map: SramMap) -> Result<()> {
        let v = self.sys.read32(SRAM_REMAP_REG);
        let v = match map {
            SramMap::HostLocal => v | sram_remap::SEL_LOCAL,
            SramMap::DspLocal => v & !sram_remap::SEL_LOCAL,
        };
        self.sys.write32(SRAM_REMAP_REG, v);
        for _ in 0..REMAP_POLL_LIMIT {
            if self.sys.read32(SRAM_REMAP_REG) & sram_remap::BUSY == 0 {
                return Ok(());
            }
            std::hint::spin_loop();
        }
        Err(DspError::HardwareTimeout {
            what: "SRAM remap busy bit",
        })
    }

    fn cfg_read(&self, offset: usize) -> u32 {
        self.cfg.read32(offset)
    }

    fn cfg_write(&self, offset: usize, value: u32) {
        self.cfg.write32(offset, value);
    }

    fn window_write(&self, window: MemWindow, offset: usize, data: &[u8]) -> Result<()> {
        let region = self.window(window);
        if offset.checked_add(data.len()).is_none_or(|end| end > region.len) {
            return Err(DspError::InvalidAddress {
                addr: window.base() + offset as u32,
            });
        }
        region.write_bytes(offset, data);
        Ok(())
    }

    fn window_read(&self, window: MemWindow, offset: usize, buf: &mut [u8]) -> Result<()> {
        let region = self.window(window);
        if offset.checked_add(buf.len()).is_none_or(|end| end > region.len) {
            return Err(DspError::InvalidAddress {
                addr: window.base() + offset as u32,
            });
        }
        region.read_bytes(offset, buf);
        Ok(())
    }

    fn inbound_irq_status(&self) -> u32 {
        self.cpu_msgbox.read32(msgbox::READ_IRQ_STATUS)
    }

    fn inbound_fifo_level(&self, channel: usize) -> usize {
        let status = self.cpu_msgbox.read32(msgbox::msg_status(channel));
        ((status >> msgbox::MSG_NUM_SHIFT) & msgbox::MSG_NUM_MASK) as usize
    }

    fn inbound_fifo_read(&self, channel: usize) -> u32 {
        self.cpu_msgbox.read32(msgbox::msg_fifo(channel))
    }

    fn inbound_clear_pending(&self, channel: usize) {
        self.cpu_msgbox.write32(
            msgbox::READ_IRQ_STATUS,
            msgbox::RD_IRQ_PEND_MASK << msgbox::rd_irq_pend_shift(channel),
        );
    }

    fn inbound_irq_enable_all(&self) {
        self.cpu_msgbox
            .write32(msgbox::READ_IRQ_ENABLE, msgbox::READ_IRQ_ENABLE_ALL);
    }

    fn inbound_irq_disable_all(&self) {
        self.cpu_msgbox.write32(msgbox::READ_IRQ_ENABLE, 0);
    }

    fn outbound_fifo_level(&self, channel: usize) -> usize {
        let status = self.dsp_msgbox.read32(msgbox::msg_status(channel));
        ((status >> msgbox::MSG_NUM_SHIFT) & msgbox::MSG_NUM_MASK) as usize
    }

    fn outbound_fifo_write(&self, channel: usize, value: u32) {
        self.dsp_msgbox.write32(msgbox::msg_fifo(channel), value);
    }

    fn irq_register(&self, line: IrqLine, handler: Arc<dyn IrqHandler>) -> Result<()> {
        let mut workers = self.workers();
        let slot = &mut workers[irq_index(line)];
        if slot.is_some() {
            return Err(DspError::config(format!("irq line {line:?} already claimed")));
        }
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.irq_paths[irq_index(line)])?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::Builder::new()
            .name(format!("dsp-irq-{}", irq_index(line)))
            .spawn(move || irq_loop(&fd, line, &handler, &thread_stop))?;
        *slot = Some(IrqWorker {
            stop,
            thread: Some(thread),
        });
        Ok(())
    }

    fn irq_mask(&self, line: IrqLine) {
        // Stops the service loop without joining, so the handler itself
        // may call this. The line stays claimed until irq_free.
        if let Some(worker) = self.workers()[irq_index(line)].as_ref() {
            worker.stop.store(true, Ordering::Release);
        }
    }

    fn irq_free(&self, line: IrqLine) {
        let worker = self.workers()[irq_index(line)].take();
        if let Some(mut worker) = worker {
            worker.stop.store(true, Ordering::Release);
            // Joining synchronizes with any in-flight handler invocation.
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }

    fn dma_alloc(&self, len: usize) -> Result<u32> {
        if len > SAMPLE_BUF_LEN {
            return Err(DspError::BufferTooSmall {
                needed: len,
                got: SAMPLE_BUF_LEN,
            });
        }
        let mut active = self
            .dma_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.dma.write_bytes(0, &vec![0u8; len]);
        *active = Some(len);
        Ok(self.dma_addr)
    }

    fn dma_free(&self) {
        *self
            .dma_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn dma_read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let active = self
            .dma_active
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let len = active.ok_or_else(|| DspError::config("no sample buffer allocated"))?;
        if offset.checked_add(buf.len()).is_none_or(|end| end > len) {
            return Err(DspError::BufferTooSmall {
                needed: offset + buf.len(),
                got: len,
            });
        }
        self.dma.read_bytes(offset, buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A hal whose maps are all backed by one sparse temp file. Register
    /// routing and claim bookkeeping behave as on hardware; only the
    /// side effects behind the registers are absent.
    fn file_backed_hal() -> (UioHal, tempfile::NamedTempFile) {
        let file = tempfile::NamedTempFile::new().unwrap();
        let page = rustix::param::page_size() as u64;
        let len = map_index::DMA * page + SAMPLE_BUF_LEN as u64;
        file.as_file().set_len(len).unwrap();
        let hal = UioHal::open(&UioConfig {
            device: file.path().to_owned(),
            fatal_irq: file.path().to_owned(),
            mailbox_irq: file.path().to_owned(),
            sample_buf_addr: 0x4800_0000,
        })
        .unwrap();
        (hal, file)
    }

    #[test]
    fn outbound_writes_hit_the_dsp_side_unit() {
        let (hal, _file) = file_backed_hal();
        hal.outbound_fifo_write(1, 0xAABB_CCDD);
        // The word must land in the DSP-side unit, not in the host-side
        // FIFO that the inbound drain reads.
        assert_eq!(hal.dsp_msgbox.read32(msgbox::msg_fifo(1)), 0xAABB_CCDD);
        assert_eq!(hal.inbound_fifo_read(1), 0);
        assert_eq!(hal.inbound_fifo_level(1), 0);
    }

    #[test]
    fn irq_enable_touches_only_the_host_side_unit() {
        let (hal, _file) = file_backed_hal();
        hal.inbound_irq_enable_all();
        assert_eq!(
            hal.cpu_msgbox.read32(msgbox::READ_IRQ_ENABLE),
            msgbox::READ_IRQ_ENABLE_ALL
        );
        assert_eq!(hal.dsp_msgbox.read32(msgbox::READ_IRQ_ENABLE), 0);
    }

    #[test]
    fn unreachable_rate_leaves_no_claim() {
        let (hal, _file) = file_backed_hal();
        assert!(hal.clock_set_rate_exclusive(1).is_err());
        assert!(!hal.rate_claimed.load(Ordering::Acquire));
        hal.clock_set_rate_exclusive(300_000_000).unwrap();
        assert!(hal.rate_claimed.load(Ordering::Acquire));
        hal.clock_release_rate();
    }

    // Needs the winglet UIO binding loaded; run on target hardware with
    // `cargo test -- --ignored`.
    #[test]
    #[ignore]
    fn opens_default_binding() {
        let hal = UioHal::open(&UioConfig {
            device: "/dev/uio0".into(),
            fatal_irq: "/dev/uio1".into(),
            mailbox_irq: "/dev/uio2".into(),
            sample_buf_addr: 0x4800_0000,
        })
        .unwrap();
        assert_eq!(hal.inbound_fifo_level(0), 0);
    }
}
