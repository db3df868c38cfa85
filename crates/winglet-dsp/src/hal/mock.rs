//! In-process hardware simulator.
//!
//! Backs the driver in CI and unit tests: registers, memory windows, and
//! message-box FIFOs are plain state behind a mutex, every mutating call is
//! journaled so tests can assert exact sequencing, and any named operation
//! can be made to fail once for rollback testing. Interrupts are raised
//! synchronously from the test thread via [`MockHal::raise_irq`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use winglet_chip::mem::MemWindow;
use winglet_chip::msgbox::{self, CHANNELS, FIFO_DEPTH};

use crate::error::{DspError, Result};
use crate::hal::{ClockLine, DspHal, IrqHandler, IrqLine, ResetLine, SramMap};

struct MockState {
    journal: Vec<String>,
    fail_ops: HashSet<String>,
    gated_op: Option<(String, Arc<OpGate>)>,
    cfg_regs: HashMap<usize, u32>,
    windows: [Vec<u8>; 3],
    inbound: [VecDeque<u32>; CHANNELS],
    pending: [bool; CHANNELS],
    irq_enabled: bool,
    irq_masked: [bool; 2],
    outbound_level: [usize; CHANNELS],
    sent: Vec<(usize, u32)>,
    dma: Option<Vec<u8>>,
}

/// Simulated DSP hardware.
pub struct MockHal {
    state: Mutex<MockState>,
    handlers: Mutex<[Option<Arc<dyn IrqHandler>>; 2]>,
}

impl std::fmt::Debug for MockHal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockHal").finish_non_exhaustive()
    }
}

/// Device-side address reported for the simulated sample buffer.
pub const MOCK_DMA_ADDR: u32 = 0x4000_0000;

fn window_index(window: MemWindow) -> usize {
    match window {
        MemWindow::Iram => 0,
        MemWindow::Dram0 => 1,
        MemWindow::Dram1 => 2,
    }
}

const fn irq_index(line: IrqLine) -> usize {
    match line {
        IrqLine::FatalError => 0,
        IrqLine::InboundMsgbox => 1,
    }
}

#[derive(Default)]
struct GateState {
    entered: bool,
    released: bool,
}

/// Holds one hardware operation open so a test can observe another thread
/// racing against it. Obtained from [`MockHal::gate_next`].
#[derive(Default)]
pub struct OpGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

impl OpGate {
    fn gate_lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until some thread is inside the gated operation.
    pub fn wait_entered(&self) {
        let mut st = self.gate_lock();
        while !st.entered {
            st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Let the gated operation finish.
    pub fn release(&self) {
        self.gate_lock().released = true;
        self.cv.notify_all();
    }

    fn pass(&self) {
        let mut st = self.gate_lock();
        st.entered = true;
        self.cv.notify_all();
        while !st.released {
            st = self.cv.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl MockHal {
    /// Create a simulator with empty registers and FIFOs.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                journal: Vec::new(),
                fail_ops: HashSet::new(),
                gated_op: None,
                cfg_regs: HashMap::new(),
                windows: [
                    vec![0; MemWindow::Iram.size()],
                    vec![0; MemWindow::Dram0.size()],
                    vec![0; MemWindow::Dram1.size()],
                ],
                inbound: std::array::from_fn(|_| VecDeque::new()),
                pending: [false; CHANNELS],
                irq_enabled: false,
                irq_masked: [false; 2],
                outbound_level: [0; CHANNELS],
                sent: Vec::new(),
                dma: None,
            }),
            handlers: Mutex::new([None, None]),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal an operation and fail it if injection was requested.
    fn op(&self, name: &str) -> Result<()> {
        let mut st = self.lock();
        st.journal.push(name.to_owned());
        if st.fail_ops.remove(name) {
            return Err(DspError::Io {
                source: std::io::Error::other(format!("injected failure: {name}")),
            });
        }
        let gate = match &st.gated_op {
            Some((gated, gate)) if gated == name => Arc::clone(gate),
            _ => return Ok(()),
        };
        st.gated_op = None;
        // State lock released while blocked, so other threads keep running.
        drop(st);
        gate.pass();
        Ok(())
    }

    /// Make the next occurrence of the named operation fail.
    ///
    /// Operation names match the journal entries, e.g. `"clock_enable:bus"`
    /// or `"reset_deassert:cfg"`.
    pub fn fail_next(&self, op: &str) {
        self.lock().fail_ops.insert(op.to_owned());
    }

    /// Block the next occurrence of the named operation until the returned
    /// gate is released.
    pub fn gate_next(&self, op: &str) -> Arc<OpGate> {
        let gate = Arc::new(OpGate::default());
        self.lock().gated_op = Some((op.to_owned(), Arc::clone(&gate)));
        gate
    }

    /// Snapshot of every journaled operation, in call order.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// All words written to outbound FIFOs, in call order.
    pub fn sent(&self) -> Vec<(usize, u32)> {
        self.lock().sent.clone()
    }

    /// Force an outbound FIFO's reported fill level.
    pub fn set_outbound_level(&self, channel: usize, level: usize) {
        self.lock().outbound_level[channel] = level;
    }

    /// Queue a word on an inbound FIFO and set the channel's pending bit.
    pub fn push_inbound(&self, channel: usize, word: u32) {
        let mut st = self.lock();
        st.inbound[channel].push_back(word);
        st.pending[channel] = true;
    }

    /// Copy bytes into a memory window, as the running firmware would.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the window.
    pub fn window_fill(&self, window: MemWindow, offset: usize, data: &[u8]) {
        let mut st = self.lock();
        st.windows[window_index(window)][offset..offset + data.len()].copy_from_slice(data);
    }

    /// Copy bytes into the sample buffer, as the device DMA engine would.
    ///
    /// # Panics
    ///
    /// Panics if no buffer is allocated or the range exceeds it.
    pub fn dma_fill(&self, offset: usize, data: &[u8]) {
        let mut st = self.lock();
        let dma = st.dma.as_mut().expect("dma buffer not allocated");
        dma[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Whether the inbound interrupt sources are currently enabled.
    pub fn irqs_enabled(&self) -> bool {
        self.lock().irq_enabled
    }

    /// Whether a handler is currently attached to `line`.
    pub fn irq_registered(&self, line: IrqLine) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[irq_index(line)]
        .is_some()
    }

    /// Invoke the registered handler for `line` on the calling thread.
    ///
    /// Does nothing if the line is masked or no handler is attached.
    pub fn raise_irq(&self, line: IrqLine) {
        if self.lock().irq_masked[irq_index(line)] {
            return;
        }
        let handler = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)[irq_index(line)]
        .clone();
        if let Some(handler) = handler {
            handler.handle_irq(line);
        }
    }
}

impl Default for MockHal {
    fn default() -> Self {
        Self::new()
    }
}

impl DspHal for MockHal {
    fn clock_set_rate_exclusive(&self, rate_hz: u32) -> Result<()> {
        self.op(&format!("clock_set_rate_exclusive:{rate_hz}"))
    }

    fn clock_release_rate(&self) {
        let _ = self.op("clock_release_rate");
    }

    fn clock_enable(&self, line: ClockLine) -> Result<()> {
        self.op(&format!("clock_enable:{}", line.as_str()))
    }

    fn clock_disable(&self, line: ClockLine) {
        let _ = self.op(&format!("clock_disable:{}", line.as_str()));
    }

    fn reset_deassert(&self, line: ResetLine) -> Result<()> {
        self.op(&format!("reset_deassert:{}", line.as_str()))
    }

    fn reset_assert(&self, line: ResetLine) {
        let _ = self.op(&format!("reset_assert:{}", line.as_str()));
    }

    fn sram_remap(&self, map: SramMap) -> Result<()> {
        let name = match map {
            SramMap::HostLocal => "sram_remap:host",
            SramMap::DspLocal => "sram_remap:dsp",
        };
        self.op(name)
    }

    fn cfg_read(&self, offset: usize) -> u32 {
        self.lock().cfg_regs.get(&offset).copied().unwrap_or(0)
    }

    fn cfg_write(&self, offset: usize, value: u32) {
        self.lock().cfg_regs.insert(offset, value);
    }

    fn window_write(&self, window: MemWindow, offset: usize, data: &[u8]) -> Result<()> {
        let mut st = self.lock();
        let win = &mut st.windows[window_index(window)];
        let end = offset
            .checked_add(data.len())
            .filter(|&end| end <= win.len())
            .ok_or(DspError::InvalidAddress {
                addr: window.base() + offset as u32,
            })?;
        win[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn window_read(&self, window: MemWindow, offset: usize, buf: &mut [u8]) -> Result<()> {
        let st = self.lock();
        let win = &st.windows[window_index(window)];
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= win.len())
            .ok_or(DspError::InvalidAddress {
                addr: window.base() + offset as u32,
            })?;
        buf.copy_from_slice(&win[offset..end]);
        Ok(())
    }

    fn inbound_irq_status(&self) -> u32 {
        let st = self.lock();
        let mut status = 0;
        for ch in 0..CHANNELS {
            if st.pending[ch] {
                status |= msgbox::RD_IRQ_PEND_MASK << msgbox::rd_irq_pend_shift(ch);
            }
        }
        status
    }

    fn inbound_fifo_level(&self, channel: usize) -> usize {
        self.lock().inbound[channel].len()
    }

    fn inbound_fifo_read(&self, channel: usize) -> u32 {
        self.lock().inbound[channel].pop_front().unwrap_or(0)
    }

    fn inbound_clear_pending(&self, channel: usize) {
        self.lock().pending[channel] = false;
    }

    fn inbound_irq_enable_all(&self) {
        let mut st = self.lock();
        st.journal.push("irq_enable_all".to_owned());
        st.irq_enabled = true;
    }

    fn inbound_irq_disable_all(&self) {
        let mut st = self.lock();
        st.journal.push("irq_disable_all".to_owned());
        st.irq_enabled = false;
    }

    fn outbound_fifo_level(&self, channel: usize) -> usize {
        self.lock().outbound_level[channel]
    }

    fn outbound_fifo_write(&self, channel: usize, value: u32) {
        let mut st = self.lock();
        debug_assert!(st.outbound_level[channel] < FIFO_DEPTH);
        st.sent.push((channel, value));
    }

    fn irq_register(&self, line: IrqLine, handler: Arc<dyn IrqHandler>) -> Result<()> {
        self.op(&format!("irq_register:{line:?}"))?;
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut handlers[irq_index(line)];
        if slot.is_some() {
            return Err(DspError::config(format!("irq line {line:?} already claimed")));
        }
        *slot = Some(handler);
        drop(handlers);
        self.lock().irq_masked[irq_index(line)] = false;
        Ok(())
    }

    fn irq_mask(&self, line: IrqLine) {
        let mut st = self.lock();
        st.journal.push(format!("irq_mask:{line:?}"));
        st.irq_masked[irq_index(line)] = true;
    }

    fn irq_free(&self, line: IrqLine) {
        let _ = self.op(&format!("irq_free:{line:?}"));
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)[irq_index(line)] = None;
        self.lock().irq_masked[irq_index(line)] = false;
    }

    fn dma_alloc(&self, len: usize) -> Result<u32> {
        self.op("dma_alloc")?;
        self.lock().dma = Some(vec![0; len]);
        Ok(MOCK_DMA_ADDR)
    }

    fn dma_free(&self) {
        let _ = self.op("dma_free");
        self.lock().dma = None;
    }

    fn dma_read(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        let st = self.lock();
        let dma = st
            .dma
            .as_ref()
            .ok_or_else(|| DspError::config("no dma buffer allocated"))?;
        let end = offset
            .checked_add(buf.len())
            .filter(|&end| end <= dma.len())
            .ok_or(DspError::BufferTooSmall {
                needed: offset + buf.len(),
                got: dma.len(),
            })?;
        buf.copy_from_slice(&dma[offset..end]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_records_order() {
        let hal = MockHal::new();
        hal.clock_enable(ClockLine::Bus).unwrap();
        hal.reset_deassert(ResetLine::Cfg).unwrap();
        assert_eq!(hal.journal(), vec!["clock_enable:bus", "reset_deassert:cfg"]);
    }

    #[test]
    fn injected_failure_fires_once() {
        let hal = MockHal::new();
        hal.fail_next("clock_enable:bus");
        assert!(hal.clock_enable(ClockLine::Bus).is_err());
        assert!(hal.clock_enable(ClockLine::Bus).is_ok());
    }

    #[test]
    fn window_write_bounds_checked() {
        let hal = MockHal::new();
        let len = MemWindow::Dram0.size();
        assert!(hal.window_write(MemWindow::Dram0, len - 1, &[0, 0]).is_err());
        assert!(hal.window_write(MemWindow::Dram0, len - 2, &[0, 0]).is_ok());
    }

    #[test]
    fn pending_bits_reflect_pushes() {
        let hal = MockHal::new();
        hal.push_inbound(0, 0x11);
        hal.push_inbound(2, 0x22);
        let status = hal.inbound_irq_status();
        assert_ne!(status & (msgbox::RD_IRQ_PEND_MASK << msgbox::rd_irq_pend_shift(0)), 0);
        assert_ne!(status & (msgbox::RD_IRQ_PEND_MASK << msgbox::rd_irq_pend_shift(2)), 0);
        assert_eq!(status & (msgbox::RD_IRQ_PEND_MASK << msgbox::rd_irq_pend_shift(1)), 0);
    }
}
