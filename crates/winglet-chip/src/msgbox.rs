//! Message-box register layout.
//!
//! The message box is a pair of mirrored hardware units, one per bus master.
//! Each unit exposes [`CHANNELS`] FIFO channels of depth [`FIFO_DEPTH`];
//! the CPU-side unit receives words the DSP wrote, the DSP-side unit
//! receives words the CPU wrote. Offsets below are relative to either
//! unit's register window.

/// Number of FIFO channels per message-box unit.
pub const CHANNELS: usize = 4;

/// Hardware FIFO depth per channel, in 32-bit words.
pub const FIFO_DEPTH: usize = 8;

/// Read-side interrupt enable register.
pub const READ_IRQ_ENABLE: usize = 0x0020;

/// Read-side interrupt status register. Pending bits can only be cleared
/// once the corresponding FIFO has been fully drained.
pub const READ_IRQ_STATUS: usize = 0x0024;

/// Value enabling the read interrupt for every channel (pend/enable bits
/// sit at even positions, two per channel).
pub const READ_IRQ_ENABLE_ALL: u32 = 0x55;

/// Mask for a single channel's read-pending bit.
pub const RD_IRQ_PEND_MASK: u32 = 0x1;

/// Mask for the FIFO fill level field of a message-status register.
pub const MSG_NUM_MASK: u32 = 0xF;

/// Shift for the FIFO fill level field.
pub const MSG_NUM_SHIFT: u32 = 0;

/// Bit position of `channel`'s read-pending bit within
/// [`READ_IRQ_STATUS`] / [`READ_IRQ_ENABLE`].
#[must_use]
pub const fn rd_irq_pend_shift(channel: usize) -> u32 {
    (channel as u32) * 2
}

/// Offset of `channel`'s message-status register (FIFO fill level).
#[must_use]
pub const fn msg_status(channel: usize) -> usize {
    0x0040 + channel * 4
}

/// Offset of `channel`'s message FIFO register.
#[must_use]
pub const fn msg_fifo(channel: usize) -> usize {
    0x0050 + channel * 4
}
