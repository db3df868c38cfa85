//! SRAM window map, as seen from the DSP.
//!
//! The DSP addresses three local SRAM windows: 64 KiB of instruction RAM and
//! two 32 KiB data RAM banks. Firmware data records must land entirely
//! inside one of these windows; sample records handed back over the mailbox
//! carry DSP-local addresses inside one of the data banks.

/// Size of the DMA-coherent sample buffer shared with the DSP.
pub const SAMPLE_BUF_LEN: usize = 0x40_0000;

/// One of the DSP's local SRAM windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemWindow {
    /// Instruction RAM, 64 KiB.
    Iram,
    /// Data RAM bank 0, 32 KiB.
    Dram0,
    /// Data RAM bank 1, 32 KiB.
    Dram1,
}

impl MemWindow {
    /// All windows, in address order.
    pub const ALL: [Self; 3] = [Self::Iram, Self::Dram0, Self::Dram1];

    /// Base address of the window in the DSP's address space.
    #[must_use]
    pub const fn base(self) -> u32 {
        match self {
            Self::Iram => 0x0040_0000,
            Self::Dram0 => 0x0042_0000,
            Self::Dram1 => 0x0044_0000,
        }
    }

    /// Window size in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Iram => 64 * 1024,
            Self::Dram0 => 32 * 1024,
            Self::Dram1 => 32 * 1024,
        }
    }

    /// Whether `[addr, addr + len)` lies entirely inside this window.
    #[must_use]
    pub const fn contains(self, addr: u32, len: usize) -> bool {
        let base = self.base();
        addr >= base && (addr - base) as usize + len <= self.size()
    }
}

/// Locate the window covering `[addr, addr + len)` and return it together
/// with the byte offset of `addr` inside the window. Ranges straddling a
/// window boundary are rejected.
#[must_use]
pub fn locate(addr: u32, len: usize) -> Option<(MemWindow, usize)> {
    MemWindow::ALL
        .into_iter()
        .find(|w| w.contains(addr, len))
        .map(|w| (w, (addr - w.base()) as usize))
}

/// Like [`locate`], but restricted to the two data RAM banks. Used for
/// translating sample addresses the DSP hands back over the mailbox.
#[must_use]
pub fn locate_data(addr: u32, len: usize) -> Option<(MemWindow, usize)> {
    [MemWindow::Dram0, MemWindow::Dram1]
        .into_iter()
        .find(|w| w.contains(addr, len))
        .map(|w| (w, (addr - w.base()) as usize))
}
