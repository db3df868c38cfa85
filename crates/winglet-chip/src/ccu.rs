//! Clock and reset controller bits used by the DSP bring-up sequence.
//!
//! Offsets are relative to the CCU register window handed to the driver.
//! The exact values must match the target SoC's clock tree; these are the
//! D1 positions the bring-up sequence touches.

/// DSP module clock register: source select, divider, and gate.
pub const DSP_CLK_REG: usize = 0x0C70;

/// DSP bus-gating/reset register.
pub const DSP_BGR_REG: usize = 0x0C7C;

/// Message-box bus-gating/reset register (both units).
pub const MSGBOX_BGR_REG: usize = 0x071C;

/// `DSP_CLK_REG` bit definitions.
pub mod dsp_clk {
    /// Module clock gate.
    pub const GATE: u32 = 1 << 31;
    /// Divider field mask (divide-by-N, minus one).
    pub const DIV_MASK: u32 = 0x1F;
}

/// `DSP_BGR_REG` bit definitions.
pub mod dsp_bgr {
    /// Bus clock gate for the DSP config peripheral.
    pub const BUS_GATE: u32 = 1 << 0;
    /// Core reset (active low: clear = in reset).
    pub const CORE_RST: u32 = 1 << 16;
    /// Config peripheral reset.
    pub const CFG_RST: u32 = 1 << 17;
    /// Debug peripheral reset.
    pub const DBG_RST: u32 = 1 << 18;
}

/// `MSGBOX_BGR_REG` bit definitions.
pub mod msgbox_bgr {
    /// CPU-side message-box clock gate.
    pub const CPU_GATE: u32 = 1 << 0;
    /// DSP-side message-box clock gate.
    pub const DSP_GATE: u32 = 1 << 1;
    /// CPU-side message-box reset.
    pub const CPU_RST: u32 = 1 << 16;
    /// DSP-side message-box reset.
    pub const DSP_RST: u32 = 1 << 17;
}

/// SRAM remap control register, relative to the system-control window.
pub const SRAM_REMAP_REG: usize = 0x0000;

/// `SRAM_REMAP_REG` bit definitions.
pub mod sram_remap {
    /// Remap select: set = host-local addressing, clear = DSP-local.
    pub const SEL_LOCAL: u32 = 1 << 0;
    /// Remap in progress; must clear before the new mapping is usable.
    pub const BUSY: u32 = 1 << 31;
}
