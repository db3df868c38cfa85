//! DSP config register block.
//!
//! This block controls the core itself: run-stall, core clock enable, the
//! reset-vector selection, and the status word the fatal-error interrupt
//! handler inspects. Offsets are relative to the `cfg` register window.

/// Core control register.
pub const CTRL_REG0: usize = 0x0000;

/// Alternate reset vector address. Sampled by the core only while its reset
/// line is asserted, so a reload requires a reset pulse afterwards.
pub const ALT_RESET_VEC: usize = 0x0004;

/// Core status register.
pub const STAT_REG: usize = 0x0008;

/// `CTRL_REG0` bit definitions.
pub mod ctrl {
    /// Run-stall: halts core execution without resetting it.
    pub const RUN_STALL: u32 = 1 << 0;
    /// Core clock enable.
    pub const DSP_CLKEN: u32 = 1 << 1;
    /// Boot from [`super::ALT_RESET_VEC`] instead of the hardware default.
    pub const START_VEC_SEL: u32 = 1 << 2;
}

/// `STAT_REG` bit definitions.
pub mod stat {
    /// Core is parked in debug mode (OCD halt) rather than crashed.
    pub const DEBUG_MODE: u32 = 1 << 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets_distinct() {
        assert_ne!(CTRL_REG0, ALT_RESET_VEC);
        assert_ne!(ALT_RESET_VEC, STAT_REG);
    }

    #[test]
    fn ctrl_bits_disjoint() {
        assert_eq!(ctrl::RUN_STALL & ctrl::DSP_CLKEN, 0);
        assert_eq!(ctrl::DSP_CLKEN & ctrl::START_VEC_SEL, 0);
    }
}
