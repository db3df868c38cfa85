//! Silicon model of the Allwinner D1 HiFi4 DSP subsystem.
//!
//! This crate has **no dependencies** and **no hardware access** — it is a
//! pure model of the silicon: DSP config register offsets and bit positions,
//! the message-box register layout, the SRAM window map seen from the DSP,
//! and the clock/reset controller bits the bring-up sequence touches.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`cfg`] | DSP config block — control/status/reset-vector registers |
//! | [`msgbox`] | Message-box layout — channels, FIFO depth, IRQ bits |
//! | [`mem`] | SRAM windows (IRAM, DRAM0, DRAM1) and the sample buffer |
//! | [`ccu`] | Clock gates, reset lines, and the SRAM remap switch |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ccu;
pub mod cfg;
pub mod mem;
pub mod msgbox;
