//! `winglet` — command-line interface for the winglet ADSB receiver.
//!
//! ```text
//! USAGE:
//!   winglet info                     Show the DSP memory map and defaults
//!   winglet listen [-n N]            Print decoded ADSB messages
//!   winglet capture --len N <file>   Bulk-capture raw samples to a file
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use winglet_chip::mem::{MemWindow, SAMPLE_BUF_LEN};
use winglet_dsp::hal::uio::{UioConfig, UioHal};
use winglet_dsp::{
    AdsbReceiver, ControllerConfig, MinorAllocator, ReceiverConfig, DEFAULT_FIRMWARE, MAX_DEVICES,
};

#[derive(Parser)]
#[command(name = "winglet", about = "winglet ADSB receiver CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

/// Hardware binding and firmware options shared by the device commands.
#[derive(Args)]
struct DeviceArgs {
    /// Main UIO node with the register and memory maps.
    #[arg(long, default_value = "/dev/uio0")]
    uio: PathBuf,

    /// UIO node delivering the fatal-error interrupt.
    #[arg(long, default_value = "/dev/uio1")]
    fatal_irq: PathBuf,

    /// UIO node delivering the inbound message-box interrupt.
    #[arg(long, default_value = "/dev/uio2")]
    mailbox_irq: PathBuf,

    /// Bus address of the reserved sample buffer (hex accepted).
    #[arg(long, default_value = "0x48000000", value_parser = parse_u32)]
    sample_buf_addr: u32,

    /// Firmware blob name.
    #[arg(long, default_value = DEFAULT_FIRMWARE)]
    firmware: String,

    /// Extra firmware search directory (may repeat; searched first).
    #[arg(long = "firmware-dir")]
    firmware_dirs: Vec<PathBuf>,

    /// DSP core clock rate in Hz.
    #[arg(long, default_value_t = 600_000_000)]
    clock_rate: u32,
}

#[derive(Subcommand)]
enum Cmd {
    /// Show the DSP memory map and driver defaults.
    Info,
    /// Open the receiver and print decoded ADSB messages.
    Listen {
        #[command(flatten)]
        device: DeviceArgs,
        /// Stop after this many messages (default: run until killed).
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },
    /// Bulk-capture raw samples through test mode.
    Capture {
        #[command(flatten)]
        device: DeviceArgs,
        /// Number of sample bytes to capture.
        #[arg(long)]
        len: usize,
        /// Output file.
        out: PathBuf,
    },
}

fn parse_u32(s: &str) -> Result<u32, std::num::ParseIntError> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Info => cmd_info(),
        Cmd::Listen { device, count } => cmd_listen(&device, count),
        Cmd::Capture { device, len, out } => cmd_capture(&device, len, &out),
    }
}

fn open_receiver(args: &DeviceArgs) -> Result<AdsbReceiver> {
    let hal = UioHal::open(&UioConfig {
        device: args.uio.clone(),
        fatal_irq: args.fatal_irq.clone(),
        mailbox_irq: args.mailbox_irq.clone(),
        sample_buf_addr: args.sample_buf_addr,
    })
    .with_context(|| format!("opening UIO binding {}", args.uio.display()))?;

    let mut firmware_dirs = args.firmware_dirs.clone();
    firmware_dirs.extend(winglet_dsp::default_search_path());

    let config = ReceiverConfig {
        firmware: args.firmware.clone(),
        controller: ControllerConfig {
            clock_rate_hz: args.clock_rate,
            firmware_dirs,
        },
    };
    let minors = Arc::new(MinorAllocator::new(MAX_DEVICES));
    let rx = AdsbReceiver::new(Arc::new(hal), config, minors)?;
    rx.open().context("DSP bring-up failed")?;
    Ok(rx)
}

fn cmd_info() -> Result<()> {
    println!("DSP memory map:");
    for window in MemWindow::ALL {
        println!(
            "  {:?}\t{:#010x}  {:>3} KiB",
            window,
            window.base(),
            window.size() / 1024
        );
    }
    println!();
    println!("Sample buffer  {} MiB", SAMPLE_BUF_LEN / (1024 * 1024));
    println!("Firmware       {DEFAULT_FIRMWARE}");
    println!("Search path:");
    for dir in winglet_dsp::default_search_path() {
        println!("  {}", dir.display());
    }
    Ok(())
}

fn cmd_listen(args: &DeviceArgs, count: Option<u64>) -> Result<()> {
    let rx = open_receiver(args)?;

    let mut seen = 0u64;
    let mut buf = [0u8; 14];
    loop {
        let len = rx.read(&mut buf)?;
        let body = &buf[..len];
        let kind = if len == 7 { "short" } else { "long " };
        print!("{kind} ");
        for b in body {
            print!("{b:02x}");
        }
        println!();

        seen += 1;
        if count.is_some_and(|n| seen >= n) {
            break;
        }
    }

    rx.close();
    Ok(())
}

fn cmd_capture(args: &DeviceArgs, len: usize, out: &PathBuf) -> Result<()> {
    anyhow::ensure!(len > 0, "capture length must be non-zero");
    anyhow::ensure!(
        len <= SAMPLE_BUF_LEN,
        "capture length exceeds the {SAMPLE_BUF_LEN}-byte sample buffer"
    );

    let rx = open_receiver(args)?;
    rx.set_test_mode(true);

    let mut samples = vec![0u8; len];
    let got = rx.read(&mut samples)?;
    samples.truncate(got);

    let mut file =
        std::fs::File::create(out).with_context(|| format!("creating {}", out.display()))?;
    file.write_all(&samples)?;
    println!("captured {got} bytes to {}", out.display());

    rx.close();
    Ok(())
}
