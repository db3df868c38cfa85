//! End-to-end receiver tests over the simulated hardware.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use winglet_dsp::hal::mock::{MockHal, MOCK_DMA_ADDR};
use winglet_dsp::hal::{DspHal, IrqLine};
use winglet_dsp::{
    AdsbReceiver, ControllerConfig, DspError, MinorAllocator, ReceiverConfig, AdsbMessage,
    CAPTURE_COMPLETE, CONTROL_CHANNEL, MAX_DEVICES,
};
use winglet_chip::mem::MemWindow;

/// Minimal valid firmware: one code word in instruction RAM.
const FIRMWARE: &str = concat!(
    ":020000040040BA\n",
    ":04000000AABBCCDDEE\n",
    ":00000001FF\n"
);

fn make_receiver() -> (Arc<MockHal>, Arc<AdsbReceiver>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("dsp0.hex"), FIRMWARE).unwrap();
    let hal = Arc::new(MockHal::new());
    let config = ReceiverConfig {
        firmware: "dsp0.hex".to_owned(),
        controller: ControllerConfig {
            clock_rate_hz: 600_000_000,
            firmware_dirs: vec![dir.path().to_owned()],
        },
    };
    let minors = Arc::new(MinorAllocator::new(MAX_DEVICES));
    let rx = Arc::new(
        AdsbReceiver::new(Arc::clone(&hal) as Arc<dyn DspHal>, config, minors).unwrap(),
    );
    (hal, rx, dir)
}

/// Place one message record in DRAM bank 0 and announce it.
fn inject_message(hal: &MockHal, offset: usize, metadata: u16, body: &[u8]) -> u32 {
    let mut wire = [0u8; AdsbMessage::WIRE_LEN];
    wire[..2].copy_from_slice(&metadata.to_le_bytes());
    wire[2..2 + body.len()].copy_from_slice(body);
    hal.window_fill(MemWindow::Dram0, offset, &wire);
    let addr = MemWindow::Dram0.base() + offset as u32;
    hal.push_inbound(CONTROL_CHANNEL, addr);
    hal.raise_irq(IrqLine::InboundMsgbox);
    addr
}

fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(start.elapsed() < deadline, "condition not met in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn open_brings_up_and_sends_sample_buffer() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    assert!(hal.irqs_enabled());
    assert_eq!(hal.sent(), vec![(CONTROL_CHANNEL, MOCK_DMA_ADDR)]);
    rx.close();
    assert!(!hal.irqs_enabled());
    assert!(!hal.irq_registered(IrqLine::InboundMsgbox));
}

#[test]
fn read_returns_short_message_body() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();

    let body = [0x8D, 0x48, 0x40, 0xD6, 0x20, 0x2C, 0xC3];
    let addr = inject_message(&hal, 0x100, 0x0000, &body);
    assert!(rx.poll_ready());

    let mut buf = [0u8; 14];
    let len = rx.read(&mut buf).unwrap();
    assert_eq!(len, 7);
    assert_eq!(&buf[..7], &body);

    // The record address was echoed back as the acknowledgement.
    assert_eq!(hal.sent()[1], (CONTROL_CHANNEL, addr));
    rx.close();
}

#[test]
fn read_returns_long_message_body() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();

    let body: Vec<u8> = (1..=14).collect();
    inject_message(&hal, 0x200, 0x8000, &body);

    let mut buf = [0u8; 14];
    let len = rx.read(&mut buf).unwrap();
    assert_eq!(len, 14);
    assert_eq!(&buf[..], &body[..]);
    rx.close();
}

#[test]
fn short_buffer_is_invalid() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    inject_message(&hal, 0x100, 0x8000, &[0u8; 14]);

    let mut buf = [0u8; 7];
    assert!(matches!(
        rx.read(&mut buf),
        Err(DspError::BufferTooSmall { needed: 14, got: 7 })
    ));
    rx.close();
}

#[test]
fn message_outside_data_ram_is_dropped() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    // Announce an address in instruction RAM; the callback must drop it.
    hal.push_inbound(CONTROL_CHANNEL, MemWindow::Iram.base());
    hal.raise_irq(IrqLine::InboundMsgbox);
    assert!(!rx.poll_ready());
    rx.close();
}

#[test]
fn stale_messages_do_not_survive_reopen() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    inject_message(&hal, 0x100, 0x0000, &[1, 2, 3, 4, 5, 6, 7]);
    assert!(rx.poll_ready());
    rx.close();
    rx.open().unwrap();
    assert!(!rx.poll_ready());
    rx.close();
}

#[test]
fn close_interrupts_blocked_reader() {
    let (_hal, rx, _dir) = make_receiver();
    rx.open().unwrap();

    let reader = Arc::clone(&rx);
    let handle = thread::spawn(move || {
        let mut buf = [0u8; 14];
        reader.read(&mut buf)
    });
    thread::sleep(Duration::from_millis(30));
    rx.close();
    assert!(matches!(handle.join().unwrap(), Err(DspError::Interrupted)));
}

#[test]
fn second_open_shares_the_session() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    let enables_after_first = hal.journal().len();
    rx.open().unwrap();
    assert_eq!(hal.journal().len(), enables_after_first);
    rx.close();
    // Still open once; the DSP stays up.
    assert!(hal.irqs_enabled());
    rx.close();
    assert!(!hal.irqs_enabled());
}

#[test]
fn test_mode_capture_reads_sample_buffer() {
    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    rx.set_test_mode(true);

    let reader = Arc::clone(&rx);
    let handle = thread::spawn(move || {
        // Odd length: the capture rounds down to 10 bytes.
        let mut buf = [0u8; 11];
        let len = reader.read(&mut buf)?;
        Ok::<_, DspError>((len, buf))
    });

    // Wait for the capture request (the second control-channel send).
    wait_until(Duration::from_secs(2), || hal.sent().len() >= 2);
    assert_eq!(hal.sent()[1], (CONTROL_CHANNEL, 10));

    let samples: Vec<u8> = (0..10).map(|i| i * 3).collect();
    hal.dma_fill(0, &samples);
    hal.push_inbound(CONTROL_CHANNEL, CAPTURE_COMPLETE);
    hal.raise_irq(IrqLine::InboundMsgbox);

    let (len, buf) = handle.join().unwrap().unwrap();
    assert_eq!(len, 10);
    assert_eq!(&buf[..10], &samples[..]);
    rx.close();
}

#[test]
fn test_mode_capture_caps_at_sample_buffer() {
    use winglet_chip::mem::SAMPLE_BUF_LEN;

    let (hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    rx.set_test_mode(true);

    let reader = Arc::clone(&rx);
    let handle = thread::spawn(move || {
        let mut buf = vec![0u8; SAMPLE_BUF_LEN + 3];
        reader.read(&mut buf)
    });

    wait_until(Duration::from_secs(2), || hal.sent().len() >= 2);
    assert_eq!(hal.sent()[1], (CONTROL_CHANNEL, SAMPLE_BUF_LEN as u32));

    hal.push_inbound(CONTROL_CHANNEL, CAPTURE_COMPLETE);
    hal.raise_irq(IrqLine::InboundMsgbox);
    assert_eq!(handle.join().unwrap().unwrap(), SAMPLE_BUF_LEN);
    rx.close();
}

#[test]
fn zero_length_test_mode_read_is_empty() {
    let (_hal, rx, _dir) = make_receiver();
    rx.open().unwrap();
    rx.set_test_mode(true);
    let mut buf = [0u8; 1];
    // One byte rounds down to zero; no capture is requested.
    assert_eq!(rx.read(&mut buf[..1]).unwrap(), 0);
    rx.close();
}
