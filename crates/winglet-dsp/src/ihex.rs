//! Streaming Intel-HEX firmware decoder.
//!
//! Single-pass character state machine over the raw firmware bytes. Parsed
//! records are not buffered: data and start-address records are handed to a
//! [`RecordSink`] as they complete, so the image is never held decoded in
//! memory. A base-address accumulator (extended segment / extended linear
//! records) persists across records within one decode pass.
//!
//! Strictness follows the on-device loader: uppercase hex only, checksum
//! verified on every record, exactly one end-of-file record which must be
//! the final record of the stream.

use crate::error::{DspError, Result};
use thiserror::Error;

/// Highest record type value this decoder understands.
const RECORD_TYPE_MAX: u8 = 0x05;

/// Maximum payload length of a single record.
const RECORD_MAX_LEN: usize = 255;

/// Intel-HEX format violations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// A character that is not an uppercase hex digit inside a record.
    #[error("invalid hex character")]
    InvalidHexChar,
    /// The stream ended in the middle of a record.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// The stream ended without an end-of-file record.
    #[error("missing end-of-file record")]
    MissingEofRecord,
    /// A record start code was seen after the end-of-file record.
    #[error("record after EOF record")]
    RecordAfterEof,
    /// The record checksum did not match the accumulated sum.
    #[error("invalid checksum")]
    BadChecksum,
    /// Record type byte above [`RECORD_TYPE_MAX`].
    #[error("invalid record type {ty:#04x}")]
    BadRecordType {
        /// The offending type byte.
        ty: u8,
    },
    /// A typed record with a payload length the type does not allow.
    #[error("invalid {kind} record length {len}")]
    BadRecordLength {
        /// Human-readable record kind.
        kind: &'static str,
        /// Actual payload length.
        len: u8,
    },
    /// Start Segment Address records are not supported by this loader.
    #[error("unsupported record type: start segment address")]
    StartSegmentUnsupported,
}

/// Receiver for decoded firmware instructions.
///
/// Any error returned from a handler aborts the decode immediately and is
/// propagated unchanged to the caller of [`decode`].
pub trait RecordSink {
    /// A data record: write `data` at the absolute address `addr`.
    ///
    /// # Errors
    ///
    /// Implementations reject addresses outside their writable ranges.
    fn data(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// A start-linear-address record: the core's entry vector.
    ///
    /// # Errors
    ///
    /// Implementations reject vectors outside executable memory.
    fn start_address(&mut self, addr: u32) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitStart,
    ByteCount,
    AddressHigh,
    AddressLow,
    RecordType,
    Data,
    Checksum,
}

fn hex_val(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Pull one two-character hex byte from the stream.
fn take_hex_byte(data: &[u8], i: &mut usize) -> std::result::Result<u8, DecodeError> {
    let hi = *data.get(*i).ok_or(DecodeError::UnexpectedEof)?;
    let hi = hex_val(hi).ok_or(DecodeError::InvalidHexChar)?;
    let lo = *data.get(*i + 1).ok_or(DecodeError::UnexpectedEof)?;
    let lo = hex_val(lo).ok_or(DecodeError::InvalidHexChar)?;
    *i += 2;
    Ok(hi << 4 | lo)
}

/// Decode an Intel-HEX stream, feeding records into `sink`.
///
/// Returns the number of records decoded. Characters between records are
/// ignored (line endings, comments before the first start code), but once
/// the end-of-file record has been seen any further record is an error.
///
/// # Errors
///
/// Returns [`DspError::Decode`] for any format violation, carrying the
/// 1-based index of the offending record; handler errors from the sink are
/// propagated unchanged.
pub fn decode<S: RecordSink>(data: &[u8], sink: &mut S) -> Result<u32> {
    let mut state = State::AwaitStart;
    let mut records: u32 = 0;
    let mut base: u32 = 0;
    let mut seen_eof = false;

    // Per-record state.
    let mut byte_count: u8 = 0;
    let mut offset: u16 = 0;
    let mut record_type: u8 = 0;
    let mut sum: u8 = 0;
    let mut payload = [0u8; RECORD_MAX_LEN];
    let mut payload_idx: usize = 0;

    let fail = |records: u32, e: DecodeError| DspError::Decode {
        record: records,
        source: e,
    };

    let mut i = 0;
    while i < data.len() {
        if state == State::AwaitStart {
            // Everything before a start code is ignored.
            if data[i] == b':' {
                if seen_eof {
                    return Err(fail(records, DecodeError::RecordAfterEof));
                }
                records += 1;
                sum = 0;
                state = State::ByteCount;
            }
            i += 1;
            continue;
        }

        let byte = take_hex_byte(data, &mut i).map_err(|e| fail(records, e))?;
        sum = sum.wrapping_add(byte);

        match state {
            State::AwaitStart => unreachable!("handled above"),
            State::ByteCount => {
                byte_count = byte;
                state = State::AddressHigh;
            }
            State::AddressHigh => {
                offset = u16::from(byte) << 8;
                state = State::AddressLow;
            }
            State::AddressLow => {
                offset |= u16::from(byte);
                state = State::RecordType;
            }
            State::RecordType => {
                if byte > RECORD_TYPE_MAX {
                    return Err(fail(records, DecodeError::BadRecordType { ty: byte }));
                }
                record_type = byte;
                payload_idx = 0;
                state = if byte_count > 0 {
                    State::Data
                } else {
                    State::Checksum
                };
            }
            State::Data => {
                payload[payload_idx] = byte;
                payload_idx += 1;
                if payload_idx == byte_count as usize {
                    state = State::Checksum;
                }
            }
            State::Checksum => {
                // The checksum byte itself was folded into `sum` above, so a
                // valid record leaves the accumulator at zero.
                if sum != 0 {
                    return Err(fail(records, DecodeError::BadChecksum));
                }
                handle_record(
                    record_type,
                    byte_count,
                    offset,
                    &payload[..byte_count as usize],
                    &mut base,
                    &mut seen_eof,
                    sink,
                )
                .map_err(|e| match e {
                    RecordFailure::Format(e) => fail(records, e),
                    RecordFailure::Sink(e) => e,
                })?;
                state = State::AwaitStart;
            }
        }
    }

    if state != State::AwaitStart {
        return Err(fail(records, DecodeError::UnexpectedEof));
    }
    if !seen_eof {
        return Err(fail(records, DecodeError::MissingEofRecord));
    }

    Ok(records)
}

enum RecordFailure {
    Format(DecodeError),
    Sink(DspError),
}

impl From<DecodeError> for RecordFailure {
    fn from(e: DecodeError) -> Self {
        Self::Format(e)
    }
}

fn handle_record<S: RecordSink>(
    record_type: u8,
    len: u8,
    offset: u16,
    payload: &[u8],
    base: &mut u32,
    seen_eof: &mut bool,
    sink: &mut S,
) -> std::result::Result<(), RecordFailure> {
    match record_type {
        // Data: empty records are accepted and ignored.
        0x00 => {
            if len > 0 {
                sink.data(*base + u32::from(offset), payload)
                    .map_err(RecordFailure::Sink)?;
            }
        }
        // End of file.
        0x01 => {
            if len != 0 {
                return Err(DecodeError::BadRecordLength { kind: "EOF", len }.into());
            }
            *seen_eof = true;
        }
        // Extended segment address: 16-bit word times 16 becomes the base.
        0x02 => {
            if len != 2 {
                return Err(DecodeError::BadRecordLength {
                    kind: "extended segment address",
                    len,
                }
                .into());
            }
            *base = u32::from(u16::from_be_bytes([payload[0], payload[1]])) * 16;
        }
        // Start segment address: never produced for this core.
        0x03 => return Err(DecodeError::StartSegmentUnsupported.into()),
        // Extended linear address: 16-bit word becomes the upper half of
        // the base; the low 16 bits are cleared.
        0x04 => {
            if len != 2 {
                return Err(DecodeError::BadRecordLength {
                    kind: "extended linear address",
                    len,
                }
                .into());
            }
            *base = u32::from(u16::from_be_bytes([payload[0], payload[1]])) << 16;
        }
        // Start linear address: 32-bit big-endian entry vector.
        0x05 => {
            if len != 4 {
                return Err(DecodeError::BadRecordLength {
                    kind: "start linear address",
                    len,
                }
                .into());
            }
            let addr = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            sink.start_address(addr).map_err(RecordFailure::Sink)?;
        }
        _ => unreachable!("record type validated in the state machine"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Recording sink capturing every handler invocation.
    #[derive(Default)]
    struct Recorder {
        data: Vec<(u32, Vec<u8>)>,
        starts: Vec<u32>,
        fail_data: bool,
    }

    impl RecordSink for Recorder {
        fn data(&mut self, addr: u32, data: &[u8]) -> Result<()> {
            if self.fail_data {
                return Err(DspError::InvalidAddress { addr });
            }
            self.data.push((addr, data.to_vec()));
            Ok(())
        }

        fn start_address(&mut self, addr: u32) -> Result<()> {
            self.starts.push(addr);
            Ok(())
        }
    }

    /// Build one record line with a correct checksum.
    fn rec(offset: u16, ty: u8, payload: &[u8]) -> String {
        let mut sum = payload.len() as u8;
        sum = sum
            .wrapping_add((offset >> 8) as u8)
            .wrapping_add(offset as u8)
            .wrapping_add(ty);
        for &b in payload {
            sum = sum.wrapping_add(b);
        }
        let mut line = format!(":{:02X}{:04X}{:02X}", payload.len(), offset, ty);
        for &b in payload {
            line.push_str(&format!("{b:02X}"));
        }
        line.push_str(&format!("{:02X}\n", sum.wrapping_neg()));
        line
    }

    const EOF: &str = ":00000001FF\n";

    fn decode_err(image: &str) -> DecodeError {
        let mut sink = Recorder::default();
        match decode(image.as_bytes(), &mut sink) {
            Err(DspError::Decode { source, .. }) => source,
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn simple_data_records() {
        let image = format!(
            "{}{}{}",
            rec(0x0100, 0x00, &[0xDE, 0xAD]),
            rec(0x0200, 0x00, &[0xBE, 0xEF]),
            EOF
        );
        let mut sink = Recorder::default();
        let count = decode(image.as_bytes(), &mut sink).unwrap();
        assert_eq!(count, 3);
        assert_eq!(
            sink.data,
            vec![(0x100, vec![0xDE, 0xAD]), (0x200, vec![0xBE, 0xEF])]
        );
    }

    #[test]
    fn junk_between_records_is_ignored() {
        let image = format!("junk\r\n{}more junk{}", rec(0, 0x00, &[0x01]), EOF);
        let mut sink = Recorder::default();
        assert_eq!(decode(image.as_bytes(), &mut sink).unwrap(), 2);
        assert_eq!(sink.data.len(), 1);
    }

    #[test]
    fn missing_eof_record_fails() {
        let image = rec(0, 0x00, &[0x01]);
        assert_eq!(decode_err(&image), DecodeError::MissingEofRecord);
    }

    #[test]
    fn empty_stream_fails() {
        assert_eq!(decode_err(""), DecodeError::MissingEofRecord);
    }

    #[test]
    fn record_after_eof_fails() {
        let image = format!("{}{}", EOF, rec(0, 0x00, &[0x01]));
        assert_eq!(decode_err(&image), DecodeError::RecordAfterEof);
    }

    #[test]
    fn corrupt_checksum_invokes_no_handler() {
        // Same record as rec(0, 0x00, &[0x01]) but with the checksum off
        // by one.
        let image = format!(":0100000001FD\n{EOF}");
        let mut sink = Recorder::default();
        let err = decode(image.as_bytes(), &mut sink);
        assert!(matches!(
            err,
            Err(DspError::Decode {
                source: DecodeError::BadChecksum,
                ..
            })
        ));
        assert!(sink.data.is_empty(), "no handler call for a bad record");
    }

    #[test]
    fn extended_segment_address_scales_by_16() {
        let image = format!(
            "{}{}{}",
            rec(0, 0x02, &[0x10, 0x00]),
            rec(0x0004, 0x00, &[0xAA]),
            EOF
        );
        let mut sink = Recorder::default();
        decode(image.as_bytes(), &mut sink).unwrap();
        assert_eq!(sink.data, vec![(0x0001_0004, vec![0xAA])]);
    }

    #[test]
    fn extended_linear_address_shifts_by_16() {
        let image = format!(
            "{}{}{}",
            rec(0, 0x04, &[0x10, 0x00]),
            rec(0x0004, 0x00, &[0xAA]),
            EOF
        );
        let mut sink = Recorder::default();
        decode(image.as_bytes(), &mut sink).unwrap();
        assert_eq!(sink.data, vec![(0x1000_0004, vec![0xAA])]);
    }

    #[test]
    fn base_persists_across_records() {
        let image = format!(
            "{}{}{}{}",
            rec(0, 0x04, &[0x00, 0x40]),
            rec(0x0000, 0x00, &[0x01]),
            rec(0x0100, 0x00, &[0x02]),
            EOF
        );
        let mut sink = Recorder::default();
        decode(image.as_bytes(), &mut sink).unwrap();
        assert_eq!(
            sink.data,
            vec![(0x0040_0000, vec![0x01]), (0x0040_0100, vec![0x02])]
        );
    }

    #[test]
    fn start_linear_address_invokes_handler() {
        let image = format!("{}{}", rec(0, 0x05, &[0x00, 0x40, 0x00, 0x10]), EOF);
        let mut sink = Recorder::default();
        decode(image.as_bytes(), &mut sink).unwrap();
        assert_eq!(sink.starts, vec![0x0040_0010]);
    }

    #[test]
    fn start_segment_address_is_rejected() {
        let image = format!("{}{}", rec(0, 0x03, &[0x00, 0x00, 0x00, 0x00]), EOF);
        assert_eq!(decode_err(&image), DecodeError::StartSegmentUnsupported);
    }

    #[test]
    fn record_type_above_max_fails() {
        let image = format!("{}{}", rec(0, 0x06, &[]), EOF);
        assert_eq!(decode_err(&image), DecodeError::BadRecordType { ty: 6 });
    }

    #[test]
    fn eof_with_payload_fails() {
        let image = rec(0, 0x01, &[0x00]);
        assert_eq!(
            decode_err(&image),
            DecodeError::BadRecordLength {
                kind: "EOF",
                len: 1
            }
        );
    }

    #[test]
    fn wrong_extended_address_length_fails() {
        let image = format!("{}{}", rec(0, 0x04, &[0x10]), EOF);
        assert_eq!(
            decode_err(&image),
            DecodeError::BadRecordLength {
                kind: "extended linear address",
                len: 1
            }
        );
    }

    #[test]
    fn empty_data_record_is_ignored() {
        let image = format!("{}{}", rec(0x1234, 0x00, &[]), EOF);
        let mut sink = Recorder::default();
        assert_eq!(decode(image.as_bytes(), &mut sink).unwrap(), 2);
        assert!(sink.data.is_empty());
    }

    #[test]
    fn truncated_record_fails() {
        assert_eq!(decode_err(":0200"), DecodeError::UnexpectedEof);
    }

    #[test]
    fn lowercase_hex_is_rejected() {
        assert_eq!(decode_err(":0a000001f5\n"), DecodeError::InvalidHexChar);
    }

    #[test]
    fn sink_error_aborts_decode() {
        let image = format!(
            "{}{}{}",
            rec(0x0000, 0x00, &[0x01]),
            rec(0x0100, 0x00, &[0x02]),
            EOF
        );
        let mut sink = Recorder {
            fail_data: true,
            ..Recorder::default()
        };
        let err = decode(image.as_bytes(), &mut sink);
        assert!(matches!(err, Err(DspError::InvalidAddress { addr: 0 })));
        assert!(sink.data.is_empty());
    }

    #[test]
    fn error_reports_record_index() {
        let image = format!("{}{}", rec(0, 0x00, &[0x01]), rec(0, 0x06, &[]));
        let mut sink = Recorder::default();
        match decode(image.as_bytes(), &mut sink) {
            Err(DspError::Decode { record, .. }) => assert_eq!(record, 2),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
