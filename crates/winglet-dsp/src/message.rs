//! ADSB message record as produced by the DSP firmware.

/// Metadata bit marking an extended (14-byte) message.
pub const MSG_FLAG_LONG: u16 = 0x8000;

/// Body length of an extended message.
pub const MSG_LEN_LONG: usize = 14;

/// Body length of a short message.
pub const MSG_LEN_SHORT: usize = 7;

/// One decoded ADSB message, exactly as laid out in DSP data RAM: a 16-bit
/// metadata word followed by a 14-byte payload. The logical body is 7 or 14
/// bytes depending on the long-message flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdsbMessage {
    /// Metadata word; bit 15 selects the long body.
    pub metadata: u16,
    /// Raw payload; only the first [`Self::body_len`] bytes are meaningful.
    pub payload: [u8; MSG_LEN_LONG],
}

impl AdsbMessage {
    /// On-wire size of one record in DSP data RAM.
    pub const WIRE_LEN: usize = 16;

    /// Decode a record from its in-memory representation.
    #[must_use]
    pub fn from_wire(bytes: [u8; Self::WIRE_LEN]) -> Self {
        let metadata = u16::from_le_bytes([bytes[0], bytes[1]]);
        let mut payload = [0u8; MSG_LEN_LONG];
        payload.copy_from_slice(&bytes[2..]);
        Self { metadata, payload }
    }

    /// An all-zero record; used as the capture-complete marker in test mode.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            metadata: 0,
            payload: [0; MSG_LEN_LONG],
        }
    }

    /// Whether the long-message flag is set.
    #[must_use]
    pub const fn is_long(&self) -> bool {
        self.metadata & MSG_FLAG_LONG != 0
    }

    /// Logical body length: 7 or 14 bytes.
    #[must_use]
    pub const fn body_len(&self) -> usize {
        if self.is_long() {
            MSG_LEN_LONG
        } else {
            MSG_LEN_SHORT
        }
    }

    /// The logical message body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.payload[..self.body_len()]
    }
}
