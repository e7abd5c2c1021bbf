//! Normalized traffic frame representation
//!
//! A [`Frame`] is one burst on one timeslot, decoded from the `DMRD`
//! datagram that carries it. Every link speaks the same wire format, so the
//! gateway core only ever handles `Frame` values and copies them between
//! components.

use std::fmt;

/// Length of the raw burst carried in every frame
pub const PAYLOAD_LEN: usize = 33;

/// Largest 24-bit radio address
pub const MAX_ID: u32 = 0x00FF_FFFF;

/// Address meaning "all"
pub const WILDCARD_ID: u32 = 0x00FF_FFFF;

/// Raw burst bytes
pub type Payload = [u8; PAYLOAD_LEN];

/// One of the two TDMA timeslots of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub enum Slot {
    /// Timeslot 1
    One,
    /// Timeslot 2
    Two,
}

impl Slot {
    /// Both slots, in order
    pub const ALL: [Slot; 2] = [Slot::One, Slot::Two];

    /// Slot number as used in configuration and on air (1 or 2)
    pub fn number(&self) -> u8 {
        match self {
            Slot::One => 1,
            Slot::Two => 2,
        }
    }

    /// Zero-based index for per-slot tables
    pub fn index(&self) -> usize {
        match self {
            Slot::One => 0,
            Slot::Two => 1,
        }
    }

    /// Parse a slot number
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Slot::One),
            2 => Some(Slot::Two),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Slot {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Slot::from_number(n).ok_or_else(|| format!("invalid slot {n}, expected 1 or 2"))
    }
}

impl From<Slot> for u8 {
    fn from(slot: Slot) -> u8 {
        slot.number()
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TS{}", self.number())
    }
}

/// Call type carried in the link control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CallType {
    /// Talkgroup call
    Group,
    /// Individual (private) call
    Private,
}

impl CallType {
    /// Short prefix used in log lines ("TG" or "PC")
    pub fn prefix(&self) -> &'static str {
        match self {
            CallType::Group => "TG",
            CallType::Private => "PC",
        }
    }
}

/// Coding rate of a data continuation burst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataRate {
    /// Rate 1/2
    Half,
    /// Rate 3/4
    ThreeQuarter,
    /// Rate 1
    Full,
}

/// Role of a burst within its transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Privacy indicator header
    VoicePiHeader,
    /// Voice link-control header
    VoiceHeader,
    /// Voice burst A, carrying the voice sync pattern
    VoiceSync,
    /// Voice bursts B..F, carrying embedded signalling
    Voice,
    /// Terminator with link control
    Terminator,
    /// Control signalling block
    Csbk,
    /// Data header
    DataHeader,
    /// Data continuation
    RateData(DataRate),
}

impl PayloadKind {
    /// Data type code used in the sync/type bits of a data burst
    pub fn data_type(&self) -> Option<u8> {
        match self {
            PayloadKind::VoicePiHeader => Some(0x00),
            PayloadKind::VoiceHeader => Some(0x01),
            PayloadKind::Terminator => Some(0x02),
            PayloadKind::Csbk => Some(0x03),
            PayloadKind::DataHeader => Some(0x06),
            PayloadKind::RateData(DataRate::Half) => Some(0x07),
            PayloadKind::RateData(DataRate::ThreeQuarter) => Some(0x08),
            PayloadKind::RateData(DataRate::Full) => Some(0x0A),
            PayloadKind::VoiceSync | PayloadKind::Voice => None,
        }
    }

    /// Map a data type code back to a payload kind
    pub fn from_data_type(dt: u8) -> Option<Self> {
        match dt {
            0x00 => Some(PayloadKind::VoicePiHeader),
            0x01 => Some(PayloadKind::VoiceHeader),
            0x02 => Some(PayloadKind::Terminator),
            0x03 => Some(PayloadKind::Csbk),
            0x06 => Some(PayloadKind::DataHeader),
            0x07 => Some(PayloadKind::RateData(DataRate::Half)),
            0x08 => Some(PayloadKind::RateData(DataRate::ThreeQuarter)),
            0x0A => Some(PayloadKind::RateData(DataRate::Full)),
            _ => None,
        }
    }

    /// Whether this burst belongs to a voice call
    pub fn is_voice(&self) -> bool {
        matches!(
            self,
            PayloadKind::VoicePiHeader
                | PayloadKind::VoiceHeader
                | PayloadKind::VoiceSync
                | PayloadKind::Voice
                | PayloadKind::Terminator
        )
    }
}

/// One radio burst on one timeslot
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    /// Timeslot
    pub slot: Slot,
    /// Group or private call
    pub call_type: CallType,
    /// Source radio id (24 bit)
    pub src_id: u32,
    /// Destination talkgroup or radio id (24 bit)
    pub dst_id: u32,
    /// Burst role
    pub kind: PayloadKind,
    /// Per-link sequence number
    pub seq_no: u8,
    /// Voice burst index within a superframe (0..=5, A..F)
    pub burst_index: u8,
    /// Random per-transmission id
    pub stream_id: u32,
    /// Bit error rate, passed through untouched
    pub ber: u8,
    /// Signal strength, passed through untouched
    pub rssi: u8,
    /// Raw burst
    pub payload: Payload,
}

impl Frame {
    /// Create a frame with an all-zero payload
    pub fn new(slot: Slot, call_type: CallType, src_id: u32, dst_id: u32, kind: PayloadKind) -> Self {
        Self {
            slot,
            call_type,
            src_id: src_id & MAX_ID,
            dst_id: dst_id & MAX_ID,
            kind,
            seq_no: 0,
            burst_index: 0,
            stream_id: 0,
            ber: 0,
            rssi: 0,
            payload: [0u8; PAYLOAD_LEN],
        }
    }

    /// Set the destination, keeping it inside the 24-bit address space
    pub fn set_dst_id(&mut self, id: u32) {
        self.dst_id = id & MAX_ID;
    }

    /// Set the source, keeping it inside the 24-bit address space
    pub fn set_src_id(&mut self, id: u32) {
        self.src_id = id & MAX_ID;
    }

    /// Whether this burst ends a transmission
    pub fn is_terminator(&self) -> bool {
        self.kind == PayloadKind::Terminator
    }

    /// Short call description for log lines, e.g. `TS1 1234567 -> TG 91`
    pub fn describe(&self) -> String {
        format!(
            "{} {} -> {} {}",
            self.slot,
            self.src_id,
            self.call_type.prefix(),
            self.dst_id
        )
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("slot", &self.slot)
            .field("call_type", &self.call_type)
            .field("src_id", &self.src_id)
            .field("dst_id", &self.dst_id)
            .field("kind", &self.kind)
            .field("seq_no", &self.seq_no)
            .field("burst_index", &self.burst_index)
            .field("stream_id", &format_args!("{:08X}", self.stream_id))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_numbers() {
        assert_eq!(Slot::from_number(1), Some(Slot::One));
        assert_eq!(Slot::from_number(2), Some(Slot::Two));
        assert_eq!(Slot::from_number(0), None);
        assert_eq!(Slot::from_number(3), None);
        assert_eq!(Slot::Two.index(), 1);
        assert_eq!(Slot::One.to_string(), "TS1");
    }

    #[test]
    fn test_data_type_mapping() {
        for dt in [0x00, 0x01, 0x02, 0x03, 0x06, 0x07, 0x08, 0x0A] {
            let kind = PayloadKind::from_data_type(dt).unwrap();
            assert_eq!(kind.data_type(), Some(dt));
        }
        assert_eq!(PayloadKind::from_data_type(0x09), None);
        assert_eq!(PayloadKind::Voice.data_type(), None);
    }

    #[test]
    fn test_ids_are_masked() {
        let mut frame = Frame::new(Slot::One, CallType::Group, 0x1FF_FFFF, 91, PayloadKind::Voice);
        assert_eq!(frame.src_id, MAX_ID);
        frame.set_dst_id(0x0100_0005);
        assert_eq!(frame.dst_id, 5);
    }

    #[test]
    fn test_describe() {
        let frame = Frame::new(Slot::Two, CallType::Private, 2_345_001, 4000, PayloadKind::VoiceHeader);
        assert_eq!(frame.describe(), "TS2 2345001 -> PC 4000");
    }
}
