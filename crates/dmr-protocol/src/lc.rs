//! Link control (call metadata) and its full-LC burst coding
//!
//! Link control is nine bytes: FLCO, feature-set id, service options,
//! destination and source. Voice headers and terminators carry it whole
//! under BPTC(196,96) with masked Reed-Solomon parity.

use crate::bptc;
use crate::frame::{CallType, Frame, Payload, PayloadKind, MAX_ID};
use crate::rs129;

/// FLCO for group voice
const FLCO_GROUP: u8 = 0x00;
/// FLCO for unit-to-unit voice
const FLCO_USER_USER: u8 = 0x03;

/// Decoded link control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkControl {
    /// Protect flag
    pub protect: bool,
    /// Group or private call
    pub call_type: CallType,
    /// Feature set id
    pub fid: u8,
    /// Service options
    pub options: u8,
    /// Destination talkgroup or radio
    pub dst_id: u32,
    /// Source radio
    pub src_id: u32,
}

impl LinkControl {
    /// Build link control for a call
    pub fn new(call_type: CallType, src_id: u32, dst_id: u32) -> Self {
        Self {
            protect: false,
            call_type,
            fid: 0,
            options: 0,
            dst_id: dst_id & MAX_ID,
            src_id: src_id & MAX_ID,
        }
    }

    /// Build link control from the addressing fields of a frame
    pub fn from_frame(frame: &Frame) -> Self {
        Self::new(frame.call_type, frame.src_id, frame.dst_id)
    }

    /// Parse nine LC bytes; `None` for FLCO values other than group/private voice
    pub fn from_bytes(b: &[u8; 9]) -> Option<Self> {
        let call_type = match b[0] & 0x3F {
            FLCO_GROUP => CallType::Group,
            FLCO_USER_USER => CallType::Private,
            _ => return None,
        };
        Some(Self {
            protect: b[0] & 0x80 != 0,
            call_type,
            fid: b[1],
            options: b[2],
            dst_id: u32::from_be_bytes([0, b[3], b[4], b[5]]),
            src_id: u32::from_be_bytes([0, b[6], b[7], b[8]]),
        })
    }

    /// Nine LC bytes in air order
    pub fn to_bytes(&self) -> [u8; 9] {
        let flco = match self.call_type {
            CallType::Group => FLCO_GROUP,
            CallType::Private => FLCO_USER_USER,
        };
        let dst = self.dst_id.to_be_bytes();
        let src = self.src_id.to_be_bytes();
        [
            if self.protect { 0x80 } else { 0x00 } | flco,
            self.fid,
            self.options,
            dst[1],
            dst[2],
            dst[3],
            src[1],
            src[2],
            src[3],
        ]
    }
}

fn parity_mask(kind: PayloadKind) -> Option<&'static [u8; 3]> {
    match kind {
        PayloadKind::VoiceHeader => Some(&rs129::VOICE_HEADER_MASK),
        PayloadKind::Terminator => Some(&rs129::TERMINATOR_MASK),
        _ => None,
    }
}

/// Decode the full LC of a voice header or terminator
///
/// Returns `None` for other burst kinds or when the parity does not check.
pub fn decode_full(payload: &Payload, kind: PayloadKind) -> Option<LinkControl> {
    let mask = parity_mask(kind)?;
    let data = bptc::decode(payload);
    let mut msg = [0u8; 9];
    msg.copy_from_slice(&data[..9]);
    let masked = [data[9], data[10], data[11]];
    if !rs129::check(&msg, &masked, mask) {
        return None;
    }
    LinkControl::from_bytes(&msg)
}

/// Encode full LC into a voice header or terminator burst
///
/// Returns `false` (leaving the payload untouched) for other burst kinds.
pub fn encode_full(lc: &LinkControl, kind: PayloadKind, payload: &mut Payload) -> bool {
    let Some(mask) = parity_mask(kind) else {
        return false;
    };
    let msg = lc.to_bytes();
    let parity = rs129::parity(&msg);
    let mut data = [0u8; 12];
    data[..9].copy_from_slice(&msg);
    for i in 0..3 {
        data[9 + i] = parity[i] ^ mask[i];
    }
    bptc::encode(&data, payload);
    true
}
