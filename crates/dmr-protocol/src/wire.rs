//! MMDVM homebrew datagram codec
//!
//! Every datagram starts with an ASCII tag. Traffic travels in fixed 55-byte
//! `DMRD` datagrams; session control uses the `RPT*`/`MST*` family; position
//! and talker-alias reports ride the same socket as opaque side-channel
//! datagrams.

use sha2::{Digest, Sha256};

use crate::error::ParseError;
use crate::frame::{CallType, Frame, PayloadKind, Slot, MAX_ID, PAYLOAD_LEN};

/// Datagram tags
pub mod tag {
    pub const DATA: &[u8] = b"DMRD";
    pub const POSITION: &[u8] = b"DMRG";
    pub const TALKER_ALIAS: &[u8] = b"DMRA";
    pub const LOGIN: &[u8] = b"RPTL";
    pub const AUTH: &[u8] = b"RPTK";
    pub const CONFIG: &[u8] = b"RPTC";
    pub const OPTIONS: &[u8] = b"RPTO";
    pub const ACK: &[u8] = b"RPTACK";
    pub const PING: &[u8] = b"RPTPING";
    pub const PONG: &[u8] = b"MSTPONG";
    pub const NAK: &[u8] = b"MSTNAK";
    pub const MASTER_CLOSE: &[u8] = b"MSTCL";
    pub const REPEATER_CLOSE: &[u8] = b"RPTCL";
    pub const BEACON: &[u8] = b"RPTSBKN";
}

/// Length of a `DMRD` datagram
pub const DATA_LEN: usize = 55;

/// Length of the configuration block that follows `RPTC` and the id
pub const CONFIG_BLOCK_LEN: usize = 294;

/// Length of an `RPTK` authentication datagram
pub const AUTH_LEN: usize = 40;

const FLAG_SLOT2: u8 = 0x80;
const FLAG_PRIVATE: u8 = 0x40;
const FLAG_DATA_SYNC: u8 = 0x20;
const FLAG_VOICE_SYNC: u8 = 0x10;

/// Longest tags first so `RPTCL` is not read as `RPTC`
const TAG_ORDER: [&[u8]; 14] = [
    tag::BEACON,
    tag::PING,
    tag::PONG,
    tag::ACK,
    tag::NAK,
    tag::MASTER_CLOSE,
    tag::REPEATER_CLOSE,
    tag::DATA,
    tag::POSITION,
    tag::TALKER_ALIAS,
    tag::LOGIN,
    tag::AUTH,
    tag::CONFIG,
    tag::OPTIONS,
];

/// A decoded datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Traffic, with the id of the peer that sent it
    Data { frame: Frame, sender_id: u32 },
    /// Position report, kept raw
    Position(Vec<u8>),
    /// Talker-alias fragment, kept raw
    TalkerAlias(Vec<u8>),
    Login { id: u32 },
    /// Acknowledgement; after a login the value is the salt
    Ack { value: u32 },
    Auth { id: u32, digest: [u8; 32] },
    Config { id: u32, block: ConfigBlock },
    Options { id: u32, text: String },
    Ping { id: u32 },
    Pong { id: u32 },
    Nak { id: u32 },
    MasterClose { id: u32 },
    RepeaterClose { id: u32 },
    Beacon { id: u32 },
}

fn need(tag: &'static str, data: &[u8], needed: usize) -> Result<(), ParseError> {
    if data.len() < needed {
        return Err(ParseError::Truncated {
            tag,
            needed,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn read_u24(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([0, data[at], data[at + 1], data[at + 2]])
}

fn tag_name(prefix: &[u8]) -> &'static str {
    match prefix {
        b"DMRD" => "DMRD",
        b"DMRG" => "DMRG",
        b"DMRA" => "DMRA",
        b"RPTL" => "RPTL",
        b"RPTK" => "RPTK",
        b"RPTC" => "RPTC",
        b"RPTO" => "RPTO",
        b"RPTACK" => "RPTACK",
        b"RPTPING" => "RPTPING",
        b"MSTPONG" => "MSTPONG",
        b"MSTNAK" => "MSTNAK",
        b"MSTCL" => "MSTCL",
        b"RPTCL" => "RPTCL",
        _ => "RPTSBKN",
    }
}

/// Decode any datagram
pub fn decode(data: &[u8]) -> Result<Message, ParseError> {
    let Some(prefix) = TAG_ORDER.iter().copied().find(|t| data.starts_with(t)) else {
        let shown = &data[..data.len().min(7)];
        return Err(ParseError::UnknownTag(String::from_utf8_lossy(shown).into_owned()));
    };
    let name = tag_name(prefix);
    let n = prefix.len();

    match prefix {
        tag::DATA => {
            let (frame, sender_id) = decode_frame(data)?;
            Ok(Message::Data { frame, sender_id })
        }
        tag::POSITION => {
            need(name, data, 11)?;
            Ok(Message::Position(data.to_vec()))
        }
        tag::TALKER_ALIAS => {
            need(name, data, 11)?;
            Ok(Message::TalkerAlias(data.to_vec()))
        }
        tag::ACK => {
            // A bare ack is accepted with a zero value
            let value = if data.len() >= n + 4 { read_u32(data, n) } else { 0 };
            Ok(Message::Ack { value })
        }
        tag::AUTH => {
            need(name, data, AUTH_LEN)?;
            let mut digest = [0u8; 32];
            digest.copy_from_slice(&data[8..40]);
            Ok(Message::Auth {
                id: read_u32(data, 4),
                digest,
            })
        }
        tag::CONFIG => {
            need(name, data, 8 + CONFIG_BLOCK_LEN)?;
            let mut block = [0u8; CONFIG_BLOCK_LEN];
            block.copy_from_slice(&data[8..8 + CONFIG_BLOCK_LEN]);
            Ok(Message::Config {
                id: read_u32(data, 4),
                block: ConfigBlock(block),
            })
        }
        tag::OPTIONS => {
            need(name, data, 8)?;
            Ok(Message::Options {
                id: read_u32(data, 4),
                text: String::from_utf8_lossy(&data[8..]).trim_end_matches('\0').to_string(),
            })
        }
        _ => {
            need(name, data, n + 4)?;
            let id = read_u32(data, n);
            Ok(match prefix {
                tag::LOGIN => Message::Login { id },
                tag::PING => Message::Ping { id },
                tag::PONG => Message::Pong { id },
                tag::NAK => Message::Nak { id },
                tag::MASTER_CLOSE => Message::MasterClose { id },
                tag::REPEATER_CLOSE => Message::RepeaterClose { id },
                _ => Message::Beacon { id },
            })
        }
    }
}

/// Decode a `DMRD` datagram into a frame and the sender's id
pub fn decode_frame(data: &[u8]) -> Result<(Frame, u32), ParseError> {
    need("DMRD", data, DATA_LEN)?;
    if !data.starts_with(tag::DATA) {
        return Err(ParseError::UnknownTag(
            String::from_utf8_lossy(&data[..4]).into_owned(),
        ));
    }

    let flags = data[15];
    let slot = if flags & FLAG_SLOT2 != 0 { Slot::Two } else { Slot::One };
    let call_type = if flags & FLAG_PRIVATE != 0 {
        CallType::Private
    } else {
        CallType::Group
    };

    let (kind, burst_index) = if flags & FLAG_DATA_SYNC != 0 {
        let dt = flags & 0x0F;
        let kind = PayloadKind::from_data_type(dt).ok_or(ParseError::UnsupportedDataType(dt))?;
        (kind, 0)
    } else if flags & FLAG_VOICE_SYNC != 0 {
        (PayloadKind::VoiceSync, 0)
    } else {
        let n = flags & 0x0F;
        if n > 5 {
            return Err(ParseError::InvalidBurstIndex(n));
        }
        (PayloadKind::Voice, n)
    };

    let mut payload = [0u8; PAYLOAD_LEN];
    payload.copy_from_slice(&data[20..20 + PAYLOAD_LEN]);

    let frame = Frame {
        slot,
        call_type,
        src_id: read_u24(data, 5),
        dst_id: read_u24(data, 8),
        kind,
        seq_no: data[4],
        burst_index,
        stream_id: read_u32(data, 16),
        ber: data[53],
        rssi: data[54],
        payload,
    };
    Ok((frame, read_u32(data, 11)))
}

/// Encode a frame as a `DMRD` datagram sent by `sender_id`
pub fn encode_frame(frame: &Frame, sender_id: u32) -> [u8; DATA_LEN] {
    let mut out = [0u8; DATA_LEN];
    out[..4].copy_from_slice(tag::DATA);
    out[4] = frame.seq_no;
    out[5..8].copy_from_slice(&(frame.src_id & MAX_ID).to_be_bytes()[1..]);
    out[8..11].copy_from_slice(&(frame.dst_id & MAX_ID).to_be_bytes()[1..]);
    out[11..15].copy_from_slice(&sender_id.to_be_bytes());

    let mut flags = 0u8;
    if frame.slot == Slot::Two {
        flags |= FLAG_SLOT2;
    }
    if frame.call_type == CallType::Private {
        flags |= FLAG_PRIVATE;
    }
    flags |= match frame.kind {
        PayloadKind::VoiceSync => FLAG_VOICE_SYNC,
        PayloadKind::Voice => frame.burst_index & 0x0F,
        other => FLAG_DATA_SYNC | other.data_type().unwrap_or(0),
    };
    out[15] = flags;

    out[16..20].copy_from_slice(&frame.stream_id.to_be_bytes());
    out[20..53].copy_from_slice(&frame.payload);
    out[53] = frame.ber;
    out[54] = frame.rssi;
    out
}

fn tagged(tag: &[u8], id: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(tag.len() + 4);
    out.extend_from_slice(tag);
    out.extend_from_slice(&id.to_be_bytes());
    out
}

/// `RPTL` login announcement
pub fn login(id: u32) -> Vec<u8> {
    tagged(tag::LOGIN, id)
}

/// `RPTACK` carrying a salt or id
pub fn ack(value: u32) -> Vec<u8> {
    tagged(tag::ACK, value)
}

/// `RPTK` authentication reply
pub fn auth(id: u32, salt: u32, secret: &str) -> Vec<u8> {
    let mut out = tagged(tag::AUTH, id);
    out.extend_from_slice(&auth_digest(salt, secret));
    out
}

/// `RPTC` configuration push
pub fn config(id: u32, block: &ConfigBlock) -> Vec<u8> {
    let mut out = tagged(tag::CONFIG, id);
    out.extend_from_slice(&block.0);
    out
}

/// `RPTO` options push
pub fn options(id: u32, text: &str) -> Vec<u8> {
    let mut out = tagged(tag::OPTIONS, id);
    out.extend_from_slice(text.as_bytes());
    out
}

pub fn ping(id: u32) -> Vec<u8> {
    tagged(tag::PING, id)
}

pub fn pong(id: u32) -> Vec<u8> {
    tagged(tag::PONG, id)
}

pub fn nak(id: u32) -> Vec<u8> {
    tagged(tag::NAK, id)
}

pub fn master_close(id: u32) -> Vec<u8> {
    tagged(tag::MASTER_CLOSE, id)
}

pub fn repeater_close(id: u32) -> Vec<u8> {
    tagged(tag::REPEATER_CLOSE, id)
}

pub fn beacon(id: u32) -> Vec<u8> {
    tagged(tag::BEACON, id)
}

/// SHA-256 over the big-endian salt followed by the shared secret
pub fn auth_digest(salt: u32, secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.to_be_bytes());
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Radio id carried by a side-channel datagram
pub fn side_channel_src(data: &[u8]) -> Option<u32> {
    (data.len() >= 11).then(|| read_u24(data, 8))
}

/// Replace the sender id of a side-channel datagram
pub fn set_side_channel_sender(data: &mut [u8], id: u32) {
    if data.len() >= 8 {
        data[4..8].copy_from_slice(&id.to_be_bytes());
    }
}

/// Fixed-width ASCII repeater configuration
///
/// Stored as received so fields the gateway does not understand go out
/// upstream unchanged.
#[derive(Clone, PartialEq, Eq)]
pub struct ConfigBlock(pub [u8; CONFIG_BLOCK_LEN]);

// Field ranges within the block
const CALLSIGN: std::ops::Range<usize> = 0..8;
const RX_FREQ: std::ops::Range<usize> = 8..17;
const TX_FREQ: std::ops::Range<usize> = 17..26;
const LATITUDE: std::ops::Range<usize> = 30..38;
const LONGITUDE: std::ops::Range<usize> = 38..47;
const HEIGHT: std::ops::Range<usize> = 47..50;
const LOCATION: std::ops::Range<usize> = 50..70;
const DESCRIPTION: std::ops::Range<usize> = 70..89;
const SOFTWARE: std::ops::Range<usize> = 214..254;

/// Fields for building a configuration block
#[derive(Debug, Clone, Default)]
pub struct ConfigFields<'a> {
    pub callsign: &'a str,
    pub rx_freq: u32,
    pub tx_freq: u32,
    pub power: u32,
    pub color_code: u32,
    pub latitude: f32,
    pub longitude: f32,
    pub height: i32,
    pub location: &'a str,
    pub description: &'a str,
    pub slots: char,
    pub url: &'a str,
    pub software: &'a str,
    pub package: &'a str,
}

fn pad(text: &str, width: usize) -> String {
    let mut s: String = text.chars().take(width).collect();
    while s.len() < width {
        s.push(' ');
    }
    s
}

impl ConfigBlock {
    pub fn new(f: &ConfigFields<'_>) -> Self {
        let text = format!(
            "{}{:09}{:09}{:02}{:02}{:08.4}{:09.4}{:03}{}{}{}{}{}{}",
            pad(f.callsign, 8),
            f.rx_freq % 1_000_000_000,
            f.tx_freq % 1_000_000_000,
            f.power.min(99),
            f.color_code.min(99),
            f.latitude.clamp(-90.0, 90.0),
            f.longitude.clamp(-180.0, 180.0),
            f.height.clamp(0, 999),
            pad(f.location, 20),
            pad(f.description, 19),
            f.slots,
            pad(f.url, 124),
            pad(f.software, 40),
            pad(f.package, 40),
        );
        let mut block = [b' '; CONFIG_BLOCK_LEN];
        for (dst, src) in block.iter_mut().zip(text.bytes()) {
            *dst = src;
        }
        Self(block)
    }

    fn field(&self, range: std::ops::Range<usize>) -> String {
        String::from_utf8_lossy(&self.0[range]).trim().to_string()
    }

    fn set_field(&mut self, range: std::ops::Range<usize>, text: &str) {
        let width = range.len();
        let padded = pad(text, width);
        self.0[range].copy_from_slice(&padded.as_bytes()[..width]);
    }

    pub fn callsign(&self) -> String {
        self.field(CALLSIGN)
    }

    pub fn rx_freq(&self) -> String {
        self.field(RX_FREQ)
    }

    pub fn tx_freq(&self) -> String {
        self.field(TX_FREQ)
    }

    pub fn location(&self) -> String {
        self.field(LOCATION)
    }

    pub fn description(&self) -> String {
        self.field(DESCRIPTION)
    }

    pub fn software(&self) -> String {
        self.field(SOFTWARE)
    }

    /// Copy with position and location text removed
    pub fn without_location(&self) -> Self {
        let mut out = self.clone();
        out.set_field(LATITUDE, "0.000000");
        out.set_field(LONGITUDE, "0.000000");
        out.set_field(HEIGHT, "000");
        out.set_field(LOCATION, "");
        out
    }
}

impl std::fmt::Debug for ConfigBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigBlock")
            .field("callsign", &self.callsign())
            .field("rx_freq", &self.rx_freq())
            .field("tx_freq", &self.tx_freq())
            .field("description", &self.description())
            .finish_non_exhaustive()
    }
}
