//! DMR protocol library
//!
//! Building blocks shared by every link of the gateway:
//!
//! - **Frame model**: [`Frame`], the normalized unit of traffic on one timeslot
//! - **Wire codec**: the MMDVM homebrew datagrams (`DMRD` traffic and the
//!   `RPT*`/`MST*` session control family) in [`wire`]
//! - **Link control**: full LC for headers and terminators ([`lc`]) and the
//!   embedded LC fragments carried by voice bursts ([`embedded`])
//!
//! The FEC helpers ([`bptc`], [`rs129`], [`hamming`]) are exposed so link
//! control can be rebuilt when a rewrite changes a call's addressing.
//!
//! # Example
//!
//! ```rust
//! use dmr_protocol::{wire, CallType, Frame, PayloadKind, Slot};
//!
//! let frame = Frame::new(Slot::One, CallType::Group, 2_345_001, 91, PayloadKind::VoiceHeader);
//! let bytes = wire::encode_frame(&frame, 234_500_101);
//! let (decoded, sender) = wire::decode_frame(&bytes).unwrap();
//! assert_eq!(decoded.dst_id, 91);
//! assert_eq!(sender, 234_500_101);
//! ```

pub mod bits;
pub mod bptc;
pub mod embedded;
pub mod error;
pub mod frame;
pub mod hamming;
pub mod lc;
pub mod rs129;
pub mod wire;

pub use embedded::EmbeddedLc;
pub use error::ParseError;
pub use frame::{
    CallType, DataRate, Frame, Payload, PayloadKind, Slot, MAX_ID, PAYLOAD_LEN, WILDCARD_ID,
};
pub use lc::LinkControl;
pub use wire::{ConfigBlock, ConfigFields, Message};
