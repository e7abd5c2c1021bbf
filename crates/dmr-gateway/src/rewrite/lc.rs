//! Link control rebuilt for rewritten calls
//!
//! Radios show the addressing carried inside the burst, not the `DMRD`
//! header, so a rule that changes a call's addressing also re-encodes the
//! full LC of headers and terminators and the embedded fragments of voice
//! bursts B to E. State is kept per stream because the fragments of one
//! superframe must all come from the same LC.

use dmr_protocol::{lc, EmbeddedLc, Frame, LinkControl, PayloadKind};

#[derive(Debug, Default)]
pub struct LcTracker {
    stream_id: Option<u32>,
    lc: Option<LinkControl>,
    embedded: Option<EmbeddedLc>,
}

impl LcTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-encode the LC carried by `frame` from its current addressing
    pub fn patch(&mut self, frame: &mut Frame) {
        if self.stream_id != Some(frame.stream_id) {
            self.stream_id = Some(frame.stream_id);
            self.lc = None;
            self.embedded = None;
        }

        match frame.kind {
            PayloadKind::VoiceHeader | PayloadKind::Terminator => {
                let mut rebuilt = LinkControl::from_frame(frame);
                // Keep the feature set and service options the radio sent
                if let Some(original) = lc::decode_full(&frame.payload, frame.kind) {
                    rebuilt.protect = original.protect;
                    rebuilt.fid = original.fid;
                    rebuilt.options = original.options;
                }
                lc::encode_full(&rebuilt, frame.kind, &mut frame.payload);
                self.remember(rebuilt);
            }
            PayloadKind::Voice => {
                let current = LinkControl::from_frame(frame);
                let stale = self
                    .lc
                    .map_or(true, |lc| lc.dst_id != current.dst_id || lc.call_type != current.call_type);
                if stale {
                    self.remember(current);
                }
                if let Some(embedded) = &self.embedded {
                    embedded.write_fragment(frame.burst_index, &mut frame.payload);
                }
            }
            _ => {}
        }
    }

    fn remember(&mut self, lc: LinkControl) {
        self.lc = Some(lc);
        self.embedded = Some(EmbeddedLc::encode(&lc));
    }
}
