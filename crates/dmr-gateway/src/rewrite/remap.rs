//! Stateless address rewrites
//!
//! Every variant matches on slot, call type and an id range, and maps the
//! matched id into the target range with the same offset.

use dmr_protocol::{CallType, Frame, Slot, WILDCARD_ID};
use tracing::debug;

use super::lc::LcTracker;
use super::RuleResult;

/// A run of `len` consecutive ids
///
/// A range starting at the wildcard id matches every id and maps it to
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub start: u32,
    pub len: u32,
}

impl IdRange {
    pub fn new(start: u32, len: u32) -> Self {
        Self { start, len }
    }

    pub fn single(id: u32) -> Self {
        Self { start: id, len: 1 }
    }

    pub fn is_wildcard(&self) -> bool {
        self.start == WILDCARD_ID
    }

    pub fn contains(&self, id: u32) -> bool {
        self.is_wildcard() || (id >= self.start && (id - self.start) < self.len)
    }

    /// Map `id` from this range to the same offset in `target`
    pub fn map_to(&self, id: u32, target: &IdRange) -> u32 {
        if self.is_wildcard() || target.is_wildcard() {
            id
        } else {
            id - self.start + target.start
        }
    }
}

/// Talkgroup or private-call remap
#[derive(Debug)]
pub struct Remap {
    pub network: String,
    pub call_type: CallType,
    pub from_slot: Slot,
    pub from: IdRange,
    pub to_slot: Slot,
    pub to: IdRange,
    tracker: LcTracker,
}

impl Remap {
    pub fn new(
        network: &str,
        call_type: CallType,
        from_slot: Slot,
        from_id: u32,
        to_slot: Slot,
        to_id: u32,
        range: u32,
    ) -> Self {
        Self {
            network: network.to_string(),
            call_type,
            from_slot,
            from: IdRange::new(from_id, range),
            to_slot,
            to: IdRange::new(to_id, range),
            tracker: LcTracker::new(),
        }
    }

    /// The same mapping in the opposite direction
    pub fn reversed(&self) -> Self {
        Self {
            network: self.network.clone(),
            call_type: self.call_type,
            from_slot: self.to_slot,
            from: self.to,
            to_slot: self.from_slot,
            to: self.from,
            tracker: LcTracker::new(),
        }
    }

    pub fn process(&mut self, frame: &mut Frame, trace: bool) -> RuleResult {
        if frame.call_type != self.call_type
            || frame.slot != self.from_slot
            || !self.from.contains(frame.dst_id)
        {
            if trace {
                debug!(
                    "{} remap {}:{}{}+{} unmatched for {}",
                    self.network,
                    self.from_slot.number(),
                    self.call_type.prefix(),
                    self.from.start,
                    self.from.len,
                    frame.describe()
                );
            }
            return RuleResult::Unmatched;
        }

        let old = frame.describe();
        let dst = self.from.map_to(frame.dst_id, &self.to);
        frame.slot = self.to_slot;
        if dst != frame.dst_id {
            frame.set_dst_id(dst);
            self.tracker.patch(frame);
        }
        if trace {
            debug!("{} remap matched {} => {}", self.network, old, frame.describe());
        }
        RuleResult::Matched
    }
}

/// Group call republished as a private call, or the reverse
#[derive(Debug)]
pub struct TypeConvert {
    pub network: String,
    pub from_type: CallType,
    pub from_slot: Slot,
    pub from: IdRange,
    pub to_slot: Slot,
    pub to: IdRange,
    tracker: LcTracker,
}

impl TypeConvert {
    pub fn new(
        network: &str,
        from_type: CallType,
        from_slot: Slot,
        from_id: u32,
        to_slot: Slot,
        to_id: u32,
        range: u32,
    ) -> Self {
        Self {
            network: network.to_string(),
            from_type,
            from_slot,
            from: IdRange::new(from_id, range),
            to_slot,
            to: IdRange::new(to_id, range),
            tracker: LcTracker::new(),
        }
    }

    /// Convert back the other way
    pub fn reversed(&self) -> Self {
        let from_type = match self.from_type {
            CallType::Group => CallType::Private,
            CallType::Private => CallType::Group,
        };
        Self {
            network: self.network.clone(),
            from_type,
            from_slot: self.to_slot,
            from: self.to,
            to_slot: self.from_slot,
            to: self.from,
            tracker: LcTracker::new(),
        }
    }

    pub fn process(&mut self, frame: &mut Frame, trace: bool) -> RuleResult {
        if frame.call_type != self.from_type
            || frame.slot != self.from_slot
            || !self.from.contains(frame.dst_id)
        {
            return RuleResult::Unmatched;
        }

        let old = frame.describe();
        let dst = self.from.map_to(frame.dst_id, &self.to);
        frame.slot = self.to_slot;
        frame.call_type = match self.from_type {
            CallType::Group => CallType::Private,
            CallType::Private => CallType::Group,
        };
        frame.set_dst_id(dst);
        self.tracker.patch(frame);
        if trace {
            debug!("{} type matched {} => {}", self.network, old, frame.describe());
        }
        RuleResult::Matched
    }
}

/// Private calls from a source range republished to one talkgroup
#[derive(Debug)]
pub struct SourceRemap {
    pub network: String,
    pub from_slot: Slot,
    pub from: IdRange,
    pub to_slot: Slot,
    pub to_tg: u32,
    tracker: LcTracker,
}

impl SourceRemap {
    pub fn new(network: &str, from_slot: Slot, from_id: u32, to_slot: Slot, to_tg: u32, range: u32) -> Self {
        Self {
            network: network.to_string(),
            from_slot,
            from: IdRange::new(from_id, range),
            to_slot,
            to_tg,
            tracker: LcTracker::new(),
        }
    }

    pub fn process(&mut self, frame: &mut Frame, trace: bool) -> RuleResult {
        if frame.call_type != CallType::Private
            || frame.slot != self.from_slot
            || !self.from.contains(frame.src_id)
        {
            return RuleResult::Unmatched;
        }

        let old = frame.describe();
        frame.slot = self.to_slot;
        frame.call_type = CallType::Group;
        frame.set_dst_id(self.to_tg);
        self.tracker.patch(frame);
        if trace {
            debug!("{} src matched {} => {}", self.network, old, frame.describe());
        }
        RuleResult::Matched
    }
}

/// Every call of one type on one slot, unchanged
#[derive(Debug, Clone)]
pub struct PassAll {
    pub network: String,
    pub call_type: CallType,
    pub slot: Slot,
}

impl PassAll {
    pub fn new(network: &str, call_type: CallType, slot: Slot) -> Self {
        Self {
            network: network.to_string(),
            call_type,
            slot,
        }
    }

    pub fn process(&self, frame: &Frame, trace: bool) -> RuleResult {
        if frame.call_type != self.call_type || frame.slot != self.slot {
            return RuleResult::Unmatched;
        }
        if trace {
            debug!("{} pass-all matched {}", self.network, frame.describe());
        }
        RuleResult::Matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmr_protocol::PayloadKind;
    use proptest::prelude::*;

    fn group(slot: Slot, dst: u32) -> Frame {
        Frame::new(slot, CallType::Group, 1_234_567, dst, PayloadKind::Voice)
    }

    #[test]
    fn test_identity_remap() {
        let mut rule = Remap::new("BM", CallType::Group, Slot::Two, 9, Slot::Two, 9, 1);
        let mut frame = group(Slot::Two, 9);
        let before = frame.clone();
        assert_eq!(rule.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame, before);
    }

    #[test]
    fn test_offset_remap() {
        let mut rule = Remap::new("BM", CallType::Group, Slot::One, 100, Slot::Two, 200, 10);

        let mut frame = group(Slot::One, 105);
        assert_eq!(rule.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame.dst_id, 205);
        assert_eq!(frame.slot, Slot::Two);

        let mut frame = group(Slot::One, 50);
        assert_eq!(rule.process(&mut frame, true), RuleResult::Unmatched);
        assert_eq!(frame.dst_id, 50);

        let mut frame = group(Slot::One, 110);
        assert_eq!(rule.process(&mut frame, false), RuleResult::Unmatched);

        let mut frame = group(Slot::Two, 105);
        assert_eq!(rule.process(&mut frame, false), RuleResult::Unmatched);
    }

    #[test]
    fn test_reverse_remap() {
        let rule = Remap::new("BM", CallType::Group, Slot::One, 100, Slot::Two, 200, 10);
        let mut back = rule.reversed();
        let mut frame = group(Slot::Two, 209);
        assert_eq!(back.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame.dst_id, 109);
        assert_eq!(frame.slot, Slot::One);
    }

    #[test]
    fn test_private_remap_ignores_groups() {
        let mut rule = Remap::new("BM", CallType::Private, Slot::One, 1000, Slot::One, 2000, 5);
        let mut frame = group(Slot::One, 1001);
        assert_eq!(rule.process(&mut frame, false), RuleResult::Unmatched);

        frame.call_type = CallType::Private;
        assert_eq!(rule.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame.dst_id, 2001);
    }

    #[test]
    fn test_wildcard_range() {
        let mut rule = Remap::new("BM", CallType::Private, Slot::One, WILDCARD_ID, Slot::Two, WILDCARD_ID, 1);
        let mut frame = group(Slot::One, 3_100_123);
        frame.call_type = CallType::Private;
        assert_eq!(rule.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame.dst_id, 3_100_123);
        assert_eq!(frame.slot, Slot::Two);
    }

    #[test]
    fn test_type_convert_both_ways() {
        let mut out = TypeConvert::new("BM", CallType::Group, Slot::Two, 9990, Slot::Two, 9990, 1);
        let mut back = out.reversed();

        let mut frame = group(Slot::Two, 9990);
        assert_eq!(out.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame.call_type, CallType::Private);
        assert_eq!(frame.dst_id, 9990);

        assert_eq!(back.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame.call_type, CallType::Group);
    }

    #[test]
    fn test_source_remap() {
        let mut rule = SourceRemap::new("BM", Slot::One, 9990, Slot::Two, 9, 1);
        let mut frame = Frame::new(Slot::One, CallType::Private, 9990, 2_345_001, PayloadKind::VoiceHeader);
        assert_eq!(rule.process(&mut frame, false), RuleResult::Matched);
        assert_eq!(frame.call_type, CallType::Group);
        assert_eq!(frame.dst_id, 9);
        assert_eq!(frame.slot, Slot::Two);

        let mut other = Frame::new(Slot::One, CallType::Private, 1234, 2_345_001, PayloadKind::Voice);
        assert_eq!(rule.process(&mut other, false), RuleResult::Unmatched);
    }

    #[test]
    fn test_pass_all() {
        let rule = PassAll::new("BM", CallType::Group, Slot::One);
        assert_eq!(rule.process(&group(Slot::One, 91), false), RuleResult::Matched);
        assert_eq!(rule.process(&group(Slot::Two, 91), false), RuleResult::Unmatched);
    }

    proptest! {
        #[test]
        fn remap_offsets_inside_range(from in 1u32..1_000_000, to in 1u32..1_000_000, range in 1u32..1000, offset in 0u32..2000) {
            let mut rule = Remap::new("BM", CallType::Group, Slot::One, from, Slot::One, to, range);
            let mut frame = group(Slot::One, from + offset);
            let result = rule.process(&mut frame, false);
            if offset < range {
                prop_assert_eq!(result, RuleResult::Matched);
                prop_assert_eq!(frame.dst_id, to + offset);
            } else {
                prop_assert_eq!(result, RuleResult::Unmatched);
                prop_assert_eq!(frame.dst_id, from + offset);
            }
        }
    }
}
