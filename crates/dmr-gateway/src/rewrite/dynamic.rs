//! Dynamic talkgroups
//!
//! A radio "tunes" a relay talkgroup by keying up on any talkgroup in the
//! selection range. Once the call ends, traffic on the relay talkgroup goes
//! to the selected talkgroup and the network's traffic on it comes back on
//! the relay talkgroup. The RF and network halves share one
//! [`DynTgBinding`] held in a [`DynTgTable`] and referenced by index.

use dmr_protocol::{CallType, Frame, Slot};
use tracing::{debug, info};

use super::lc::LcTracker;
use super::remap::IdRange;
use super::RuleResult;
use crate::voice::{Announcement, VoicePrompt};

/// Shared state of one dynamic talkgroup pair
pub struct DynTgBinding {
    /// Index of the network the pair belongs to
    pub network: usize,
    pub slot: Slot,
    pub relay_tg: u32,
    /// Selected talkgroup, 0 when none
    pub current_tg: u32,
    pub voice: Option<Box<dyn VoicePrompt>>,
}

impl std::fmt::Debug for DynTgBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynTgBinding")
            .field("network", &self.network)
            .field("slot", &self.slot)
            .field("relay_tg", &self.relay_tg)
            .field("current_tg", &self.current_tg)
            .field("voice", &self.voice.is_some())
            .finish()
    }
}

impl DynTgBinding {
    fn announce(&mut self, announcement: Announcement) {
        if let Some(voice) = &mut self.voice {
            voice.announce(announcement);
        }
    }
}

/// A committed selection change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub binding: usize,
    pub tg: u32,
}

/// All dynamic talkgroup bindings, owned by the dispatcher
#[derive(Debug, Default)]
pub struct DynTgTable {
    bindings: Vec<DynTgBinding>,
    changes: Vec<Selection>,
}

impl DynTgTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding and return its index
    pub fn add(&mut self, network: usize, slot: Slot, relay_tg: u32) -> usize {
        self.bindings.push(DynTgBinding {
            network,
            slot,
            relay_tg,
            current_tg: 0,
            voice: None,
        });
        self.bindings.len() - 1
    }

    pub fn get(&self, index: usize) -> Option<&DynTgBinding> {
        self.bindings.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut DynTgBinding> {
        self.bindings.get_mut(index)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut DynTgBinding> {
        self.bindings.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Selected talkgroup of a binding, 0 when none
    pub fn current(&self, index: usize) -> u32 {
        self.bindings.get(index).map_or(0, |b| b.current_tg)
    }

    /// Attach a voice prompt source to a binding
    pub fn set_voice(&mut self, index: usize, voice: Box<dyn VoicePrompt>) -> bool {
        match self.bindings.get_mut(index) {
            Some(binding) => {
                binding.voice = Some(voice);
                true
            }
            None => false,
        }
    }

    fn commit(&mut self, index: usize, tg: u32) {
        if let Some(binding) = self.bindings.get_mut(index) {
            if binding.current_tg != tg {
                binding.current_tg = tg;
                self.changes.push(Selection { binding: index, tg });
            }
        }
    }

    /// Select `tg` on every binding for `slot` out of band; 0 clears
    ///
    /// Returns whether any binding serves the slot.
    pub fn select(&mut self, slot: Slot, tg: u32) -> bool {
        let indices: Vec<usize> = self
            .bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.slot == slot)
            .map(|(i, _)| i)
            .collect();
        for &i in &indices {
            self.commit(i, tg);
        }
        !indices.is_empty()
    }

    /// Selection changes since the last call
    pub fn take_changes(&mut self) -> Vec<Selection> {
        std::mem::take(&mut self.changes)
    }
}

/// Repeater-side half: selection, disconnect and status
#[derive(Debug)]
pub struct DynamicRf {
    pub network: String,
    pub binding: usize,
    pub slot: Slot,
    pub relay_tg: u32,
    pub range: IdRange,
    pub exclude: Vec<u32>,
    pub disconnect_pc: u32,
    pub status_pc: u32,
    tracker: LcTracker,
}

impl DynamicRf {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        network: &str,
        binding: usize,
        slot: Slot,
        relay_tg: u32,
        range: IdRange,
        exclude: Vec<u32>,
        disconnect_pc: u32,
        status_pc: u32,
    ) -> Self {
        Self {
            network: network.to_string(),
            binding,
            slot,
            relay_tg,
            range,
            exclude,
            disconnect_pc,
            status_pc,
            tracker: LcTracker::new(),
        }
    }

    pub fn process(&mut self, frame: &mut Frame, table: &mut DynTgTable, trace: bool) -> RuleResult {
        if frame.slot != self.slot {
            return RuleResult::Unmatched;
        }
        let current = table.current(self.binding);

        match frame.call_type {
            CallType::Group if frame.dst_id == self.relay_tg => {
                if current == 0 {
                    if trace {
                        debug!("{} dynamic relay TG {} has no selection", self.network, self.relay_tg);
                    }
                    return RuleResult::Unmatched;
                }
                frame.set_dst_id(current);
                self.tracker.patch(frame);
                if trace {
                    debug!("{} dynamic relay {} => TG {}", self.network, self.relay_tg, current);
                }
                RuleResult::Matched
            }
            CallType::Private if frame.dst_id == self.disconnect_pc => {
                if frame.is_terminator() {
                    info!("{} dynamic talkgroup on {} unlinked", self.network, self.slot);
                    table.commit(self.binding, 0);
                    if let Some(binding) = table.get_mut(self.binding) {
                        binding.announce(Announcement::Unlinked);
                    }
                }
                RuleResult::Matched
            }
            CallType::Private if frame.dst_id == self.status_pc => {
                if frame.is_terminator() {
                    if let Some(binding) = table.get_mut(self.binding) {
                        binding.announce(if current == 0 {
                            Announcement::Unlinked
                        } else {
                            Announcement::Talkgroup(current)
                        });
                    }
                }
                RuleResult::Ignored
            }
            CallType::Group if self.exclude.contains(&frame.dst_id) => RuleResult::Unmatched,
            CallType::Group if self.range.contains(frame.dst_id) => {
                if frame.is_terminator() && frame.dst_id != current {
                    info!(
                        "{} dynamic talkgroup on {} linked to TG {}",
                        self.network, self.slot, frame.dst_id
                    );
                    table.commit(self.binding, frame.dst_id);
                    if let Some(binding) = table.get_mut(self.binding) {
                        binding.announce(Announcement::Talkgroup(frame.dst_id));
                    }
                }
                RuleResult::Matched
            }
            _ => RuleResult::Unmatched,
        }
    }
}

/// Network-side half: selected talkgroup back onto the relay talkgroup
#[derive(Debug)]
pub struct DynamicNet {
    pub network: String,
    pub binding: usize,
    pub slot: Slot,
    pub relay_tg: u32,
    tracker: LcTracker,
}

impl DynamicNet {
    pub fn new(network: &str, binding: usize, slot: Slot, relay_tg: u32) -> Self {
        Self {
            network: network.to_string(),
            binding,
            slot,
            relay_tg,
            tracker: LcTracker::new(),
        }
    }

    pub fn process(&mut self, frame: &mut Frame, table: &DynTgTable, trace: bool) -> RuleResult {
        let current = table.current(self.binding);
        if current == 0
            || frame.slot != self.slot
            || frame.call_type != CallType::Group
            || frame.dst_id != current
        {
            return RuleResult::Unmatched;
        }
        frame.set_dst_id(self.relay_tg);
        self.tracker.patch(frame);
        if trace {
            debug!("{} dynamic TG {} => relay {}", self.network, current, self.relay_tg);
        }
        RuleResult::Matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmr_protocol::PayloadKind;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<Announcement>>>);

    impl VoicePrompt for Recorder {
        fn announce(&mut self, announcement: Announcement) {
            self.0.lock().unwrap().push(announcement);
        }
        fn abort(&mut self) {}
        fn read(&mut self) -> Option<Frame> {
            None
        }
    }

    fn setup() -> (DynTgTable, DynamicRf, DynamicNet) {
        let mut table = DynTgTable::new();
        let binding = table.add(0, Slot::Two, 9);
        let rf = DynamicRf::new("BM", binding, Slot::Two, 9, IdRange::new(100, 900), vec![4000], 4000, 5000);
        let net = DynamicNet::new("BM", binding, Slot::Two, 9);
        (table, rf, net)
    }

    fn call(call_type: CallType, dst: u32, kind: PayloadKind) -> Frame {
        Frame::new(Slot::Two, call_type, 2_345_001, dst, kind)
    }

    #[test]
    fn test_relay_without_selection_unmatched() {
        let (mut table, mut rf, _) = setup();
        let mut frame = call(CallType::Group, 9, PayloadKind::Voice);
        assert_eq!(rf.process(&mut frame, &mut table, false), RuleResult::Unmatched);
    }

    #[test]
    fn test_selection_commits_on_terminator() {
        let (mut table, mut rf, mut net) = setup();

        let mut voice = call(CallType::Group, 301, PayloadKind::Voice);
        assert_eq!(rf.process(&mut voice, &mut table, false), RuleResult::Matched);
        assert_eq!(voice.dst_id, 301);
        assert_eq!(table.current(0), 0);

        let mut inbound = call(CallType::Group, 301, PayloadKind::Voice);
        assert_eq!(net.process(&mut inbound, &table, false), RuleResult::Unmatched);

        let mut end = call(CallType::Group, 301, PayloadKind::Terminator);
        assert_eq!(rf.process(&mut end, &mut table, false), RuleResult::Matched);
        assert_eq!(table.current(0), 301);
        assert_eq!(table.take_changes(), vec![Selection { binding: 0, tg: 301 }]);

        let mut inbound = call(CallType::Group, 301, PayloadKind::Voice);
        assert_eq!(net.process(&mut inbound, &table, false), RuleResult::Matched);
        assert_eq!(inbound.dst_id, 9);

        let mut relay = call(CallType::Group, 9, PayloadKind::Voice);
        assert_eq!(rf.process(&mut relay, &mut table, false), RuleResult::Matched);
        assert_eq!(relay.dst_id, 301);
    }

    #[test]
    fn test_disconnect_and_status() {
        let (mut table, mut rf, _) = setup();
        let log = Arc::new(Mutex::new(Vec::new()));
        table.set_voice(0, Box::new(Recorder(log.clone())));
        table.select(Slot::Two, 310);

        let mut status = call(CallType::Private, 5000, PayloadKind::Terminator);
        assert_eq!(rf.process(&mut status, &mut table, false), RuleResult::Ignored);

        let mut voice = call(CallType::Private, 4000, PayloadKind::Voice);
        assert_eq!(rf.process(&mut voice, &mut table, false), RuleResult::Matched);
        assert_eq!(table.current(0), 310);

        let mut end = call(CallType::Private, 4000, PayloadKind::Terminator);
        assert_eq!(rf.process(&mut end, &mut table, false), RuleResult::Matched);
        assert_eq!(table.current(0), 0);

        assert_eq!(
            *log.lock().unwrap(),
            vec![Announcement::Talkgroup(310), Announcement::Unlinked]
        );
    }

    #[test]
    fn test_excluded_and_out_of_range() {
        let (mut table, mut rf, _) = setup();
        rf.exclude.push(200);
        let mut excluded = call(CallType::Group, 200, PayloadKind::Terminator);
        assert_eq!(rf.process(&mut excluded, &mut table, false), RuleResult::Unmatched);
        assert_eq!(table.current(0), 0);

        let mut outside = call(CallType::Group, 1000, PayloadKind::Terminator);
        assert_eq!(rf.process(&mut outside, &mut table, false), RuleResult::Unmatched);

        let mut other_slot = Frame::new(Slot::One, CallType::Group, 1, 301, PayloadKind::Terminator);
        assert_eq!(rf.process(&mut other_slot, &mut table, false), RuleResult::Unmatched);
    }

    #[test]
    fn test_out_of_band_select() {
        let mut table = DynTgTable::new();
        table.add(0, Slot::One, 9);
        table.add(1, Slot::Two, 9);
        assert!(table.select(Slot::Two, 2350));
        assert_eq!(table.current(0), 0);
        assert_eq!(table.current(1), 2350);
        assert!(!DynTgTable::new().select(Slot::One, 1));
    }
}
