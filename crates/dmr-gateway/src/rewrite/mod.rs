//! Rewrite rules
//!
//! A rule inspects one frame and either leaves it alone (`Unmatched`),
//! claims it, possibly rewriting its addressing in place (`Matched`), or
//! swallows it (`Ignored`). Each network has ordered rule lists per
//! direction; the first rule that does not answer `Unmatched` decides.

pub mod dynamic;
pub mod lc;
pub mod remap;

use dmr_protocol::{CallType, Frame, Slot};

use crate::config::RewriteConfig;
pub use dynamic::{DynTgBinding, DynTgTable, DynamicNet, DynamicRf, Selection};
pub use remap::{IdRange, PassAll, Remap, SourceRemap, TypeConvert};

/// Outcome of applying a rule to a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleResult {
    /// Rule applies; the frame may have been rewritten
    Matched,
    /// Rule does not apply
    Unmatched,
    /// Rule applies and the frame must not be forwarded
    Ignored,
}

/// One rewrite rule
#[derive(Debug)]
pub enum RewriteRule {
    TgRemap(Remap),
    PcRemap(Remap),
    TypeConvert(TypeConvert),
    SourceRemap(SourceRemap),
    DynamicRf(DynamicRf),
    DynamicNet(DynamicNet),
    PassAllTg(PassAll),
    PassAllPc(PassAll),
}

impl RewriteRule {
    /// Apply the rule, rewriting `frame` in place when it matches
    pub fn process(&mut self, frame: &mut Frame, table: &mut DynTgTable, trace: bool) -> RuleResult {
        match self {
            RewriteRule::TgRemap(rule) | RewriteRule::PcRemap(rule) => rule.process(frame, trace),
            RewriteRule::TypeConvert(rule) => rule.process(frame, trace),
            RewriteRule::SourceRemap(rule) => rule.process(frame, trace),
            RewriteRule::DynamicRf(rule) => rule.process(frame, table, trace),
            RewriteRule::DynamicNet(rule) => rule.process(frame, table, trace),
            RewriteRule::PassAllTg(rule) | RewriteRule::PassAllPc(rule) => rule.process(frame, trace),
        }
    }

    /// Name of the network the rule belongs to
    pub fn network(&self) -> &str {
        match self {
            RewriteRule::TgRemap(r) | RewriteRule::PcRemap(r) => &r.network,
            RewriteRule::TypeConvert(r) => &r.network,
            RewriteRule::SourceRemap(r) => &r.network,
            RewriteRule::DynamicRf(r) => &r.network,
            RewriteRule::DynamicNet(r) => &r.network,
            RewriteRule::PassAllTg(r) | RewriteRule::PassAllPc(r) => &r.network,
        }
    }
}

/// Run `frame` through `rules` in order; the first non-`Unmatched` result wins
pub fn apply(rules: &mut [RewriteRule], frame: &mut Frame, table: &mut DynTgTable, trace: bool) -> RuleResult {
    for rule in rules.iter_mut() {
        match rule.process(frame, table, trace) {
            RuleResult::Unmatched => continue,
            decided => return decided,
        }
    }
    RuleResult::Unmatched
}

/// Rules of one network, split by direction and precedence tier
#[derive(Debug, Default)]
pub struct RuleSet {
    /// Repeater to network
    pub rf: Vec<RewriteRule>,
    /// Network to repeater
    pub net: Vec<RewriteRule>,
    /// Repeater to network, tried after every network's `rf` list
    pub rf_pass: Vec<RewriteRule>,
    /// Network to repeater, tried after `net`
    pub net_pass: Vec<RewriteRule>,
}

impl RuleSet {
    /// Expand rule declarations for network `index`
    ///
    /// Dynamic talkgroup pairs get a binding in `table`.
    pub fn from_config(index: usize, network: &str, rules: &[RewriteConfig], table: &mut DynTgTable) -> Self {
        let mut set = RuleSet::default();
        for rule in rules {
            match *rule {
                RewriteConfig::Tg {
                    from_slot,
                    from_tg,
                    to_slot,
                    to_tg,
                    range,
                } => {
                    let out = Remap::new(network, CallType::Group, from_slot, from_tg, to_slot, to_tg, range);
                    set.net.push(RewriteRule::TgRemap(out.reversed()));
                    set.rf.push(RewriteRule::TgRemap(out));
                }
                RewriteConfig::Pc {
                    from_slot,
                    from_id,
                    to_slot,
                    to_id,
                    range,
                } => {
                    let out = Remap::new(network, CallType::Private, from_slot, from_id, to_slot, to_id, range);
                    set.net.push(RewriteRule::PcRemap(out.reversed()));
                    set.rf.push(RewriteRule::PcRemap(out));
                }
                RewriteConfig::Type {
                    from_slot,
                    from_tg,
                    to_slot,
                    to_id,
                    range,
                } => {
                    let out = TypeConvert::new(network, CallType::Group, from_slot, from_tg, to_slot, to_id, range);
                    set.net.push(RewriteRule::TypeConvert(out.reversed()));
                    set.rf.push(RewriteRule::TypeConvert(out));
                }
                RewriteConfig::Src {
                    from_slot,
                    from_id,
                    to_slot,
                    to_tg,
                    range,
                } => {
                    set.net.push(RewriteRule::SourceRemap(SourceRemap::new(
                        network, from_slot, from_id, to_slot, to_tg, range,
                    )));
                }
                RewriteConfig::Dynamic {
                    slot,
                    from_tg,
                    range,
                    relay_tg,
                    disconnect_pc,
                    status_pc,
                    ref exclude,
                } => {
                    let binding = table.add(index, slot, relay_tg);
                    set.rf.push(RewriteRule::DynamicRf(DynamicRf::new(
                        network,
                        binding,
                        slot,
                        relay_tg,
                        IdRange::new(from_tg, range),
                        exclude.clone(),
                        disconnect_pc,
                        status_pc,
                    )));
                    set.net.push(RewriteRule::DynamicNet(DynamicNet::new(network, binding, slot, relay_tg)));
                }
                RewriteConfig::PassAllTg { slot } => {
                    set.rf_pass.push(RewriteRule::PassAllTg(PassAll::new(network, CallType::Group, slot)));
                    set.net_pass.push(RewriteRule::PassAllTg(PassAll::new(network, CallType::Group, slot)));
                }
                RewriteConfig::PassAllPc { slot } => {
                    set.rf_pass.push(RewriteRule::PassAllPc(PassAll::new(network, CallType::Private, slot)));
                    set.net_pass.push(RewriteRule::PassAllPc(PassAll::new(network, CallType::Private, slot)));
                }
            }
        }
        set
    }

    /// Fixed pair mapping a repeater slot/talkgroup to another slot/talkgroup
    pub fn talkgroup_pair(network: &str, slot: Slot, tg: u32, to_slot: Slot, to_tg: u32) -> Self {
        let out = Remap::new(network, CallType::Group, slot, tg, to_slot, to_tg, 1);
        RuleSet {
            net: vec![RewriteRule::TgRemap(out.reversed())],
            rf: vec![RewriteRule::TgRemap(out)],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmr_protocol::PayloadKind;

    fn group(slot: Slot, dst: u32) -> Frame {
        Frame::new(slot, CallType::Group, 1_234_567, dst, PayloadKind::Voice)
    }

    #[test]
    fn test_first_match_wins() {
        let mut table = DynTgTable::new();
        let mut rules = vec![
            RewriteRule::TgRemap(Remap::new("A", CallType::Group, Slot::One, 100, Slot::One, 200, 10)),
            RewriteRule::TgRemap(Remap::new("A", CallType::Group, Slot::One, 100, Slot::One, 300, 10)),
        ];
        let mut frame = group(Slot::One, 101);
        assert_eq!(apply(&mut rules, &mut frame, &mut table, false), RuleResult::Matched);
        assert_eq!(frame.dst_id, 201);
    }

    #[test]
    fn test_ignored_stops_scan() {
        let mut table = DynTgTable::new();
        let binding = table.add(0, Slot::One, 9);
        let mut rules = vec![
            RewriteRule::DynamicRf(DynamicRf::new("A", binding, Slot::One, 9, IdRange::new(100, 10), vec![], 4000, 5000)),
            RewriteRule::PassAllPc(PassAll::new("A", CallType::Private, Slot::One)),
        ];
        let mut frame = Frame::new(Slot::One, CallType::Private, 1, 5000, PayloadKind::Voice);
        assert_eq!(apply(&mut rules, &mut frame, &mut table, false), RuleResult::Ignored);
    }

    #[test]
    fn test_config_expansion() {
        let mut table = DynTgTable::new();
        let decls = vec![
            RewriteConfig::Tg { from_slot: Slot::One, from_tg: 100, to_slot: Slot::Two, to_tg: 200, range: 10 },
            RewriteConfig::Src { from_slot: Slot::One, from_id: 9990, to_slot: Slot::One, to_tg: 9990, range: 1 },
            RewriteConfig::Dynamic {
                slot: Slot::Two,
                from_tg: 1000,
                range: 100,
                relay_tg: 9,
                disconnect_pc: 4000,
                status_pc: 5000,
                exclude: vec![],
            },
            RewriteConfig::PassAllTg { slot: Slot::One },
        ];
        let mut set = RuleSet::from_config(3, "BM", &decls, &mut table);
        assert_eq!(set.rf.len(), 2);
        assert_eq!(set.net.len(), 3);
        assert_eq!(set.rf_pass.len(), 1);
        assert_eq!(set.net_pass.len(), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().network, 3);
        assert!(set.rf.iter().all(|r| r.network() == "BM"));

        let mut back = group(Slot::Two, 205);
        assert_eq!(apply(&mut set.net, &mut back, &mut table, false), RuleResult::Matched);
        assert_eq!((back.slot, back.dst_id), (Slot::One, 105));
    }

    #[test]
    fn test_talkgroup_pair() {
        let mut table = DynTgTable::new();
        let mut set = RuleSet::talkgroup_pair("XLX", Slot::One, 6, Slot::Two, 9);
        let mut out = group(Slot::One, 6);
        assert_eq!(apply(&mut set.rf, &mut out, &mut table, false), RuleResult::Matched);
        assert_eq!((out.slot, out.dst_id), (Slot::Two, 9));
        assert_eq!(apply(&mut set.net, &mut out, &mut table, false), RuleResult::Matched);
        assert_eq!((out.slot, out.dst_id), (Slot::One, 6));
    }
}
