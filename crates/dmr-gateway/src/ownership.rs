//! Per-slot ownership
//!
//! Whoever gets traffic forwarded on a slot first owns that slot until it
//! has been quiet for the hold time. While a slot is owned, traffic on it
//! from anyone else is dropped.

use std::time::Duration;

use dmr_protocol::Slot;

use crate::timer::Timer;

/// Source that can own a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotOwner {
    /// Network by index
    Network(usize),
    Reflector,
}

impl std::fmt::Display for SlotOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotOwner::Network(i) => write!(f, "network {}", i + 1),
            SlotOwner::Reflector => f.write_str("reflector"),
        }
    }
}

#[derive(Debug, Clone)]
struct Record {
    owner: Option<SlotOwner>,
    timer: Timer,
}

/// Ownership records for both slots
#[derive(Debug, Clone)]
pub struct SlotOwnership {
    records: [Record; 2],
}

impl Default for SlotOwnership {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotOwnership {
    pub fn new() -> Self {
        let record = Record {
            owner: None,
            timer: Timer::new(Duration::ZERO),
        };
        Self {
            records: [record.clone(), record],
        }
    }

    pub fn owner(&self, slot: Slot) -> Option<SlotOwner> {
        self.records[slot.index()].owner
    }

    /// Whether `owner` may forward on `slot` right now
    pub fn can_forward(&self, slot: Slot, owner: SlotOwner) -> bool {
        match self.records[slot.index()].owner {
            None => true,
            Some(current) => current == owner,
        }
    }

    /// Take or refresh ownership of `slot` for `hold`
    ///
    /// Returns `Err` with the current owner when someone else holds it. On
    /// success the flag tells whether ownership is new.
    pub fn claim(&mut self, slot: Slot, owner: SlotOwner, hold: Duration) -> Result<bool, SlotOwner> {
        let record = &mut self.records[slot.index()];
        match record.owner {
            Some(current) if current != owner => Err(current),
            current => {
                record.owner = Some(owner);
                record.timer.set_timeout(hold);
                record.timer.start();
                Ok(current.is_none())
            }
        }
    }

    pub fn release(&mut self, slot: Slot) -> Option<SlotOwner> {
        let record = &mut self.records[slot.index()];
        record.timer.stop();
        record.owner.take()
    }

    /// Advance the hold timers and release slots that went quiet
    pub fn clock(&mut self, dt: Duration) -> Vec<(Slot, SlotOwner)> {
        let mut released = Vec::new();
        for slot in Slot::ALL {
            let record = &mut self.records[slot.index()];
            record.timer.clock(dt);
            if record.timer.has_expired() {
                if let Some(owner) = self.release(slot) {
                    released.push((slot, owner));
                }
            }
        }
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const HOLD: Duration = Duration::from_secs(10);

    #[test]
    fn test_claim_and_expire() {
        let mut slots = SlotOwnership::new();
        assert_eq!(slots.claim(Slot::One, SlotOwner::Network(0), HOLD), Ok(true));
        assert_eq!(slots.claim(Slot::One, SlotOwner::Network(0), HOLD), Ok(false));
        assert_eq!(
            slots.claim(Slot::One, SlotOwner::Network(1), HOLD),
            Err(SlotOwner::Network(0))
        );
        assert!(slots.can_forward(Slot::Two, SlotOwner::Reflector));

        assert!(slots.clock(Duration::from_secs(9)).is_empty());
        assert_eq!(
            slots.clock(Duration::from_secs(1)),
            vec![(Slot::One, SlotOwner::Network(0))]
        );
        assert_eq!(slots.owner(Slot::One), None);
        assert_eq!(slots.claim(Slot::One, SlotOwner::Network(1), HOLD), Ok(true));
    }

    #[test]
    fn test_refresh_extends_hold() {
        let mut slots = SlotOwnership::new();
        slots.claim(Slot::Two, SlotOwner::Reflector, HOLD).unwrap();
        slots.clock(Duration::from_secs(8));
        slots.claim(Slot::Two, SlotOwner::Reflector, HOLD).unwrap();
        assert!(slots.clock(Duration::from_secs(8)).is_empty());
        assert_eq!(slots.owner(Slot::Two), Some(SlotOwner::Reflector));
    }

    #[derive(Debug, Clone)]
    enum Step {
        Claim(bool, u8),
        Clock(u64),
    }

    fn step() -> impl Strategy<Value = Step> {
        prop_oneof![
            (any::<bool>(), 0u8..4).prop_map(|(s, o)| Step::Claim(s, o)),
            (0u64..6000).prop_map(Step::Clock),
        ]
    }

    fn owner_of(n: u8) -> SlotOwner {
        if n == 3 {
            SlotOwner::Reflector
        } else {
            SlotOwner::Network(n as usize)
        }
    }

    proptest! {
        #[test]
        fn at_most_one_owner_per_slot(steps in prop::collection::vec(step(), 1..200)) {
            let mut slots = SlotOwnership::new();
            let mut model: [Option<SlotOwner>; 2] = [None, None];
            for step in steps {
                match step {
                    Step::Claim(two, n) => {
                        let slot = if two { Slot::Two } else { Slot::One };
                        let owner = owner_of(n);
                        let result = slots.claim(slot, owner, Duration::from_secs(3));
                        match model[slot.index()] {
                            Some(current) if current != owner => {
                                prop_assert_eq!(result, Err(current));
                            }
                            _ => {
                                prop_assert!(result.is_ok());
                                model[slot.index()] = Some(owner);
                            }
                        }
                    }
                    Step::Clock(ms) => {
                        for (slot, owner) in slots.clock(Duration::from_millis(ms)) {
                            prop_assert_eq!(model[slot.index()], Some(owner));
                            model[slot.index()] = None;
                        }
                    }
                }
                for slot in Slot::ALL {
                    prop_assert_eq!(slots.owner(slot), model[slot.index()]);
                }
            }
        }
    }
}
