//! Gateway events
//!
//! The dispatcher records what it decided (slot claims, drops, session
//! changes) as [`GatewayEvent`]s. They are buffered and drained by whoever
//! drives the gateway, so tests can observe routing without scraping logs.

use dmr_protocol::Slot;

use crate::network::LinkState;
use crate::ownership::SlotOwner;

/// Where a frame came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Repeater,
    /// Network by index
    Network(usize),
    Reflector,
}

/// Why a frame was not forwarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The slot belongs to someone else
    SlotBusy { owner: SlotOwner },
    /// No rule claimed the frame
    Unrouted,
    /// A rule consumed the frame
    Ignored,
    /// The destination link could not send it
    LinkDown,
}

/// Everything the dispatcher reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    // -------------------------------------------------------------------------
    // Slot ownership
    // -------------------------------------------------------------------------
    /// A source took a free slot
    SlotClaimed {
        slot: Slot,
        owner: SlotOwner,
    },

    /// A slot went quiet and is free again
    SlotReleased {
        slot: Slot,
        owner: SlotOwner,
    },

    /// A frame was not forwarded
    FrameDropped {
        slot: Slot,
        source: FrameSource,
        reason: DropReason,
    },

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------
    /// A network session moved to a new state
    LinkStateChanged {
        /// Network name
        network: String,
        state: LinkState,
    },

    /// Linked to a reflector room
    ReflectorLinked {
        reflector: u32,
        room: u32,
    },

    /// Reflector link dropped or was undone
    ReflectorUnlinked {
        reflector: u32,
    },

    /// A dynamic talkgroup selection was committed; 0 means cleared
    DynamicTgChanged {
        /// Network name
        network: String,
        slot: Slot,
        tg: u32,
    },
}

impl GatewayEvent {
    /// Whether this event is about slot arbitration
    pub fn is_ownership(&self) -> bool {
        matches!(
            self,
            GatewayEvent::SlotClaimed { .. }
                | GatewayEvent::SlotReleased { .. }
                | GatewayEvent::FrameDropped { .. }
        )
    }

    /// Slot the event concerns, if any
    pub fn slot(&self) -> Option<Slot> {
        match self {
            GatewayEvent::SlotClaimed { slot, .. }
            | GatewayEvent::SlotReleased { slot, .. }
            | GatewayEvent::FrameDropped { slot, .. }
            | GatewayEvent::DynamicTgChanged { slot, .. } => Some(*slot),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let claimed = GatewayEvent::SlotClaimed {
            slot: Slot::Two,
            owner: SlotOwner::Reflector,
        };
        assert!(claimed.is_ownership());
        assert_eq!(claimed.slot(), Some(Slot::Two));

        let linked = GatewayEvent::ReflectorLinked {
            reflector: 950,
            room: 4001,
        };
        assert!(!linked.is_ownership());
        assert_eq!(linked.slot(), None);
    }
}
