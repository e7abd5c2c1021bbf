//! Voice prompt boundary
//!
//! Audio synthesis lives outside the gateway. A prompt source is told what
//! happened and hands back ready-made frames one per tick; the dispatcher
//! only writes them to the repeater while nobody owns the slot.

use dmr_protocol::Frame;

/// What a prompt should announce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    /// Linked to a talkgroup (dynamic talkgroup selection)
    Talkgroup(u32),
    /// Linked to a reflector and room
    Reflector { reflector: u32, room: u32 },
    /// Nothing linked
    Unlinked,
}

/// A source of synthesized announcement frames
pub trait VoicePrompt: Send {
    /// Queue an announcement
    fn announce(&mut self, announcement: Announcement);

    /// Drop anything queued or playing
    fn abort(&mut self);

    /// Next frame to play, if any
    fn read(&mut self) -> Option<Frame>;
}
