//! Text control sockets
//!
//! Two small UDP text protocols drive the gateway from outside:
//!
//! - dynamic talkgroup control: `DynTG <slot> <talkgroup>`, no reply
//! - remote control: `enable netN`, `disable netN`, `enable xlx`,
//!   `disable xlx`, `status`, `hosts`; answered with `OK`, `KO` or a summary
//!
//! Networks are numbered from 1 in the order they are configured.

use dmr_protocol::{Slot, MAX_ID};
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::transport::Transport;

/// What a remote command acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Network by zero-based index
    Network(usize),
    Reflector,
}

/// A parsed remote-control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Enable(Target),
    Disable(Target),
    Status,
    Hosts,
}

/// Parse `DynTG <slot> <talkgroup>`; talkgroup 0 clears the selection
pub fn parse_dyn_tg(text: &str) -> Option<(Slot, u32)> {
    let mut words = text.split_whitespace();
    if !words.next()?.eq_ignore_ascii_case("DynTG") {
        return None;
    }
    let slot = Slot::from_number(words.next()?.parse().ok()?)?;
    let tg: u32 = words.next()?.parse().ok()?;
    if tg > MAX_ID || words.next().is_some() {
        return None;
    }
    Some((slot, tg))
}

fn parse_target(word: &str) -> Option<Target> {
    if word.eq_ignore_ascii_case("xlx") {
        return Some(Target::Reflector);
    }
    let prefix = word.get(..3)?;
    if !prefix.eq_ignore_ascii_case("net") {
        return None;
    }
    match word[3..].parse::<usize>().ok()? {
        0 => None,
        n => Some(Target::Network(n - 1)),
    }
}

/// Parse a remote-control command
pub fn parse_remote(text: &str) -> Option<RemoteCommand> {
    let words: Vec<&str> = text.split_whitespace().collect();
    match words.as_slice() {
        [command, target] if command.eq_ignore_ascii_case("enable") => {
            parse_target(target).map(RemoteCommand::Enable)
        }
        [command, target] if command.eq_ignore_ascii_case("disable") => {
            parse_target(target).map(RemoteCommand::Disable)
        }
        [command] if command.eq_ignore_ascii_case("status") => Some(RemoteCommand::Status),
        [command] if command.eq_ignore_ascii_case("hosts") => Some(RemoteCommand::Hosts),
        _ => None,
    }
}

/// A text datagram socket answering whoever spoke last
pub struct ControlSocket {
    name: &'static str,
    transport: Box<dyn Transport>,
}

impl ControlSocket {
    pub fn new(name: &'static str, transport: Box<dyn Transport>) -> Self {
        Self { name, transport }
    }

    pub fn open(&mut self) -> Result<(), LinkError> {
        self.transport.open()
    }

    /// Next command text, with surrounding whitespace removed
    pub fn read(&mut self) -> Option<String> {
        let data = self.transport.try_recv()?;
        let text = String::from_utf8_lossy(&data).trim().to_string();
        debug!("{} control: {:?}", self.name, text);
        Some(text)
    }

    pub fn reply(&mut self, text: &str) -> bool {
        match self.transport.send(text.as_bytes()) {
            Ok(()) => true,
            Err(e) => {
                warn!("{} control, cannot reply: {}", self.name, e);
                false
            }
        }
    }

    pub fn close(&mut self) {
        self.transport.close();
    }
}
