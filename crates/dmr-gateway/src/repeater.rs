//! Session with the local repeater
//!
//! The gateway plays the network core here: the repeater logs in to us. We
//! hand out a salt, take its authentication on trust, keep its configuration
//! block for the upstream logins and answer its pings.

use std::collections::VecDeque;
use std::time::Duration;

use dmr_protocol::wire::{self, ConfigBlock, Message};
use dmr_protocol::Frame;
use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::timer::Timer;
use crate::transport::Transport;

const INBOUND_CAPACITY: usize = 512;
const SIDE_CHANNEL_CAPACITY: usize = 64;

/// Repeater session progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeaterState {
    /// Nothing heard yet, or the repeater went away
    Listening,
    /// Salt sent, waiting for authentication
    WaitingAuthorisation,
    /// Authenticated, waiting for the configuration block
    WaitingConfig,
    Running,
}

pub struct RepeaterLink {
    transport: Box<dyn Transport>,
    state: RepeaterState,
    id: u32,
    salt: u32,
    config: Option<ConfigBlock>,
    config_changed: bool,
    timeout: Timer,
    debug: bool,
    inbound: VecDeque<Frame>,
    positions: VecDeque<Vec<u8>>,
    talker_aliases: VecDeque<Vec<u8>>,
}

impl RepeaterLink {
    pub fn new(transport: Box<dyn Transport>, timeout: Duration, debug: bool) -> Self {
        Self {
            transport,
            state: RepeaterState::Listening,
            id: 0,
            salt: 0,
            config: None,
            config_changed: false,
            timeout: Timer::new(timeout),
            debug,
            inbound: VecDeque::new(),
            positions: VecDeque::new(),
            talker_aliases: VecDeque::new(),
        }
    }

    /// Open the listening socket
    pub fn open(&mut self) -> Result<(), LinkError> {
        self.transport.open()
    }

    pub fn state(&self) -> RepeaterState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == RepeaterState::Running
    }

    /// Repeater id from its login, 0 before
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> Option<&ConfigBlock> {
        self.config.as_ref()
    }

    /// Configuration received since the last call, with the repeater id
    pub fn take_config_update(&mut self) -> Option<(u32, ConfigBlock)> {
        if !std::mem::take(&mut self.config_changed) {
            return None;
        }
        self.config.clone().map(|block| (self.id, block))
    }

    pub fn read(&mut self) -> Option<Frame> {
        self.inbound.pop_front()
    }

    pub fn read_position(&mut self) -> Option<Vec<u8>> {
        self.positions.pop_front()
    }

    pub fn read_talker_alias(&mut self) -> Option<Vec<u8>> {
        self.talker_aliases.pop_front()
    }

    /// Send a traffic frame to the repeater
    pub fn write(&mut self, frame: &Frame) -> bool {
        if !self.is_running() {
            return false;
        }
        let data = wire::encode_frame(frame, self.id);
        self.send(&data)
    }

    /// Ask the repeater to transmit a beacon
    pub fn write_beacon(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.send(&wire::beacon(self.id))
    }

    pub fn clock(&mut self, dt: Duration) {
        while let Some(data) = self.transport.try_recv() {
            self.handle(&data);
        }

        self.timeout.clock(dt);
        if self.timeout.has_expired() {
            warn!("Connection to the repeater has timed out");
            self.disconnected();
        }
    }

    /// Tell the repeater we are going away
    pub fn close(&mut self) {
        if self.is_running() {
            self.send(&wire::master_close(self.id));
        }
        self.transport.close();
        self.disconnected();
    }

    fn disconnected(&mut self) {
        self.state = RepeaterState::Listening;
        self.timeout.stop();
        self.inbound.clear();
        self.positions.clear();
        self.talker_aliases.clear();
    }

    fn send(&mut self, data: &[u8]) -> bool {
        if self.debug {
            debug!("Repeater tx {:02X?}", data);
        }
        match self.transport.send(data) {
            Ok(()) => true,
            Err(e) => {
                debug!("Repeater send failed: {}", e);
                false
            }
        }
    }

    fn handle(&mut self, data: &[u8]) {
        if self.debug {
            debug!("Repeater rx {:02X?}", data);
        }
        let message = match wire::decode(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Ignoring datagram from the repeater: {}", e);
                return;
            }
        };
        self.timeout.start();

        match message {
            Message::Login { id } => {
                self.id = id;
                self.salt = rand::random();
                self.state = RepeaterState::WaitingAuthorisation;
                self.send(&wire::ack(self.salt));
            }
            Message::Auth { .. } => {
                if self.state == RepeaterState::Listening {
                    self.send(&wire::nak(self.id));
                    return;
                }
                self.state = RepeaterState::WaitingConfig;
                self.send(&wire::ack(self.id));
            }
            Message::Config { block, .. } => {
                if self.state == RepeaterState::Listening {
                    self.send(&wire::nak(self.id));
                    return;
                }
                info!(
                    "Repeater {} logged in: {} {}",
                    self.id,
                    block.callsign(),
                    block.description()
                );
                self.config = Some(block);
                self.config_changed = true;
                self.state = RepeaterState::Running;
                self.send(&wire::ack(self.id));
            }
            Message::Options { text, .. } => {
                debug!("Repeater options: {}", text);
                self.send(&wire::ack(self.id));
            }
            Message::Ping { .. } => {
                if self.is_running() {
                    self.send(&wire::pong(self.id));
                } else {
                    self.send(&wire::nak(self.id));
                }
            }
            Message::RepeaterClose { .. } => {
                info!("Repeater has disconnected");
                self.disconnected();
            }
            Message::Data { frame, .. } => {
                if self.is_running() {
                    push_bounded(&mut self.inbound, frame, INBOUND_CAPACITY);
                }
            }
            Message::Position(data) => {
                if self.is_running() {
                    push_bounded(&mut self.positions, data, SIDE_CHANNEL_CAPACITY);
                }
            }
            Message::TalkerAlias(data) => {
                if self.is_running() {
                    push_bounded(&mut self.talker_aliases, data, SIDE_CHANNEL_CAPACITY);
                }
            }
            other => debug!("Unexpected message from the repeater {:?}", other),
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, capacity: usize) {
    if queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{VirtualPeer, VirtualTransport};
    use dmr_protocol::wire::ConfigFields;
    use dmr_protocol::{CallType, PayloadKind, Slot};

    const TICK: Duration = Duration::from_millis(10);

    fn repeater() -> (RepeaterLink, VirtualPeer) {
        let (transport, peer) = VirtualTransport::pair();
        let mut link = RepeaterLink::new(Box::new(transport), Duration::from_secs(60), false);
        link.open().unwrap();
        (link, peer)
    }

    fn login(link: &mut RepeaterLink, peer: &mut VirtualPeer) {
        peer.send(&wire::login(234_500_101));
        link.clock(TICK);
        let Ok(Message::Ack { value: salt }) = wire::decode(&peer.recv().unwrap()) else {
            panic!("expected salt");
        };
        peer.send(&wire::auth(234_500_101, salt, "anything"));
        link.clock(TICK);
        assert_eq!(peer.recv(), Some(wire::ack(234_500_101)));
        let block = ConfigBlock::new(&ConfigFields {
            callsign: "G4KLX",
            slots: '3',
            ..Default::default()
        });
        peer.send(&wire::config(234_500_101, &block));
        link.clock(TICK);
        assert_eq!(peer.recv(), Some(wire::ack(234_500_101)));
    }

    #[test]
    fn test_login_sequence() {
        let (mut link, mut peer) = repeater();
        login(&mut link, &mut peer);
        assert!(link.is_running());
        assert_eq!(link.id(), 234_500_101);

        let (id, block) = link.take_config_update().unwrap();
        assert_eq!(id, 234_500_101);
        assert_eq!(block.callsign(), "G4KLX");
        assert!(link.take_config_update().is_none());

        peer.send(&wire::ping(234_500_101));
        link.clock(TICK);
        assert_eq!(peer.recv(), Some(wire::pong(234_500_101)));
    }

    #[test]
    fn test_traffic_only_when_running() {
        let (mut link, mut peer) = repeater();
        let frame = Frame::new(Slot::One, CallType::Group, 1, 91, PayloadKind::VoiceHeader);
        peer.send(&wire::encode_frame(&frame, 234_500_101));
        link.clock(TICK);
        assert_eq!(link.read(), None);
        assert!(!link.write(&frame));

        login(&mut link, &mut peer);
        peer.send(&wire::encode_frame(&frame, 234_500_101));
        link.clock(TICK);
        assert_eq!(link.read(), Some(frame.clone()));

        assert!(link.write(&frame));
        assert_eq!(peer.recv().unwrap(), wire::encode_frame(&frame, 234_500_101).to_vec());
        assert!(link.write_beacon());
        assert_eq!(peer.recv(), Some(wire::beacon(234_500_101)));
    }

    #[test]
    fn test_side_channel_queued() {
        let (mut link, mut peer) = repeater();
        login(&mut link, &mut peer);
        let mut alias = b"DMRA".to_vec();
        alias.extend_from_slice(&234_500_101u32.to_be_bytes());
        alias.extend_from_slice(&[0x23, 0xC8, 0x29, 0x00, b'G', b'4']);
        peer.send(&alias);
        let mut position = alias.clone();
        position[3] = b'G';
        peer.send(&position);
        link.clock(TICK);
        assert_eq!(link.read_talker_alias(), Some(alias));
        assert_eq!(link.read_position(), Some(position));
    }

    #[test]
    fn test_disconnect_and_timeout() {
        let (mut link, mut peer) = repeater();
        login(&mut link, &mut peer);
        peer.send(&wire::repeater_close(234_500_101));
        link.clock(TICK);
        assert_eq!(link.state(), RepeaterState::Listening);

        login(&mut link, &mut peer);
        link.clock(Duration::from_secs(61));
        assert_eq!(link.state(), RepeaterState::Listening);
        assert!(link.config().is_some());
    }

    #[test]
    fn test_auth_before_login_refused() {
        let (mut link, mut peer) = repeater();
        peer.send(&wire::auth(1, 2, "x"));
        link.clock(TICK);
        assert_eq!(peer.recv(), Some(wire::nak(0)));
        assert_eq!(link.state(), RepeaterState::Listening);
    }
}
