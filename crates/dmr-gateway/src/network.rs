//! Session to one upstream network core
//!
//! The link logs in, answers the salt challenge, pushes the repeater's
//! configuration (and optional options text), then keeps the session alive
//! with pings. Any silence longer than the timeout tears the session down
//! and starts over. Traffic is only queued while the session is running
//! and the link is enabled.

use std::collections::VecDeque;
use std::time::Duration;

use dmr_protocol::wire::{self, ConfigBlock, Message};
use dmr_protocol::Frame;
use tracing::{debug, info, warn};

use crate::timer::Timer;
use crate::transport::Transport;

/// Frames held for the dispatcher before the oldest are dropped
const INBOUND_CAPACITY: usize = 512;

/// Session progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    WaitingConnect,
    WaitingLogin,
    WaitingAuthorisation,
    WaitingConfig,
    WaitingOptions,
    Running,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LinkState::WaitingConnect => "waiting for connect",
            LinkState::WaitingLogin => "waiting for login",
            LinkState::WaitingAuthorisation => "waiting for authorisation",
            LinkState::WaitingConfig => "waiting for config",
            LinkState::WaitingOptions => "waiting for options",
            LinkState::Running => "running",
        };
        f.write_str(name)
    }
}

/// Static settings of a network link
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub name: String,
    /// Remote host, for display
    pub address: String,
    pub port: u16,
    /// Id to log in with; the repeater's id when unset
    pub id: Option<u32>,
    pub password: String,
    pub options: Option<String>,
    /// Send the repeater's position in the configuration block
    pub location: bool,
    pub debug: bool,
    /// Keep-alive and retry interval
    pub ping_interval: Duration,
    /// Silence before the session is restarted
    pub timeout: Duration,
}

impl NetworkSettings {
    pub fn new(name: &str, address: &str, port: u16, password: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            port,
            id: None,
            password: password.to_string(),
            options: None,
            location: true,
            debug: false,
            ping_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(60),
        }
    }
}

/// One upstream session
pub struct NetworkLink {
    settings: NetworkSettings,
    transport: Box<dyn Transport>,
    state: LinkState,
    retry: Timer,
    timeout: Timer,
    id: u32,
    salt: u32,
    config: Option<ConfigBlock>,
    enabled: bool,
    wants_beacon: bool,
    inbound: VecDeque<Frame>,
}

impl NetworkLink {
    pub fn new(settings: NetworkSettings, transport: Box<dyn Transport>) -> Self {
        let retry = Timer::new(settings.ping_interval);
        let timeout = Timer::new(settings.timeout);
        Self {
            id: settings.id.unwrap_or(0),
            settings,
            transport,
            state: LinkState::WaitingConnect,
            retry,
            timeout,
            salt: 0,
            config: None,
            enabled: true,
            wants_beacon: false,
            inbound: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.settings
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Id used on this session
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.state == LinkState::Running
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }

    /// Frames waiting for the dispatcher
    pub fn queued(&self) -> usize {
        self.inbound.len()
    }

    /// Supply the repeater's id and configuration; the link starts logging
    /// in on the next clock
    pub fn set_repeater(&mut self, repeater_id: u32, block: &ConfigBlock) {
        if self.settings.id.is_none() {
            self.id = repeater_id;
        }
        let block = if self.settings.location {
            block.clone()
        } else {
            block.without_location()
        };
        self.config = Some(block);
    }

    /// Enable or disable traffic; disabling discards queued frames
    pub fn enable(&mut self, enabled: bool) {
        if !enabled {
            self.inbound.clear();
        }
        if enabled != self.enabled {
            info!(
                "{} network {}",
                self.settings.name,
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.enabled = enabled;
    }

    /// Next inbound traffic frame
    pub fn read(&mut self) -> Option<Frame> {
        if !self.enabled {
            return None;
        }
        self.inbound.pop_front()
    }

    /// Send a traffic frame; false when the session cannot carry it
    pub fn write(&mut self, frame: &Frame) -> bool {
        if !self.is_running() || !self.enabled {
            return false;
        }
        let data = wire::encode_frame(frame, self.id);
        self.send(&data)
    }

    /// Send a raw side-channel datagram
    pub fn write_raw(&mut self, data: &[u8]) -> bool {
        if !self.is_running() || !self.enabled {
            return false;
        }
        self.send(data)
    }

    /// Whether the core asked for a beacon since the last call
    pub fn take_beacon_request(&mut self) -> bool {
        std::mem::take(&mut self.wants_beacon)
    }

    /// Advance the session by `dt`
    pub fn clock(&mut self, dt: Duration) {
        if self.config.is_none() {
            return;
        }

        while let Some(data) = self.transport.try_recv() {
            self.handle(&data);
        }

        self.retry.clock(dt);
        self.timeout.clock(dt);

        if self.state != LinkState::WaitingConnect && self.timeout.has_expired() {
            warn!("{}, connection to the master has timed out, retrying connection", self.settings.name);
            self.reconnect();
            return;
        }

        match self.state {
            LinkState::WaitingConnect => {
                if !self.retry.is_running() || self.retry.has_expired() {
                    self.connect();
                }
            }
            LinkState::Running => {
                if self.retry.has_expired() {
                    self.send(&wire::ping(self.id));
                    self.retry.start();
                }
            }
            _ => {
                if self.retry.has_expired() {
                    self.send_step();
                    self.retry.start();
                }
            }
        }
    }

    /// Close the session, saying goodbye first when it is running
    pub fn close(&mut self) {
        if self.is_running() {
            info!("Closing connection to {}", self.settings.name);
            self.send(&wire::repeater_close(self.id));
        }
        self.transport.close();
        self.inbound.clear();
        self.retry.stop();
        self.timeout.stop();
        self.set_state(LinkState::WaitingConnect);
    }

    fn connect(&mut self) {
        debug!("Opening connection to {}", self.settings.name);
        match self.transport.open() {
            Ok(()) => {
                self.set_state(LinkState::WaitingLogin);
                self.send(&wire::login(self.id));
                self.timeout.start();
            }
            Err(e) if e.is_transient() => {
                debug!("{}, cannot open connection yet: {}", self.settings.name, e);
                self.set_state(LinkState::WaitingConnect);
                self.retry.stop();
                return;
            }
            Err(e) => {
                warn!("{}, cannot open connection: {}", self.settings.name, e);
                self.set_state(LinkState::WaitingConnect);
            }
        }
        self.retry.start();
    }

    fn reconnect(&mut self) {
        self.transport.close();
        self.inbound.clear();
        self.connect();
    }

    /// Resend whatever the current handshake step expects an answer to
    fn send_step(&mut self) {
        match self.state {
            LinkState::WaitingLogin => {
                self.send(&wire::login(self.id));
            }
            LinkState::WaitingAuthorisation => {
                self.send(&wire::auth(self.id, self.salt, &self.settings.password));
            }
            LinkState::WaitingConfig => {
                if let Some(block) = &self.config {
                    let data = wire::config(self.id, block);
                    self.send(&data);
                }
            }
            LinkState::WaitingOptions => {
                if let Some(options) = &self.settings.options {
                    let data = wire::options(self.id, options);
                    self.send(&data);
                }
            }
            LinkState::WaitingConnect | LinkState::Running => {}
        }
    }

    fn send(&mut self, data: &[u8]) -> bool {
        if self.settings.debug {
            debug!("{} tx {:02X?}", self.settings.name, data);
        }
        match self.transport.send(data) {
            Ok(()) => true,
            Err(e) => {
                debug!("{}, send failed: {}", self.settings.name, e);
                false
            }
        }
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!("{} {} -> {}", self.settings.name, self.state, state);
            self.state = state;
        }
    }

    fn handle(&mut self, data: &[u8]) {
        if self.settings.debug {
            debug!("{} rx {:02X?}", self.settings.name, data);
        }
        let message = match wire::decode(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("{}, ignoring datagram: {}", self.settings.name, e);
                return;
            }
        };
        self.timeout.start();

        match message {
            Message::Data { frame, .. } => {
                if self.is_running() && self.enabled {
                    if self.inbound.len() >= INBOUND_CAPACITY {
                        warn!("{}, inbound queue full, dropping oldest frame", self.settings.name);
                        self.inbound.pop_front();
                    }
                    self.inbound.push_back(frame);
                }
            }
            Message::Nak { .. } => {
                if self.is_running() {
                    warn!("{}, login to the master has failed, retrying login", self.settings.name);
                    self.inbound.clear();
                    self.set_state(LinkState::WaitingLogin);
                    self.send(&wire::login(self.id));
                    self.retry.start();
                } else {
                    warn!("{}, login to the master has failed, retrying network", self.settings.name);
                    self.transport.close();
                    self.timeout.stop();
                    self.set_state(LinkState::WaitingConnect);
                    self.retry.start();
                }
            }
            Message::Ack { value } => self.handle_ack(value),
            Message::MasterClose { .. } => {
                warn!("{}, master is closing down", self.settings.name);
                self.reconnect();
            }
            Message::Beacon { .. } => {
                debug!("{}, beacon requested", self.settings.name);
                self.wants_beacon = true;
            }
            Message::Pong { .. } => {}
            other => debug!("{}, unexpected message {:?}", self.settings.name, other),
        }
    }

    fn handle_ack(&mut self, value: u32) {
        match self.state {
            LinkState::WaitingLogin => {
                self.salt = value;
                self.set_state(LinkState::WaitingAuthorisation);
                self.send_step();
            }
            LinkState::WaitingAuthorisation => {
                self.set_state(LinkState::WaitingConfig);
                self.send_step();
            }
            LinkState::WaitingConfig => {
                if self.settings.options.is_some() {
                    self.set_state(LinkState::WaitingOptions);
                    self.send_step();
                } else {
                    self.logged_in();
                }
            }
            LinkState::WaitingOptions => self.logged_in(),
            LinkState::WaitingConnect | LinkState::Running => {}
        }
        self.retry.start();
    }

    fn logged_in(&mut self) {
        info!("Logged into {} successfully", self.settings.name);
        self.set_state(LinkState::Running);
    }
}

impl std::fmt::Debug for NetworkLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkLink")
            .field("name", &self.settings.name)
            .field("state", &self.state)
            .field("id", &self.id)
            .field("enabled", &self.enabled)
            .field("queued", &self.inbound.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{VirtualPeer, VirtualTransport};
    use dmr_protocol::wire::ConfigFields;
    use dmr_protocol::{CallType, PayloadKind, Slot};

    const TICK: Duration = Duration::from_millis(10);

    fn block() -> ConfigBlock {
        ConfigBlock::new(&ConfigFields {
            callsign: "G4KLX",
            latitude: 51.5,
            longitude: -0.1,
            location: "London",
            slots: '3',
            ..Default::default()
        })
    }

    fn link(options: Option<&str>) -> (NetworkLink, VirtualPeer) {
        let (transport, peer) = VirtualTransport::pair();
        let mut settings = NetworkSettings::new("BM", "127.0.0.1", 62031, "passw0rd");
        settings.options = options.map(str::to_string);
        let mut link = NetworkLink::new(settings, Box::new(transport));
        link.set_repeater(234_500_101, &block());
        (link, peer)
    }

    fn run_handshake(link: &mut NetworkLink, peer: &mut VirtualPeer) {
        link.clock(TICK);
        assert_eq!(peer.recv(), Some(wire::login(234_500_101)));
        peer.send(&wire::ack(0x1122_3344));
        link.clock(TICK);
        peer.recv();
        peer.send(&wire::ack(234_500_101));
        link.clock(TICK);
        peer.recv();
        peer.send(&wire::ack(234_500_101));
        link.clock(TICK);
    }

    #[test]
    fn test_waits_for_repeater_config() {
        let (transport, mut peer) = VirtualTransport::pair();
        let mut link = NetworkLink::new(NetworkSettings::new("BM", "h", 1, "p"), Box::new(transport));
        link.clock(TICK);
        assert_eq!(peer.recv(), None);
        assert_eq!(link.state(), LinkState::WaitingConnect);
    }

    #[test]
    fn test_handshake_sequence() {
        let (mut link, mut peer) = link(Some("TS2=91"));

        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingLogin);
        assert_eq!(peer.recv(), Some(wire::login(234_500_101)));

        peer.send(&wire::ack(0xA1B2_C3D4));
        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingAuthorisation);
        assert_eq!(peer.recv(), Some(wire::auth(234_500_101, 0xA1B2_C3D4, "passw0rd")));

        peer.send(&wire::ack(234_500_101));
        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingConfig);
        let config = peer.recv().unwrap();
        assert_eq!(&config[..4], b"RPTC");

        peer.send(&wire::ack(234_500_101));
        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingOptions);
        assert_eq!(peer.recv(), Some(wire::options(234_500_101, "TS2=91")));

        peer.send(&wire::ack(234_500_101));
        link.clock(TICK);
        assert!(link.is_running());
    }

    #[test]
    fn test_location_hidden() {
        let (transport, mut peer) = VirtualTransport::pair();
        let mut settings = NetworkSettings::new("BM", "h", 1, "p");
        settings.location = false;
        settings.id = Some(7);
        let mut link = NetworkLink::new(settings, Box::new(transport));
        link.set_repeater(234_500_101, &block());
        assert_eq!(link.id(), 7);

        link.clock(TICK);
        peer.send(&wire::ack(1));
        link.clock(TICK);
        peer.send(&wire::ack(7));
        link.clock(TICK);
        let sent = peer.drain();
        assert_eq!(sent[0], wire::login(7));
        let Ok(Message::Config { id, block: sent_block }) = wire::decode(&sent[2]) else {
            panic!("expected config");
        };
        assert_eq!(id, 7);
        assert_eq!(sent_block, block().without_location());
    }

    #[test]
    fn test_nak_while_running_relogs() {
        let (mut link, mut peer) = link(None);
        run_handshake(&mut link, &mut peer);
        assert!(link.is_running());
        peer.drain();

        peer.send(&wire::nak(234_500_101));
        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingLogin);
        assert_eq!(peer.recv(), Some(wire::login(234_500_101)));
        assert_eq!(peer.open_count(), 1);
    }

    #[test]
    fn test_nak_during_login_restarts() {
        let (mut link, mut peer) = link(None);
        link.clock(TICK);
        peer.send(&wire::ack(0x55));
        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingAuthorisation);
        peer.drain();

        peer.send(&wire::nak(0));
        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingConnect);
        assert!(!peer.is_open());

        link.clock(Duration::from_secs(10));
        assert_eq!(link.state(), LinkState::WaitingLogin);
        assert_eq!(peer.recv(), Some(wire::login(234_500_101)));
        assert_eq!(peer.open_count(), 2);
    }

    #[test]
    fn test_ping_and_timeout() {
        let (mut link, mut peer) = link(None);
        run_handshake(&mut link, &mut peer);
        peer.drain();

        link.clock(Duration::from_secs(10));
        assert_eq!(peer.recv(), Some(wire::ping(234_500_101)));
        peer.send(&wire::pong(234_500_101));
        link.clock(TICK);
        assert!(link.is_running());

        let mut frame = Frame::new(Slot::One, CallType::Group, 1, 91, PayloadKind::Voice);
        frame.stream_id = 9;
        peer.send(&wire::encode_frame(&frame, 3));
        peer.send(&wire::encode_frame(&frame, 3));
        link.clock(TICK);
        assert_eq!(link.queued(), 2);

        // Silence: pings go out but nothing comes back
        for _ in 0..6 {
            link.clock(Duration::from_secs(10));
        }
        assert_eq!(link.state(), LinkState::WaitingLogin);
        assert_eq!(link.queued(), 0);
        assert_eq!(peer.open_count(), 2);
        assert_eq!(peer.drain().last(), Some(&wire::login(234_500_101)));
    }

    #[test]
    fn test_disabled_link_drops_traffic() {
        let (mut link, mut peer) = link(None);
        run_handshake(&mut link, &mut peer);
        link.enable(false);

        let frame = Frame::new(Slot::Two, CallType::Group, 1, 91, PayloadKind::Voice);
        assert!(!link.write(&frame));
        peer.send(&wire::encode_frame(&frame, 3));
        link.clock(TICK);
        assert_eq!(link.read(), None);

        link.enable(true);
        assert!(link.write(&frame));
    }

    #[test]
    fn test_beacon_and_close() {
        let (mut link, mut peer) = link(None);
        run_handshake(&mut link, &mut peer);
        peer.drain();

        peer.send(&wire::beacon(0));
        link.clock(TICK);
        assert!(link.take_beacon_request());
        assert!(!link.take_beacon_request());

        link.close();
        assert_eq!(peer.recv(), Some(wire::repeater_close(234_500_101)));
        assert!(!peer.is_open());
        assert_eq!(link.state(), LinkState::WaitingConnect);
    }

    #[test]
    fn test_master_close_reconnects() {
        let (mut link, mut peer) = link(None);
        run_handshake(&mut link, &mut peer);
        peer.drain();

        peer.send(&wire::master_close(0));
        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingLogin);
        assert_eq!(peer.open_count(), 2);
    }

    #[test]
    fn test_held_address_retried_next_tick() {
        let (mut link, mut peer) = link(None);
        peer.hold_address_once();

        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingConnect);
        assert_eq!(peer.open_count(), 0);

        link.clock(TICK);
        assert_eq!(link.state(), LinkState::WaitingLogin);
        assert_eq!(peer.open_count(), 1);
        assert_eq!(peer.recv(), Some(wire::login(234_500_101)));
    }
}
