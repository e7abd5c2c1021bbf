//! Reflector linking
//!
//! One talkgroup on one repeater slot is carried to a reflector, a shared
//! multi-gateway relay selected by number from the [`ReflectorDirectory`].
//! Radios steer it with private calls on that slot:
//!
//! - `base` unlinks
//! - `base + N` links to reflector N
//! - `4001..=4026` picks a room on the current reflector
//!
//! Commands take effect when the call ends. Linking to a room is itself a
//! short private call (header plus terminator) sent to the reflector; `4000`
//! unlinks. After a period without traffic the link returns to the startup
//! reflector and room, or unlinks when there is none.

use std::time::Duration;

use dmr_protocol::wire::ConfigBlock;
use dmr_protocol::{lc, CallType, Frame, LinkControl, PayloadKind, Slot};
use tracing::{debug, info, warn};

use crate::config::{GeneralConfig, ReflectorConfig, MAX_REFLECTOR, ROOM_FIRST, ROOM_LAST};
use crate::events::GatewayEvent;
use crate::network::{LinkState, NetworkLink, NetworkSettings};
use crate::reflector::{Reflector, ReflectorDirectory};
use crate::rewrite::{apply, DynTgTable, RuleResult, RuleSet};
use crate::timer::Timer;
use crate::transport::Connector;
use crate::voice::{Announcement, VoicePrompt};

/// Slot and talkgroup reflectors carry traffic on
const REFLECTOR_SLOT: Slot = Slot::Two;
const REFLECTOR_TG: u32 = 9;

/// Room id that unlinks from a reflector
const UNLINK_ID: u32 = 4000;

/// A link request made from a radio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCommand {
    Unlink,
    /// Link to reflector N
    Reflector(u32),
    /// Change room on the current reflector
    Room(u32),
}

/// What a repeater frame means to the reflector integration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    /// Voice or data for the reflector
    Traffic,
    /// A linking command, never forwarded
    Command(LinkCommand),
    /// Not for the reflector
    Other,
}

/// Reflector integration settings
#[derive(Debug, Clone)]
pub struct ReflectorSettings {
    /// Repeater slot carrying reflector traffic
    pub slot: Slot,
    /// Repeater talkgroup carrying reflector traffic
    pub tg: u32,
    pub base: u32,
    pub startup: Option<u32>,
    /// Room of the startup reflector
    pub room: u32,
    /// Inactivity before returning to the startup reflector; zero never
    pub relink: Duration,
    pub user_control: bool,
    pub port: u16,
    pub id: Option<u32>,
    pub password: String,
    pub options: Option<String>,
    pub debug: bool,
    pub ping_interval: Duration,
    pub timeout: Duration,
}

impl ReflectorSettings {
    pub fn from_config(config: &ReflectorConfig, general: &GeneralConfig) -> Self {
        Self {
            slot: config.slot,
            tg: config.tg,
            base: config.base,
            startup: config.startup,
            room: config.room,
            relink: config.relink(),
            user_control: config.user_control,
            port: config.port,
            id: config.id,
            password: config.password.clone(),
            options: config.options.clone(),
            debug: config.debug,
            ping_interval: general.ping_interval(),
            timeout: general.link_timeout(),
        }
    }
}

/// Session to the currently selected reflector plus the linking logic
pub struct ReflectorLink {
    settings: ReflectorSettings,
    directory: ReflectorDirectory,
    connector: Box<dyn Connector>,
    session: Option<NetworkLink>,
    rules: RuleSet,
    table: DynTgTable,
    repeater: Option<(u32, ConfigBlock)>,
    reflector: u32,
    room: u32,
    linked: bool,
    enabled: bool,
    relink: Timer,
    voice: Option<Box<dyn VoicePrompt>>,
    events: Vec<GatewayEvent>,
    trace: bool,
}

impl ReflectorLink {
    pub fn new(
        settings: ReflectorSettings,
        directory: ReflectorDirectory,
        connector: Box<dyn Connector>,
        trace: bool,
    ) -> Self {
        let rules = RuleSet::talkgroup_pair("XLX", settings.slot, settings.tg, REFLECTOR_SLOT, REFLECTOR_TG);
        let relink = Timer::new(settings.relink);
        Self {
            room: settings.room,
            settings,
            directory,
            connector,
            session: None,
            rules,
            table: DynTgTable::new(),
            repeater: None,
            reflector: 0,
            linked: false,
            enabled: true,
            relink,
            voice: None,
            events: Vec::new(),
            trace,
        }
    }

    pub fn settings(&self) -> &ReflectorSettings {
        &self.settings
    }

    /// Link to the startup reflector, if one is configured
    pub fn start(&mut self) {
        if let Some(number) = self.settings.startup {
            self.link_reflector(number, Some(self.settings.room), self.repeater_id());
        }
    }

    /// Selected reflector number, 0 when none
    pub fn reflector(&self) -> u32 {
        self.reflector
    }

    pub fn room(&self) -> u32 {
        self.room
    }

    /// Whether the room link sequence went out on a running session
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn session_state(&self) -> Option<LinkState> {
        self.session.as_ref().map(NetworkLink::state)
    }

    /// Supply the repeater's id and configuration for reflector logins
    pub fn set_repeater(&mut self, id: u32, block: &ConfigBlock) {
        if let Some(session) = &mut self.session {
            session.set_repeater(id, block);
        }
        self.repeater = Some((id, block.clone()));
    }

    pub fn set_voice(&mut self, voice: Box<dyn VoicePrompt>) {
        self.voice = Some(voice);
    }

    /// Next voice prompt frame for the repeater
    pub fn read_voice(&mut self) -> Option<Frame> {
        self.voice.as_mut()?.read()
    }

    pub fn abort_voice(&mut self) {
        if let Some(voice) = &mut self.voice {
            voice.abort();
        }
    }

    /// Sort a repeater frame into traffic, command or neither
    pub fn classify(&self, frame: &Frame) -> Classified {
        if !self.enabled || frame.slot != self.settings.slot {
            return Classified::Other;
        }
        let dst = frame.dst_id;
        match frame.call_type {
            CallType::Group if dst == self.settings.tg => Classified::Traffic,
            CallType::Private if self.settings.user_control => {
                let base = self.settings.base;
                if dst == base {
                    Classified::Command(LinkCommand::Unlink)
                } else if dst > base && dst <= base + MAX_REFLECTOR {
                    Classified::Command(LinkCommand::Reflector(dst - base))
                } else if (ROOM_FIRST..=ROOM_LAST).contains(&dst) {
                    Classified::Command(LinkCommand::Room(dst))
                } else {
                    Classified::Other
                }
            }
            _ => Classified::Other,
        }
    }

    /// Act on a command frame; only the terminator executes it
    pub fn command(&mut self, command: LinkCommand, frame: &Frame) {
        if !frame.is_terminator() {
            return;
        }
        debug!("Reflector command {:?} from {}", command, frame.src_id);
        self.execute(command, frame.src_id);
    }

    fn execute(&mut self, command: LinkCommand, src: u32) {
        match command {
            LinkCommand::Unlink => {
                if self.reflector != 0 {
                    self.unlink(src);
                }
            }
            LinkCommand::Reflector(number) => {
                if number == self.reflector {
                    debug!("Already linked to XLX{:03}", number);
                } else {
                    self.link_reflector(number, None, src);
                }
            }
            LinkCommand::Room(room) => {
                if self.reflector == 0 {
                    warn!("Room {} requested with no reflector selected", room);
                    return;
                }
                if room != self.room {
                    self.room = room;
                    if self.linked {
                        self.send_sequence(src, room);
                        self.announce_link();
                    }
                }
            }
        }
        self.arm_relink();
    }

    fn link_reflector(&mut self, number: u32, room: Option<u32>, src: u32) {
        let Some(entry) = self.directory.find(number) else {
            warn!("XLX{:03} is not in the reflector directory", number);
            return;
        };
        if self.reflector != 0 {
            self.unlink(src);
        }
        self.connect(&entry, room.unwrap_or(entry.room));
    }

    fn connect(&mut self, entry: &Reflector, room: u32) {
        info!("Linking to reflector XLX{:03} at {} room {}", entry.number, entry.address, room);
        let mut settings = NetworkSettings::new(
            &format!("XLX{:03}", entry.number),
            &entry.address,
            self.settings.port,
            &self.settings.password,
        );
        settings.id = self.settings.id;
        settings.options = self.settings.options.clone();
        settings.debug = self.settings.debug;
        settings.ping_interval = self.settings.ping_interval;
        settings.timeout = self.settings.timeout;

        let transport = self.connector.connect(&entry.address, self.settings.port);
        let mut session = NetworkLink::new(settings, transport);
        if !self.enabled {
            session.enable(false);
        }
        if let Some((id, block)) = &self.repeater {
            session.set_repeater(*id, block);
        }
        self.session = Some(session);
        self.reflector = entry.number;
        self.room = room;
        self.linked = false;
    }

    fn unlink(&mut self, src: u32) {
        info!("Unlinking from reflector XLX{:03}", self.reflector);
        self.disconnect(src);
        self.reflector = 0;
        if let Some(voice) = &mut self.voice {
            voice.announce(Announcement::Unlinked);
        }
    }

    /// Say goodbye to the room and close the session
    fn disconnect(&mut self, src: u32) {
        if self.linked {
            self.send_sequence(src, UNLINK_ID);
            self.events.push(GatewayEvent::ReflectorUnlinked {
                reflector: self.reflector,
            });
        }
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.linked = false;
    }

    fn arm_relink(&mut self) {
        let at_home = match self.settings.startup {
            Some(number) => self.reflector == number && self.room == self.settings.room,
            None => self.reflector == 0,
        };
        if at_home || self.settings.relink.is_zero() {
            self.relink.stop();
        } else {
            self.relink.start();
        }
    }

    fn relink_home(&mut self) {
        let src = self.repeater_id();
        match self.settings.startup {
            Some(number) if number == self.reflector => {
                info!("Reflector inactivity, returning to room {}", self.settings.room);
                self.execute(LinkCommand::Room(self.settings.room), src);
            }
            Some(number) => {
                info!("Reflector inactivity, relinking to XLX{:03}", number);
                self.link_reflector(number, Some(self.settings.room), src);
                self.arm_relink();
            }
            None => {
                info!("Reflector inactivity, unlinking");
                self.execute(LinkCommand::Unlink, src);
            }
        }
    }

    fn announce_link(&mut self) {
        info!("Linked to XLX{:03} room {}", self.reflector, self.room);
        self.events.push(GatewayEvent::ReflectorLinked {
            reflector: self.reflector,
            room: self.room,
        });
        if let Some(voice) = &mut self.voice {
            voice.announce(Announcement::Reflector {
                reflector: self.reflector,
                room: self.room,
            });
        }
    }

    fn repeater_id(&self) -> u32 {
        match (&self.repeater, &self.session) {
            (Some((id, _)), _) => *id,
            (None, Some(session)) => session.id(),
            (None, None) => 0,
        }
    }

    /// Header plus terminator of a private call from `src` to `dst`
    fn send_sequence(&mut self, src: u32, dst: u32) -> bool {
        let Some(session) = &mut self.session else {
            return false;
        };
        let stream_id = rand::random();
        let lc = LinkControl::new(CallType::Private, src, dst);
        let mut sent = true;
        for (seq_no, kind) in [PayloadKind::VoiceHeader, PayloadKind::Terminator]
            .into_iter()
            .enumerate()
        {
            let mut frame = Frame::new(REFLECTOR_SLOT, CallType::Private, src, dst, kind);
            frame.seq_no = seq_no as u8;
            frame.stream_id = stream_id;
            lc::encode_full(&lc, kind, &mut frame.payload);
            sent &= session.write(&frame);
        }
        sent
    }

    /// Forward a repeater frame to the reflector
    pub fn write(&mut self, frame: &Frame) -> bool {
        let Some(session) = &mut self.session else {
            return false;
        };
        let mut frame = frame.clone();
        if apply(&mut self.rules.rf, &mut frame, &mut self.table, self.trace) != RuleResult::Matched {
            return false;
        }
        let sent = session.write(&frame);
        if sent && self.relink.is_running() {
            self.relink.start();
        }
        sent
    }

    /// Next reflector frame, already mapped to the repeater's slot and talkgroup
    pub fn read(&mut self) -> Option<Frame> {
        loop {
            let mut frame = self.session.as_mut()?.read()?;
            if apply(&mut self.rules.net, &mut frame, &mut self.table, self.trace) == RuleResult::Matched {
                if self.relink.is_running() {
                    self.relink.start();
                }
                return Some(frame);
            }
            if self.trace {
                debug!("Dropping reflector frame {}", frame.describe());
            }
        }
    }

    /// Enable or disable the integration; disabling closes the session but
    /// remembers the selection
    pub fn enable(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            info!("Reflector linking enabled");
            let (number, room) = (self.reflector, self.room);
            if number != 0 {
                self.reflector = 0;
                self.link_reflector(number, Some(room), self.repeater_id());
            } else {
                self.start();
            }
        } else {
            info!("Reflector linking disabled");
            self.disconnect(self.repeater_id());
            self.relink.stop();
        }
    }

    /// `XLX<n>:address:port` of the selected reflector
    pub fn host(&self) -> Option<String> {
        let settings = self.session.as_ref()?.settings();
        Some(format!("{}:{}:{}", settings.name, settings.address, settings.port))
    }

    /// `XLX<n>:conn`, `XLX<n>:notconn` or `XLX:notlinked`
    pub fn status(&self) -> String {
        if self.reflector == 0 {
            return "XLX:notlinked".to_string();
        }
        let connected = self.session.as_ref().is_some_and(NetworkLink::is_running);
        format!(
            "XLX{:03}:{}",
            self.reflector,
            if connected { "conn" } else { "notconn" }
        )
    }

    pub fn clock(&mut self, dt: Duration) {
        if let Some(session) = &mut self.session {
            session.clock(dt);
            let running = session.is_running();
            if running && !self.linked {
                self.linked = true;
                self.send_sequence(self.repeater_id(), self.room);
                self.announce_link();
                self.arm_relink();
            } else if !running && self.linked {
                warn!("Lost connection to XLX{:03}", self.reflector);
                self.linked = false;
                self.relink.stop();
                self.events.push(GatewayEvent::ReflectorUnlinked {
                    reflector: self.reflector,
                });
            }
        }

        self.relink.clock(dt);
        if self.relink.has_expired() {
            self.relink.stop();
            self.relink_home();
        }
    }

    pub fn take_events(&mut self) -> Vec<GatewayEvent> {
        std::mem::take(&mut self.events)
    }

    /// Unlink politely and close the session
    pub fn close(&mut self) {
        self.disconnect(self.repeater_id());
        self.relink.stop();
    }
}
