//! Routing and slot arbitration
//!
//! [`Gateway`] owns every link and rule and moves frames between them on a
//! fixed tick. Each tick it:
//!
//! 1. routes one repeater frame: reflector traffic and commands first, then
//!    the networks' RF rules in declaration order, then their pass-all rules
//! 2. forwards one reflector frame to the repeater
//! 3. forwards one frame from each network through its network rules
//! 4. relays beacon requests to the repeater
//! 5. services side-channel relays, voice prompts and the control sockets
//! 6. clocks every link and timer and frees slots that went quiet
//!
//! A slot carries traffic from one source at a time. Whoever first gets a
//! frame forwarded on a free slot owns it until the slot has been idle for
//! the RF or network timeout; frames from anyone else are dropped meanwhile.

use std::collections::VecDeque;
use std::time::Duration;

use dmr_protocol::{wire, Frame, Slot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::RewriteConfig;
use crate::control::{parse_dyn_tg, parse_remote, ControlSocket, RemoteCommand, Target};
use crate::events::{DropReason, FrameSource, GatewayEvent};
use crate::linking::{Classified, ReflectorLink};
use crate::network::{LinkState, NetworkLink};
use crate::ownership::{SlotOwner, SlotOwnership};
use crate::repeater::RepeaterLink;
use crate::rewrite::{apply, DynTgTable, RuleResult, RuleSet};

/// Nominal dispatcher period
pub const TICK: Duration = Duration::from_millis(10);

/// Events kept for [`Gateway::drain_events`] before the oldest are dropped
const MAX_EVENTS: usize = 4096;

/// A network link with its rules
#[derive(Debug)]
pub struct NetworkEntry {
    pub link: NetworkLink,
    pub rules: RuleSet,
    last_state: LinkState,
}

/// The gateway: links, rules and slot ownership
pub struct Gateway {
    repeater: RepeaterLink,
    networks: Vec<NetworkEntry>,
    dyn_tg: DynTgTable,
    slots: SlotOwnership,
    reflector: Option<ReflectorLink>,
    dynamic_control: Option<ControlSocket>,
    remote_control: Option<ControlSocket>,
    rf_timeout: Duration,
    net_timeout: Duration,
    trace: bool,
    events: VecDeque<GatewayEvent>,
}

impl Gateway {
    /// Gateway around an opened repeater link
    ///
    /// `rf_timeout` is how long a network keeps a slot after repeater
    /// traffic, `net_timeout` how long after traffic towards the repeater.
    pub fn new(repeater: RepeaterLink, rf_timeout: Duration, net_timeout: Duration) -> Self {
        Self {
            repeater,
            networks: Vec::new(),
            dyn_tg: DynTgTable::new(),
            slots: SlotOwnership::new(),
            reflector: None,
            dynamic_control: None,
            remote_control: None,
            rf_timeout,
            net_timeout,
            trace: false,
            events: VecDeque::new(),
        }
    }

    /// Log every rule decision
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Add a network; its rules are tried after those of earlier networks
    pub fn add_network(&mut self, link: NetworkLink, rewrite: &[RewriteConfig]) -> usize {
        let index = self.networks.len();
        let rules = RuleSet::from_config(index, link.name(), rewrite, &mut self.dyn_tg);
        info!(
            "Added network {}: {} RF rules, {} network rules",
            link.name(),
            rules.rf.len() + rules.rf_pass.len(),
            rules.net.len() + rules.net_pass.len()
        );
        let last_state = link.state();
        self.networks.push(NetworkEntry {
            link,
            rules,
            last_state,
        });
        index
    }

    pub fn set_reflector(&mut self, reflector: ReflectorLink) {
        self.reflector = Some(reflector);
    }

    pub fn set_dynamic_control(&mut self, socket: ControlSocket) {
        self.dynamic_control = Some(socket);
    }

    pub fn set_remote_control(&mut self, socket: ControlSocket) {
        self.remote_control = Some(socket);
    }

    pub fn repeater(&self) -> &RepeaterLink {
        &self.repeater
    }

    pub fn network(&self, index: usize) -> Option<&NetworkLink> {
        self.networks.get(index).map(|n| &n.link)
    }

    pub fn network_count(&self) -> usize {
        self.networks.len()
    }

    pub fn reflector(&self) -> Option<&ReflectorLink> {
        self.reflector.as_ref()
    }

    pub fn reflector_mut(&mut self) -> Option<&mut ReflectorLink> {
        self.reflector.as_mut()
    }

    /// Dynamic talkgroup bindings, e.g. to attach voice prompts
    pub fn dyn_tg(&self) -> &DynTgTable {
        &self.dyn_tg
    }

    pub fn dyn_tg_mut(&mut self) -> &mut DynTgTable {
        &mut self.dyn_tg
    }

    pub fn slot_owner(&self, slot: Slot) -> Option<SlotOwner> {
        self.slots.owner(slot)
    }

    /// Take the buffered events
    pub fn drain_events(&mut self) -> Vec<GatewayEvent> {
        self.events.drain(..).collect()
    }

    fn emit(&mut self, event: GatewayEvent) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Run one dispatcher pass; `dt` is the time since the previous one
    ///
    /// Returns whether any traffic moved, in which case the caller should
    /// tick again without waiting.
    pub fn tick(&mut self, dt: Duration) -> bool {
        let mut busy = false;

        if let Some((id, block)) = self.repeater.take_config_update() {
            for entry in &mut self.networks {
                entry.link.set_repeater(id, &block);
            }
            if let Some(reflector) = &mut self.reflector {
                reflector.set_repeater(id, &block);
            }
        }

        if let Some(frame) = self.repeater.read() {
            busy = true;
            self.route_from_repeater(frame);
        }

        if let Some(frame) = self.reflector.as_mut().and_then(ReflectorLink::read) {
            busy = true;
            if self.forward_to_repeater(&frame, SlotOwner::Reflector) {
                self.abort_voice(frame.slot);
            }
        }

        for index in 0..self.networks.len() {
            if let Some(frame) = self.networks[index].link.read() {
                busy = true;
                self.route_from_network(index, frame);
            }
        }

        for index in 0..self.networks.len() {
            if self.networks[index].link.take_beacon_request() {
                debug!("Beacon requested by {}", self.networks[index].link.name());
                self.repeater.write_beacon();
            }
        }

        self.relay_side_channels();
        self.play_voice();
        self.service_dynamic_control();
        self.service_remote_control();
        self.collect_selection_changes();

        self.clock(dt);
        busy
    }

    fn route_from_repeater(&mut self, frame: Frame) {
        let slot = frame.slot;

        let classified = self.reflector.as_ref().map(|r| r.classify(&frame));
        match classified {
            Some(Classified::Traffic) => {
                self.forward_to_reflector(&frame);
                return;
            }
            Some(Classified::Command(command)) => {
                if let Some(reflector) = &mut self.reflector {
                    reflector.command(command, &frame);
                }
                return;
            }
            Some(Classified::Other) | None => {}
        }

        for pass in [false, true] {
            for index in 0..self.networks.len() {
                let entry = &mut self.networks[index];
                if !entry.link.is_enabled() {
                    continue;
                }
                let rules = if pass {
                    &mut entry.rules.rf_pass
                } else {
                    &mut entry.rules.rf
                };
                let mut candidate = frame.clone();
                match apply(rules, &mut candidate, &mut self.dyn_tg, self.trace) {
                    RuleResult::Unmatched => continue,
                    RuleResult::Ignored => {
                        self.dropped(slot, FrameSource::Repeater, DropReason::Ignored);
                        return;
                    }
                    RuleResult::Matched => {
                        self.forward_to_network(index, slot, &candidate);
                        return;
                    }
                }
            }
        }

        if self.trace {
            debug!("No rule for repeater frame {}", frame.describe());
        }
        self.dropped(slot, FrameSource::Repeater, DropReason::Unrouted);
    }

    fn route_from_network(&mut self, index: usize, mut frame: Frame) {
        let entry = &mut self.networks[index];
        let mut result = apply(&mut entry.rules.net, &mut frame, &mut self.dyn_tg, self.trace);
        if result == RuleResult::Unmatched {
            result = apply(&mut entry.rules.net_pass, &mut frame, &mut self.dyn_tg, self.trace);
        }

        match result {
            RuleResult::Matched => {
                if self.forward_to_repeater(&frame, SlotOwner::Network(index)) {
                    self.abort_voice(frame.slot);
                }
            }
            RuleResult::Ignored => {
                self.dropped(frame.slot, FrameSource::Network(index), DropReason::Ignored);
            }
            RuleResult::Unmatched => {
                if self.trace {
                    debug!(
                        "No rule for frame {} from {}",
                        frame.describe(),
                        self.networks[index].link.name()
                    );
                }
                self.dropped(frame.slot, FrameSource::Network(index), DropReason::Unrouted);
            }
        }
    }

    /// Send a repeater frame to network `index` if it may use `slot`
    fn forward_to_network(&mut self, index: usize, slot: Slot, frame: &Frame) {
        let owner = SlotOwner::Network(index);
        if let Some(current) = self.busy_owner(slot, owner) {
            if self.trace {
                debug!("{} is held by {}, dropping frame for {}", slot, current, owner);
            }
            self.dropped(slot, FrameSource::Repeater, DropReason::SlotBusy { owner: current });
            return;
        }
        if self.networks[index].link.write(frame) {
            self.claim(slot, owner, self.rf_timeout);
        } else {
            self.dropped(slot, FrameSource::Repeater, DropReason::LinkDown);
        }
    }

    fn forward_to_reflector(&mut self, frame: &Frame) {
        let slot = frame.slot;
        let owner = SlotOwner::Reflector;
        if let Some(current) = self.busy_owner(slot, owner) {
            self.dropped(slot, FrameSource::Repeater, DropReason::SlotBusy { owner: current });
            return;
        }
        let sent = self.reflector.as_mut().is_some_and(|r| r.write(frame));
        if sent {
            self.claim(slot, owner, self.rf_timeout);
        } else {
            self.dropped(slot, FrameSource::Repeater, DropReason::LinkDown);
        }
    }

    /// Send a frame to the repeater on behalf of `owner`
    fn forward_to_repeater(&mut self, frame: &Frame, owner: SlotOwner) -> bool {
        let slot = frame.slot;
        let source = match owner {
            SlotOwner::Network(index) => FrameSource::Network(index),
            SlotOwner::Reflector => FrameSource::Reflector,
        };
        if let Some(current) = self.busy_owner(slot, owner) {
            if self.trace {
                debug!("{} is held by {}, dropping frame from {}", slot, current, owner);
            }
            self.dropped(slot, source, DropReason::SlotBusy { owner: current });
            return false;
        }
        if self.repeater.write(frame) {
            self.claim(slot, owner, self.net_timeout);
            true
        } else {
            self.dropped(slot, source, DropReason::LinkDown);
            false
        }
    }

    /// Owner of `slot` when it is not `owner`
    fn busy_owner(&self, slot: Slot, owner: SlotOwner) -> Option<SlotOwner> {
        if self.slots.can_forward(slot, owner) {
            None
        } else {
            self.slots.owner(slot)
        }
    }

    fn claim(&mut self, slot: Slot, owner: SlotOwner, hold: Duration) {
        if let Ok(true) = self.slots.claim(slot, owner, hold) {
            debug!("{} now carries {}", slot, owner);
            self.emit(GatewayEvent::SlotClaimed { slot, owner });
        }
    }

    fn dropped(&mut self, slot: Slot, source: FrameSource, reason: DropReason) {
        trace!("Dropped frame on {} from {:?}: {:?}", slot, source, reason);
        self.emit(GatewayEvent::FrameDropped { slot, source, reason });
    }

    /// Relay position reports and talker aliases to every network
    fn relay_side_channels(&mut self) {
        let position = self.repeater.read_position();
        let alias = self.repeater.read_talker_alias();
        for data in [position, alias].into_iter().flatten() {
            for entry in &mut self.networks {
                if entry.link.is_running() && entry.link.is_enabled() {
                    let mut data = data.clone();
                    wire::set_side_channel_sender(&mut data, entry.link.id());
                    entry.link.write_raw(&data);
                }
            }
        }
    }

    /// Cancel every prompt queued for `slot`, whichever source it belongs to
    fn abort_voice(&mut self, slot: Slot) {
        for binding in self.dyn_tg.iter_mut() {
            if binding.slot == slot {
                if let Some(voice) = &mut binding.voice {
                    voice.abort();
                }
            }
        }
        if let Some(reflector) = self.reflector.as_mut().filter(|r| r.settings().slot == slot) {
            reflector.abort_voice();
        }
    }

    /// One prompt frame per source, only onto idle slots
    ///
    /// A prompt whose slot is owned is not read, so it resumes once the
    /// slot is released.
    fn play_voice(&mut self) {
        let mut frames = Vec::new();
        if let Some(reflector) = self.reflector.as_mut() {
            if self.slots.owner(reflector.settings().slot).is_none() {
                frames.extend(reflector.read_voice());
            }
        }
        for binding in self.dyn_tg.iter_mut() {
            if self.slots.owner(binding.slot).is_some() {
                continue;
            }
            if let Some(frame) = binding.voice.as_mut().and_then(|v| v.read()) {
                frames.push(frame);
            }
        }
        for frame in frames {
            if self.slots.owner(frame.slot).is_none() {
                self.repeater.write(&frame);
            }
        }
    }

    fn service_dynamic_control(&mut self) {
        let Some(text) = self.dynamic_control.as_mut().and_then(ControlSocket::read) else {
            return;
        };
        match parse_dyn_tg(&text) {
            Some((slot, tg)) => {
                if self.dyn_tg.select(slot, tg) {
                    info!("Dynamic talkgroup on {} set to {} by control socket", slot, tg);
                } else {
                    warn!("No dynamic talkgroup rule on {}", slot);
                }
            }
            None => warn!("Invalid dynamic talkgroup command {:?}", text),
        }
    }

    fn service_remote_control(&mut self) {
        let Some(text) = self.remote_control.as_mut().and_then(ControlSocket::read) else {
            return;
        };
        let reply = self.remote_command(&text);
        if let Some(socket) = &mut self.remote_control {
            socket.reply(&reply);
        }
    }

    /// Execute a remote-control command and return the reply text
    pub fn remote_command(&mut self, text: &str) -> String {
        let ok = match parse_remote(text) {
            Some(RemoteCommand::Status) => return self.status(),
            Some(RemoteCommand::Hosts) => return self.hosts(),
            Some(RemoteCommand::Enable(target)) => self.set_enabled(target, true),
            Some(RemoteCommand::Disable(target)) => self.set_enabled(target, false),
            None => {
                warn!("Unknown remote command {:?}", text);
                false
            }
        };
        let reply = if ok { "OK" } else { "KO" };
        reply.to_string()
    }

    fn set_enabled(&mut self, target: Target, enabled: bool) -> bool {
        match target {
            Target::Network(index) => {
                let Some(entry) = self.networks.get_mut(index) else {
                    return false;
                };
                entry.link.enable(enabled);
                if !enabled {
                    let owner = SlotOwner::Network(index);
                    for slot in Slot::ALL {
                        if self.slots.owner(slot) == Some(owner) {
                            self.slots.release(slot);
                            self.emit(GatewayEvent::SlotReleased { slot, owner });
                        }
                    }
                }
                true
            }
            Target::Reflector => match &mut self.reflector {
                Some(reflector) => {
                    reflector.enable(enabled);
                    true
                }
                None => false,
            },
        }
    }

    /// `name:conn|notconn|disabled` per network, then the reflector
    pub fn status(&self) -> String {
        let mut parts: Vec<String> = self
            .networks
            .iter()
            .map(|entry| {
                let state = if !entry.link.is_enabled() {
                    "disabled"
                } else if entry.link.is_running() {
                    "conn"
                } else {
                    "notconn"
                };
                format!("{}:{}", entry.link.name(), state)
            })
            .collect();
        if let Some(reflector) = &self.reflector {
            parts.push(reflector.status());
        }
        parts.join(" ")
    }

    /// `name:address:port` per network, then the reflector when selected
    pub fn hosts(&self) -> String {
        let mut parts: Vec<String> = self
            .networks
            .iter()
            .map(|entry| {
                let settings = entry.link.settings();
                format!("{}:{}:{}", settings.name, settings.address, settings.port)
            })
            .collect();
        if let Some(host) = self.reflector.as_ref().and_then(ReflectorLink::host) {
            parts.push(host);
        }
        parts.join(" ")
    }

    fn collect_selection_changes(&mut self) {
        for change in self.dyn_tg.take_changes() {
            let Some(binding) = self.dyn_tg.get(change.binding) else {
                continue;
            };
            let slot = binding.slot;
            let network = self
                .networks
                .get(binding.network)
                .map(|n| n.link.name().to_string())
                .unwrap_or_default();
            self.emit(GatewayEvent::DynamicTgChanged {
                network,
                slot,
                tg: change.tg,
            });
        }
    }

    fn clock(&mut self, dt: Duration) {
        self.repeater.clock(dt);

        let mut changes = Vec::new();
        for entry in &mut self.networks {
            entry.link.clock(dt);
            let state = entry.link.state();
            if state != entry.last_state {
                entry.last_state = state;
                changes.push(GatewayEvent::LinkStateChanged {
                    network: entry.link.name().to_string(),
                    state,
                });
            }
        }
        for event in changes {
            self.emit(event);
        }

        let reflector_events = match &mut self.reflector {
            Some(reflector) => {
                reflector.clock(dt);
                reflector.take_events()
            }
            None => Vec::new(),
        };
        for event in reflector_events {
            self.emit(event);
        }

        for (slot, owner) in self.slots.clock(dt) {
            debug!("{} released by {}", slot, owner);
            self.emit(GatewayEvent::SlotReleased { slot, owner });
        }
    }

    /// Tick until `cancel` fires, then shut down
    pub async fn run(&mut self, cancel: CancellationToken) {
        let mut ticker = interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last = Instant::now();
        info!("Gateway running with {} networks", self.networks.len());

        loop {
            let now = Instant::now();
            let busy = self.tick(now - last);
            last = now;
            for event in self.drain_events() {
                trace!("{:?}", event);
            }

            if cancel.is_cancelled() {
                break;
            }
            if busy {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
        }

        self.shutdown();
    }

    /// Close every link, saying goodbye where a session is up
    pub fn shutdown(&mut self) {
        info!("Gateway shutting down");
        for entry in &mut self.networks {
            entry.link.close();
        }
        if let Some(reflector) = &mut self.reflector {
            reflector.close();
        }
        if let Some(socket) = &mut self.dynamic_control {
            socket.close();
        }
        if let Some(socket) = &mut self.remote_control {
            socket.close();
        }
        self.repeater.close();
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("repeater", &self.repeater.state())
            .field("networks", &self.networks)
            .field("slots", &self.slots)
            .field("reflector", &self.reflector.as_ref().map(ReflectorLink::status))
            .finish_non_exhaustive()
    }
}
