use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{SessionConfig, SessionIdentity, Settings, TransportKind};
use crate::error::{Error, Result};
use crate::net::{
    Action, Clock, ConnectionState, HANDSHAKE_REPLY, HandshakeMode, LinkEvent, LinkObservation,
    LinkStats, ScopedAction, SensorReading, SessionMachine, StreamFramer, SystemClock, Transport,
};
use crate::sensor::{ChangeThrottle, SensorKind, SensorSample, SensorSet};

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    Haptic {
        duration_ms: u64,
        strength: u8,
    },
    PlayerChanged(String),
    BodypartChanged(String),
    SensorToggled {
        kind: SensorKind,
        enabled: bool,
    },
    WifiChanged {
        ssid: String,
        password: String,
        multicast_group: String,
    },
}

/// One streaming session over one transport.
pub struct Session {
    identity: SessionIdentity,
    configured: TransportKind,
    config: SessionConfig,
    transport: Box<dyn Transport>,
    clock: Arc<dyn Clock>,
    machine: SessionMachine,
    framer: StreamFramer,
    throttle: ChangeThrottle,
    latest: HashMap<SensorKind, SensorSample>,
    enabled: SensorSet,
    reset_pending: bool,
    started: bool,
    stats: LinkStats,
    pending_events: VecDeque<SessionEvent>,
}

impl Session {
    pub fn new(settings: &Settings, transport: Box<dyn Transport>) -> Self {
        Self::with_clock(settings, transport, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: &Settings, transport: Box<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let config = SessionConfig::from_settings(settings);
        Self::with_config(settings, config, transport, clock)
    }

    pub fn with_config(
        settings: &Settings,
        config: SessionConfig,
        transport: Box<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let machine = SessionMachine::new(transport.handshake_mode(), &config, clock.now());
        Self {
            identity: settings.identity(),
            configured: settings.transport,
            config,
            transport,
            clock,
            machine,
            framer: StreamFramer::watching(HANDSHAKE_REPLY),
            throttle: ChangeThrottle::new(),
            latest: HashMap::new(),
            enabled: settings.enabled_sensors(),
            reset_pending: false,
            started: false,
            stats: LinkStats::default(),
            pending_events: VecDeque::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        let actual = self.transport.kind();
        if actual != self.configured {
            log::error!("refusing to start: configured for {}, given {}", self.configured, actual);
            return Err(Error::ConfigurationMismatch {
                expected: self.configured,
                actual,
            });
        }

        self.transport.open(&self.identity)?;
        self.started = true;
        log::info!(
            "session started for {}/{} over {}",
            self.identity.player,
            self.identity.bodypart,
            actual
        );
        Ok(())
    }

    /// Closes the transport, then reports Disconnected if it was not already.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.transport.close();
        self.started = false;

        let now = self.clock.now();
        if let Some(state) = self.machine.force_disconnect(now) {
            self.pending_events.push_back(SessionEvent::StateChanged(state));
        }
        self.framer.clear();
        log::info!("session stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn enabled_sensors(&self) -> SensorSet {
        self.enabled
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Latest sample wins. Orientation is realigned to the wire axis order here.
    pub fn push_sample(&mut self, mut sample: SensorSample) {
        if sample.values.len() != sample.kind.component_count() {
            log::warn!(
                "dropping {} sample with {} components",
                sample.kind.tag(),
                sample.values.len()
            );
            return;
        }

        if sample.kind == SensorKind::OrientationAbs {
            let quat = [sample.values[0], sample.values[1], sample.values[2], sample.values[3]];
            sample.values = self.config.axis_table.table().realign(quat).to_vec();
        }
        self.latest.insert(sample.kind, sample);
    }

    pub fn request_reset(&mut self) {
        if self.machine.mode() == HandshakeMode::LinkLayer {
            log::debug!("reset has no representation on the {} transport", self.transport.kind());
            return;
        }
        self.reset_pending = true;
    }

    /// Runs one period. Returns whether data was eligible to go out.
    pub fn tick(&mut self) -> bool {
        if !self.started {
            return false;
        }

        let now = self.clock.now();
        let mut obs = self.collect_link_activity();
        obs.peer_known = self.transport.has_peer();

        let outcome = self.machine.tick(now, &obs);
        if outcome.timed_out {
            log::info!("{} after {:?}, dropping session", Error::Timeout, self.config.receive_timeout);
        }
        if let Some(state) = outcome.transition {
            self.pending_events.push_back(SessionEvent::StateChanged(state));
            if state == ConnectionState::Disconnected {
                self.transport.drop_peer();
                self.framer.clear();
                self.throttle.clear();
            }
        }

        if outcome.send_probe {
            match self.transport.send_handshake() {
                Ok(bytes) => {
                    log::debug!("sent handshake probe");
                    self.machine.mark_probe_sent(now);
                    self.stats.handshakes_sent += 1;
                    self.stats.bytes_sent += bytes as u64;
                }
                Err(e) => {
                    self.fail(now, e);
                    return false;
                }
            }
        }

        if !outcome.eligible {
            return false;
        }

        let (readings, sent) = self.collect_readings();
        if readings.is_empty() {
            return true;
        }

        match self.transport.send_readings(&readings) {
            Ok(bytes) => {
                self.machine.mark_data_sent(now);
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += bytes as u64;
                for (kind, values) in sent {
                    self.throttle.record(kind, &values);
                }
                if self.reset_pending {
                    self.reset_pending = false;
                    self.throttle.forget(SensorKind::OrientationAbs);
                    self.throttle.forget(SensorKind::AccelerationRel);
                }
                true
            }
            Err(e) => {
                self.fail(now, e);
                false
            }
        }
    }

    fn collect_link_activity(&mut self) -> LinkObservation {
        let mut obs = LinkObservation::default();

        for event in self.transport.receive() {
            match event {
                LinkEvent::Beacon { source } => {
                    log::debug!("beacon from {}", source);
                    obs.beacon = true;
                }
                LinkEvent::Data(data) => {
                    self.stats.chunks_received += 1;
                    self.stats.bytes_received += data.len() as u64;
                    self.framer.feed(&data);
                }
                LinkEvent::PeerAttached => log::debug!("peer attached"),
                LinkEvent::PeerDetached => log::debug!("peer detached"),
                LinkEvent::Failed(message) => {
                    log::warn!("{} transport error: {}", self.transport.kind(), message);
                    obs.link_error = true;
                }
            }
        }

        while let Some(text) = self.framer.extract_next() {
            match ScopedAction::parse(&text) {
                Ok(action) => {
                    obs.frame = true;
                    if action.applies_to(&self.identity) {
                        self.apply(action.action);
                    } else {
                        log::debug!(
                            "{} addressed to {}/{}, ignoring",
                            action.action.type_tag(),
                            action.player,
                            action.bodypart
                        );
                    }
                }
                Err(e) => {
                    self.stats.messages_dropped += 1;
                    log::warn!("dropping inbound message: {}", e);
                }
            }
        }
        obs.handshake_reply = self.framer.take_tokens() > 0;

        obs
    }

    fn collect_readings(&mut self) -> (Vec<SensorReading>, Vec<(SensorKind, Vec<f32>)>) {
        let mut readings = Vec::new();
        let mut sent = Vec::new();

        if self.reset_pending {
            for kind in [SensorKind::OrientationAbs, SensorKind::AccelerationRel] {
                readings.push(SensorReading::reset(&self.identity, kind));
            }
        }

        for kind in SensorKind::ALL {
            if !self.enabled.enables(kind) {
                continue;
            }
            let Some(sample) = self.latest.get(&kind) else {
                continue;
            };
            if self.reset_pending && !kind.is_discrete() {
                continue;
            }
            if self.throttle.would_send(kind, &sample.values, self.config.threshold(kind)) {
                readings.push(SensorReading::from_sample(&self.identity, sample));
                sent.push((kind, sample.values.clone()));
            }
        }

        (readings, sent)
    }

    fn apply(&mut self, action: Action) {
        log::info!("applying {}", action.type_tag());
        let event = match action {
            Action::Haptic {
                duration_ms,
                strength,
            } => SessionEvent::Haptic {
                duration_ms,
                strength,
            },
            Action::SetPlayer { player } => {
                self.identity.player = player.clone();
                SessionEvent::PlayerChanged(player)
            }
            Action::SetBodypart { bodypart } => {
                self.identity.bodypart = bodypart.clone();
                SessionEvent::BodypartChanged(bodypart)
            }
            Action::EnableSensor { kind, enabled } => {
                self.enabled.set(kind.flag(), enabled);
                if !enabled {
                    self.throttle.forget(kind);
                }
                SessionEvent::SensorToggled { kind, enabled }
            }
            Action::SetWifi {
                ssid,
                password,
                multicast_group,
            } => {
                self.transport.set_group_tag(&multicast_group);
                SessionEvent::WifiChanged {
                    ssid,
                    password,
                    multicast_group,
                }
            }
        };
        self.pending_events.push_back(event);
    }

    fn fail(&mut self, now: Instant, error: Error) {
        log::warn!("{} transport failed: {}", self.transport.kind(), error);
        if let Some(state) = self.machine.force_disconnect(now) {
            self.pending_events.push_back(SessionEvent::StateChanged(state));
        }
        self.transport.drop_peer();
        self.framer.clear();
        self.throttle.clear();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}
