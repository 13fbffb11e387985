use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    WaitingAck,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::WaitingAck => "waiting for ack",
            ConnectionState::Connected => "connected",
        }
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// How a transport confirms the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeMode {
    /// ACKN/ACKH exchange plus keep-alive and receive timeout.
    Token,
    /// The link layer attaching a peer is the session.
    LinkLayer,
}

/// Link activity gathered since the previous tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkObservation {
    /// Level: the transport currently has somewhere to send.
    pub peer_known: bool,
    pub handshake_reply: bool,
    pub beacon: bool,
    pub frame: bool,
    pub link_error: bool,
}

impl LinkObservation {
    fn shows_liveness(&self) -> bool {
        self.handshake_reply || self.beacon || self.frame
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub eligible: bool,
    pub send_probe: bool,
    pub transition: Option<ConnectionState>,
    /// The transition was caused by the receive window running out.
    pub timed_out: bool,
}

#[derive(Debug)]
pub struct SessionMachine {
    state: ConnectionState,
    mode: HandshakeMode,
    handshake_interval: Duration,
    keepalive_interval: Duration,
    receive_timeout: Duration,
    last_probe: Option<Instant>,
    last_sent: Instant,
    last_received: Instant,
}

impl SessionMachine {
    pub fn new(mode: HandshakeMode, config: &SessionConfig, now: Instant) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            mode,
            handshake_interval: config.handshake_interval,
            keepalive_interval: config.keepalive_interval,
            receive_timeout: config.receive_timeout,
            last_probe: None,
            last_sent: now,
            last_received: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mode(&self) -> HandshakeMode {
        self.mode
    }

    pub fn last_received(&self) -> Instant {
        self.last_received
    }

    /// Advances at most one state per call.
    pub fn tick(&mut self, now: Instant, obs: &LinkObservation) -> TickOutcome {
        if obs.shows_liveness() {
            self.last_received = now;
        }

        if obs.link_error {
            return TickOutcome {
                transition: self.enter(ConnectionState::Disconnected, now),
                ..Default::default()
            };
        }

        match self.state {
            ConnectionState::Disconnected => TickOutcome {
                transition: self.enter(ConnectionState::WaitingAck, now),
                ..Default::default()
            },
            ConnectionState::WaitingAck => self.tick_waiting(now, obs),
            ConnectionState::Connected => self.tick_connected(now, obs),
        }
    }

    fn tick_waiting(&mut self, now: Instant, obs: &LinkObservation) -> TickOutcome {
        match self.mode {
            HandshakeMode::Token if obs.handshake_reply => TickOutcome {
                transition: self.enter(ConnectionState::Connected, now),
                ..Default::default()
            },
            HandshakeMode::Token => TickOutcome {
                send_probe: obs.peer_known && self.probe_due(now),
                ..Default::default()
            },
            HandshakeMode::LinkLayer if obs.peer_known => TickOutcome {
                transition: self.enter(ConnectionState::Connected, now),
                ..Default::default()
            },
            HandshakeMode::LinkLayer => TickOutcome::default(),
        }
    }

    fn tick_connected(&mut self, now: Instant, obs: &LinkObservation) -> TickOutcome {
        if !obs.peer_known {
            log::info!("peer went away");
            return TickOutcome {
                transition: self.enter(ConnectionState::Disconnected, now),
                ..Default::default()
            };
        }

        if self.mode == HandshakeMode::LinkLayer {
            return TickOutcome {
                eligible: true,
                ..Default::default()
            };
        }

        if now.saturating_duration_since(self.last_received) > self.receive_timeout {
            return TickOutcome {
                transition: self.enter(ConnectionState::Disconnected, now),
                timed_out: true,
                ..Default::default()
            };
        }

        TickOutcome {
            eligible: true,
            send_probe: now.saturating_duration_since(self.last_sent) > self.keepalive_interval,
            ..Default::default()
        }
    }

    fn probe_due(&self, now: Instant) -> bool {
        match self.last_probe {
            Some(at) => now.saturating_duration_since(at) >= self.handshake_interval,
            None => true,
        }
    }

    pub fn mark_probe_sent(&mut self, now: Instant) {
        self.last_probe = Some(now);
        self.last_sent = now;
    }

    pub fn mark_data_sent(&mut self, now: Instant) {
        self.last_sent = now;
    }

    /// Drops to Disconnected outside the tick cadence. Returns the transition, if any.
    pub fn force_disconnect(&mut self, now: Instant) -> Option<ConnectionState> {
        self.enter(ConnectionState::Disconnected, now)
    }

    fn enter(&mut self, next: ConnectionState, now: Instant) -> Option<ConnectionState> {
        if self.state == next {
            return None;
        }

        log::info!("connection state: {} -> {}", self.state.as_str(), next.as_str());
        if next == ConnectionState::Connected {
            self.last_received = now;
            self.last_sent = now;
        }
        self.state = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    fn peer() -> LinkObservation {
        LinkObservation {
            peer_known: true,
            ..Default::default()
        }
    }

    fn reply() -> LinkObservation {
        LinkObservation {
            peer_known: true,
            handshake_reply: true,
            ..Default::default()
        }
    }

    fn connect(machine: &mut SessionMachine, clock: &ManualClock) {
        machine.tick(clock.now(), &peer());
        machine.tick(clock.now(), &reply());
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_first_tick_enters_waiting() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());

        let outcome = machine.tick(clock.now(), &LinkObservation::default());
        assert_eq!(outcome.transition, Some(ConnectionState::WaitingAck));
        assert!(!outcome.eligible);
        assert!(!outcome.send_probe);
    }

    #[test]
    fn test_never_passes_waiting_without_peer() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());

        for _ in 0..1000 {
            let outcome = machine.tick(clock.now(), &LinkObservation::default());
            assert!(!outcome.eligible);
            assert!(!outcome.send_probe);
            clock.advance(Duration::from_millis(30));
        }
        assert_eq!(machine.state(), ConnectionState::WaitingAck);
    }

    #[test]
    fn test_probe_rate_limited() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        machine.tick(clock.now(), &peer());

        let mut probes = 0;
        for _ in 0..100 {
            let outcome = machine.tick(clock.now(), &peer());
            if outcome.send_probe {
                probes += 1;
                machine.mark_probe_sent(clock.now());
            }
            clock.advance(Duration::from_millis(30));
        }
        // 3 seconds of ticks at a 1 second minimum interval.
        assert_eq!(probes, 3);
    }

    #[test]
    fn test_reattached_peer_does_not_bypass_rate_limit() {
        // Some transports used to probe immediately on every new connection.
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        machine.tick(clock.now(), &LinkObservation::default());

        assert!(machine.tick(clock.now(), &peer()).send_probe);
        machine.mark_probe_sent(clock.now());

        clock.advance(Duration::from_millis(30));
        assert!(!machine.tick(clock.now(), &LinkObservation::default()).send_probe);
        clock.advance(Duration::from_millis(30));
        assert!(!machine.tick(clock.now(), &peer()).send_probe);
    }

    #[test]
    fn test_rate_limit_holds_across_disconnect() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        connect(&mut machine, &clock);

        clock.advance(Duration::from_secs(31));
        assert!(machine.tick(clock.now(), &reply()).send_probe);
        machine.mark_probe_sent(clock.now());

        let lost = LinkObservation {
            link_error: true,
            ..peer()
        };
        clock.advance(Duration::from_millis(30));
        assert_eq!(machine.tick(clock.now(), &lost).transition, Some(ConnectionState::Disconnected));
        clock.advance(Duration::from_millis(30));
        assert_eq!(machine.tick(clock.now(), &peer()).transition, Some(ConnectionState::WaitingAck));

        for _ in 0..30 {
            clock.advance(Duration::from_millis(30));
            assert!(!machine.tick(clock.now(), &peer()).send_probe);
        }
        clock.advance(Duration::from_millis(100));
        assert!(machine.tick(clock.now(), &peer()).send_probe);
    }

    #[test]
    fn test_reply_connects_within_one_tick() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        machine.tick(clock.now(), &peer());

        let outcome = machine.tick(clock.now(), &reply());
        assert_eq!(outcome.transition, Some(ConnectionState::Connected));

        let outcome = machine.tick(clock.now(), &peer());
        assert!(outcome.eligible);
        assert_eq!(outcome.transition, None);
    }

    #[test]
    fn test_connected_requires_waiting_first() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());

        let outcome = machine.tick(clock.now(), &reply());
        assert_eq!(outcome.transition, Some(ConnectionState::WaitingAck));
        assert_eq!(machine.state(), ConnectionState::WaitingAck);
    }

    #[test]
    fn test_keepalive_probe_after_idle() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        connect(&mut machine, &clock);

        clock.advance(Duration::from_secs(29));
        let outcome = machine.tick(clock.now(), &LinkObservation { frame: true, ..peer() });
        assert!(outcome.eligible);
        assert!(!outcome.send_probe);

        clock.advance(Duration::from_secs(2));
        let outcome = machine.tick(clock.now(), &peer());
        assert!(outcome.eligible);
        assert!(outcome.send_probe);
    }

    #[test]
    fn test_data_sends_postpone_keepalive() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        connect(&mut machine, &clock);

        for _ in 0..40 {
            clock.advance(Duration::from_secs(1));
            let outcome = machine.tick(clock.now(), &reply());
            assert!(!outcome.send_probe);
            machine.mark_data_sent(clock.now());
        }
    }

    #[test]
    fn test_receive_timeout_disconnects_once() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        connect(&mut machine, &clock);

        clock.advance(Duration::from_secs(60));
        assert_eq!(machine.tick(clock.now(), &peer()).transition, None);

        clock.advance(Duration::from_millis(30));
        let outcome = machine.tick(clock.now(), &peer());
        assert_eq!(outcome.transition, Some(ConnectionState::Disconnected));
        assert!(outcome.timed_out);
        assert!(!outcome.eligible);

        let outcome = machine.tick(clock.now(), &peer());
        assert_eq!(outcome.transition, Some(ConnectionState::WaitingAck));
    }

    #[test]
    fn test_beacon_refreshes_liveness() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        connect(&mut machine, &clock);

        for _ in 0..5 {
            clock.advance(Duration::from_secs(30));
            let outcome = machine.tick(clock.now(), &LinkObservation { beacon: true, ..peer() });
            assert_eq!(outcome.transition, None);
        }
        assert_eq!(machine.state(), ConnectionState::Connected);
    }

    #[test]
    fn test_link_error_forces_disconnect() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::Token, &config(), clock.now());
        connect(&mut machine, &clock);

        let outcome = machine.tick(clock.now(), &LinkObservation { link_error: true, ..peer() });
        assert_eq!(outcome.transition, Some(ConnectionState::Disconnected));
        assert_eq!(machine.force_disconnect(clock.now()), None);
    }

    #[test]
    fn test_link_layer_mode() {
        let clock = ManualClock::new();
        let mut machine = SessionMachine::new(HandshakeMode::LinkLayer, &config(), clock.now());
        machine.tick(clock.now(), &LinkObservation::default());

        let outcome = machine.tick(clock.now(), &LinkObservation::default());
        assert!(!outcome.send_probe);
        assert_eq!(machine.state(), ConnectionState::WaitingAck);

        assert_eq!(machine.tick(clock.now(), &peer()).transition, Some(ConnectionState::Connected));

        clock.advance(Duration::from_secs(600));
        let outcome = machine.tick(clock.now(), &peer());
        assert!(outcome.eligible);
        assert!(!outcome.send_probe);

        let outcome = machine.tick(clock.now(), &LinkObservation::default());
        assert_eq!(outcome.transition, Some(ConnectionState::Disconnected));
    }
}
