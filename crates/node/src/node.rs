use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::Result;

use bodylink::{
    DatagramConfig, DatagramTransport, NodeInput, PeripheralTransport, Session, SessionEvent,
    SessionWorker, Settings, SettingsStore, SimulatedCentral, SimulatedPeripheral, StreamConfig,
    StreamTransport, Transport, TransportKind, WifiCredentials, WorkerStatus,
};

use crate::source::MotionSource;

/// Wires settings, the motion source and the session worker together.
pub struct Node {
    worker: SessionWorker,
    source: MotionSource,
    central: Option<SimulatedCentral>,
    settings: Settings,
    store: Box<dyn SettingsStore>,
    sample_interval: Duration,
    last_sample: Option<Instant>,
}

impl Node {
    pub fn start(settings: Settings, store: Box<dyn SettingsStore>) -> Result<Self> {
        let (transport, central) = build_transport(&settings);
        let session = Session::new(&settings, transport);
        let worker = SessionWorker::spawn(session)?;

        if let Some(central) = &central {
            central.attach();
        }

        Ok(Self {
            worker,
            source: MotionSource::new(),
            central,
            sample_interval: Duration::from_millis(settings.sensor_interval_ms.max(1)),
            settings,
            store,
            last_sample: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn status(&self) -> WorkerStatus {
        self.worker.status()
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        self.worker.running()
    }

    pub fn request_reset(&self) {
        self.worker.push(NodeInput::Reset);
    }

    /// Feeds fresh samples and returns what the session reported since the last call.
    pub fn step(&mut self) -> Vec<SessionEvent> {
        let due = self
            .last_sample
            .is_none_or(|at| at.elapsed() >= self.sample_interval);
        if due {
            for sample in self.source.samples() {
                self.worker.push(NodeInput::Sample(sample));
            }
            self.last_sample = Some(Instant::now());
        }

        let events = self.worker.try_events();
        for event in &events {
            self.apply(event);
        }
        events
    }

    fn apply(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::StateChanged(_) | SessionEvent::Haptic { .. } => return,
            SessionEvent::PlayerChanged(player) => self.settings.player = player.clone(),
            SessionEvent::BodypartChanged(bodypart) => self.settings.bodypart = bodypart.clone(),
            SessionEvent::SensorToggled { kind, enabled } => {
                self.settings.set_sensor_enabled(*kind, *enabled)
            }
            SessionEvent::WifiChanged {
                ssid,
                password,
                multicast_group,
            } => {
                self.settings.wifi = Some(WifiCredentials {
                    ssid: ssid.clone(),
                    password: password.clone(),
                });
                self.settings.multicast_group = multicast_group.clone();
            }
        }

        if let Err(e) = self.store.save(&self.settings) {
            log::warn!("could not persist settings: {}", e);
        }
    }

    pub fn shutdown(&mut self) -> Vec<SessionEvent> {
        if let Some(central) = &self.central {
            central.detach();
        }
        self.worker.stop();
        self.worker.try_events()
    }
}

fn build_transport(settings: &Settings) -> (Box<dyn Transport>, Option<SimulatedCentral>) {
    match settings.transport {
        TransportKind::Datagram => (
            Box::new(DatagramTransport::new(DatagramConfig::from_settings(settings))),
            None,
        ),
        TransportKind::Stream => (
            Box::new(StreamTransport::new(StreamConfig::from_settings(settings))),
            None,
        ),
        TransportKind::Peripheral => {
            log::warn!("no radio stack bound, running the peripheral transport against a simulated central");
            let backend = SimulatedPeripheral::new();
            let central = backend.central();
            (Box::new(PeripheralTransport::new(backend)), Some(central))
        }
    }
}

pub fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChanged(state) => format!("Connection {}", state.as_str()),
        SessionEvent::Haptic {
            duration_ms,
            strength,
        } => format!("Vibrate {} ms at strength {}", duration_ms, strength),
        SessionEvent::PlayerChanged(player) => format!("Player set to {}", player),
        SessionEvent::BodypartChanged(bodypart) => format!("Body part set to {}", bodypart),
        SessionEvent::SensorToggled { kind, enabled } => format!(
            "{} {}",
            kind.tag(),
            if *enabled { "enabled" } else { "disabled" }
        ),
        SessionEvent::WifiChanged {
            ssid,
            multicast_group,
            ..
        } => format!("Wifi set to {} (group {})", ssid, multicast_group),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bodylink::{ConnectionState, MemoryStore, SensorKind};

    #[test]
    fn test_describe_events() {
        assert_eq!(
            describe(&SessionEvent::StateChanged(ConnectionState::Connected)),
            "Connection connected"
        );
        assert_eq!(
            describe(&SessionEvent::SensorToggled {
                kind: SensorKind::AccelerationRel,
                enabled: false
            }),
            "acceleration_rel disabled"
        );
    }

    #[test]
    fn test_peripheral_node_connects_to_simulated_central() {
        let settings = Settings {
            transport: TransportKind::Peripheral,
            sensor_interval_ms: 5,
            ..Default::default()
        };
        let mut node = Node::start(settings, Box::new(MemoryStore::default())).unwrap();

        let start = Instant::now();
        while node.status().state != ConnectionState::Connected
            && start.elapsed() < Duration::from_secs(2)
        {
            node.step();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(node.status().state, ConnectionState::Connected);

        node.shutdown();
        assert_eq!(node.status().state, ConnectionState::Disconnected);
    }
}
