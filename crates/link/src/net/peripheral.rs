use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use uuid::Uuid;

use crate::config::{SessionIdentity, TransportKind};
use crate::error::{Error, Result};
use crate::sensor::SensorKind;

use super::protocol::{SensorReading, encode_binary};
use super::state::HandshakeMode;
use super::transport::{LinkEvent, Transport};

pub const DEVICE_NAME: &str = "Bodynode";

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x0000cca0_0000_1000_8000_00805f9b34fb);
pub const PLAYER_CHAR_UUID: Uuid = Uuid::from_u128(0x0000cca1_0000_1000_8000_00805f9b34fb);
pub const BODYPART_CHAR_UUID: Uuid = Uuid::from_u128(0x0000cca2_0000_1000_8000_00805f9b34fb);
pub const ORIENTATION_CHAR_UUID: Uuid = Uuid::from_u128(0x0000cca3_0000_1000_8000_00805f9b34fb);
pub const ACCELERATION_CHAR_UUID: Uuid = Uuid::from_u128(0x0000cca4_0000_1000_8000_00805f9b34fb);
pub const GLOVE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000cca5_0000_1000_8000_00805f9b34fb);
pub const SHOE_CHAR_UUID: Uuid = Uuid::from_u128(0x0000cca6_0000_1000_8000_00805f9b34fb);

pub fn characteristic_for(kind: SensorKind) -> Uuid {
    match kind {
        SensorKind::OrientationAbs => ORIENTATION_CHAR_UUID,
        SensorKind::AccelerationRel => ACCELERATION_CHAR_UUID,
        SensorKind::Glove => GLOVE_CHAR_UUID,
        SensorKind::Shoe => SHOE_CHAR_UUID,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharProps: u8 {
        const READ = 1 << 0;
        const NOTIFY = 1 << 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub props: CharProps,
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<Characteristic>,
}

impl GattService {
    /// Static identity characteristics plus one notify channel per sensor kind.
    pub fn for_identity(identity: &SessionIdentity) -> Self {
        let mut characteristics = vec![
            Characteristic {
                uuid: PLAYER_CHAR_UUID,
                props: CharProps::READ,
                value: identity.player.as_bytes().to_vec(),
            },
            Characteristic {
                uuid: BODYPART_CHAR_UUID,
                props: CharProps::READ,
                value: identity.bodypart.as_bytes().to_vec(),
            },
        ];

        characteristics.extend(SensorKind::ALL.iter().map(|&kind| Characteristic {
            uuid: characteristic_for(kind),
            props: CharProps::NOTIFY,
            value: Vec::new(),
        }));

        Self {
            uuid: SERVICE_UUID,
            characteristics,
        }
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    CentralAttached,
    CentralDetached,
    Error(String),
}

/// The radio stack underneath the peripheral transport.
pub trait PeripheralBackend: Send {
    /// Publishes the service and starts advertising.
    fn start(&mut self, service: &GattService) -> Result<()>;

    fn notify(&mut self, characteristic: Uuid, payload: &[u8]) -> Result<usize>;

    fn poll_events(&mut self) -> Vec<PeripheralEvent>;

    fn stop(&mut self);
}

pub struct PeripheralTransport<B: PeripheralBackend> {
    backend: B,
    attached: bool,
    started: bool,
}

impl<B: PeripheralBackend> PeripheralTransport<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            attached: false,
            started: false,
        }
    }
}

impl<B: PeripheralBackend> Transport for PeripheralTransport<B> {
    fn kind(&self) -> TransportKind {
        TransportKind::Peripheral
    }

    fn handshake_mode(&self) -> HandshakeMode {
        HandshakeMode::LinkLayer
    }

    fn open(&mut self, identity: &SessionIdentity) -> Result<()> {
        self.close();
        self.backend.start(&GattService::for_identity(identity))?;
        self.started = true;
        log::info!("advertising as {} for {}/{}", DEVICE_NAME, identity.player, identity.bodypart);
        Ok(())
    }

    fn receive(&mut self) -> Vec<LinkEvent> {
        if !self.started {
            return Vec::new();
        }

        self.backend
            .poll_events()
            .into_iter()
            .map(|event| match event {
                PeripheralEvent::CentralAttached => {
                    self.attached = true;
                    LinkEvent::PeerAttached
                }
                PeripheralEvent::CentralDetached => {
                    self.attached = false;
                    LinkEvent::PeerDetached
                }
                PeripheralEvent::Error(message) => {
                    self.attached = false;
                    LinkEvent::Failed(message)
                }
            })
            .collect()
    }

    fn has_peer(&self) -> bool {
        self.attached
    }

    fn send_handshake(&mut self) -> Result<usize> {
        Ok(0)
    }

    fn send_readings(&mut self, readings: &[SensorReading]) -> Result<usize> {
        let mut written = 0;
        for reading in readings {
            let Some(kind) = reading.kind() else {
                continue;
            };
            let Some(values) = reading.value.components() else {
                log::debug!("no binary form for {} {:?}", reading.sensortype, reading.value);
                continue;
            };
            written += self
                .backend
                .notify(characteristic_for(kind), &encode_binary(kind, &values))?;
        }
        Ok(written)
    }

    fn drop_peer(&mut self) {
        // The central decides when to reconnect; keep advertising.
    }

    fn close(&mut self) {
        if self.started {
            self.backend.stop();
            self.started = false;
        }
        self.attached = false;
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    service: Option<GattService>,
    advertising: bool,
    central_attached: bool,
    events: VecDeque<PeripheralEvent>,
    notifications: Vec<(Uuid, Vec<u8>)>,
}

fn lock(state: &Mutex<SimulatedState>) -> MutexGuard<'_, SimulatedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory peripheral stack. Pair it with the `SimulatedCentral` from
/// `central()` to drive attach/detach and observe notifications.
#[derive(Debug, Default)]
pub struct SimulatedPeripheral {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn central(&self) -> SimulatedCentral {
        SimulatedCentral {
            state: Arc::clone(&self.state),
        }
    }
}

impl PeripheralBackend for SimulatedPeripheral {
    fn start(&mut self, service: &GattService) -> Result<()> {
        let mut state = lock(&self.state);
        state.service = Some(service.clone());
        state.advertising = true;
        Ok(())
    }

    fn notify(&mut self, characteristic: Uuid, payload: &[u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        let notifiable = state
            .service
            .as_ref()
            .and_then(|s| s.characteristic(characteristic))
            .is_some_and(|c| c.props.contains(CharProps::NOTIFY));
        if !notifiable {
            return Err(Error::Transport(format!("{} is not a notify characteristic", characteristic)));
        }
        if !state.central_attached {
            return Ok(0);
        }
        state.notifications.push((characteristic, payload.to_vec()));
        Ok(payload.len())
    }

    fn poll_events(&mut self) -> Vec<PeripheralEvent> {
        lock(&self.state).events.drain(..).collect()
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        state.advertising = false;
        state.central_attached = false;
        state.service = None;
    }
}

#[derive(Debug, Clone)]
pub struct SimulatedCentral {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedCentral {
    pub fn is_advertising(&self) -> bool {
        lock(&self.state).advertising
    }

    /// Connects if the peripheral is advertising.
    pub fn attach(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.advertising || state.central_attached {
            return false;
        }
        state.central_attached = true;
        state.events.push_back(PeripheralEvent::CentralAttached);
        true
    }

    pub fn detach(&self) {
        let mut state = lock(&self.state);
        if state.central_attached {
            state.central_attached = false;
            state.events.push_back(PeripheralEvent::CentralDetached);
        }
    }

    pub fn fail(&self, message: &str) {
        let mut state = lock(&self.state);
        state.central_attached = false;
        state.events.push_back(PeripheralEvent::Error(message.to_string()));
    }

    pub fn read(&self, characteristic: Uuid) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        state
            .service
            .as_ref()?
            .characteristic(characteristic)
            .filter(|c| c.props.contains(CharProps::READ))
            .map(|c| c.value.clone())
    }

    pub fn take_notifications(&self) -> Vec<(Uuid, Vec<u8>)> {
        std::mem::take(&mut lock(&self.state).notifications)
    }
}
