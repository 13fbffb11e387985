pub mod config;
pub mod error;
pub mod net;
pub mod sensor;
pub mod session;
pub mod worker;

pub use config::{
    DEFAULT_DATA_PORT, DEFAULT_GROUP_TAG, DEFAULT_MULTICAST_ADDR, DEFAULT_MULTICAST_PORT,
    JsonFileStore, MemoryStore, SessionConfig, SessionIdentity, Settings, SettingsStore,
    TransportKind, WifiCredentials,
};
pub use error::{Error, Result};
pub use net::{
    ConnectionState, DatagramConfig, DatagramTransport, LinkStats, PeripheralTransport,
    SensorReading, SimulatedCentral, SimulatedPeripheral, StreamConfig, StreamTransport,
    Transport,
};
pub use sensor::{AxisRevision, SensorKind, SensorSample, SensorSet};
pub use session::{Session, SessionEvent};
pub use worker::{NodeInput, SessionWorker, WorkerStatus};
