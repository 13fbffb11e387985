mod action;
mod datagram;
mod framer;
mod peripheral;
mod protocol;
mod state;
mod stream;
mod transport;

pub use action::{Action, ScopedAction};
pub use datagram::{DatagramConfig, DatagramTransport};
pub use framer::StreamFramer;
pub use peripheral::{
    ACCELERATION_CHAR_UUID, BODYPART_CHAR_UUID, CharProps, Characteristic, DEVICE_NAME,
    GLOVE_CHAR_UUID, GattService, ORIENTATION_CHAR_UUID, PLAYER_CHAR_UUID, PeripheralBackend,
    PeripheralEvent, PeripheralTransport, SERVICE_UUID, SHOE_CHAR_UUID, SimulatedCentral,
    SimulatedPeripheral, characteristic_for,
};
pub use protocol::{
    HANDSHAKE_PROBE, HANDSHAKE_REPLY, RESET_VALUE, ReadingValue, SensorReading, WILDCARD,
    contains_token, count_token, decode_binary, decode_reading, encode_binary, encode_frame,
};
pub use state::{
    Clock, ConnectionState, HandshakeMode, LinkObservation, ManualClock, SessionMachine,
    SystemClock, TickOutcome,
};
pub use stream::{StreamConfig, StreamTransport};
pub use transport::{LinkEvent, LinkStats, Outbox, Transport};
