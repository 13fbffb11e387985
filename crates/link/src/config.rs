use std::fmt;
use std::fs;
use std::io;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sensor::{AxisRevision, SensorKind, SensorSet};

pub const DEFAULT_DATA_PORT: u16 = 12345;
pub const DEFAULT_MULTICAST_PORT: u16 = 12346;
pub const DEFAULT_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 192, 1, 99);
pub const DEFAULT_GROUP_TAG: &str = "BN";
pub const DEFAULT_SENSOR_INTERVAL_MS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Datagram,
    Stream,
    Peripheral,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Datagram => "datagram",
            TransportKind::Stream => "stream",
            TransportKind::Peripheral => "peripheral",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "datagram" | "wifi" | "udp" => Ok(TransportKind::Datagram),
            "stream" | "bluetooth" | "tcp" => Ok(TransportKind::Stream),
            "peripheral" | "ble" => Ok(TransportKind::Peripheral),
            other => Err(Error::Settings(format!("unknown transport `{}`", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
}

/// Persisted node settings. Missing keys fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub player: String,
    pub bodypart: String,
    pub glove_bodypart: String,
    pub multicast_group: String,
    pub sensor_interval_ms: u64,
    pub transport: TransportKind,
    pub orientation_enabled: bool,
    pub acceleration_enabled: bool,
    pub glove_enabled: bool,
    pub shoe_enabled: bool,
    pub local_port: u16,
    pub remote_port: u16,
    pub multicast_port: u16,
    pub multicast_address: Ipv4Addr,
    pub axis_table: AxisRevision,
    pub wifi: Option<WifiCredentials>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            player: "playerone".to_string(),
            bodypart: "katana".to_string(),
            glove_bodypart: "hand_left".to_string(),
            multicast_group: DEFAULT_GROUP_TAG.to_string(),
            sensor_interval_ms: DEFAULT_SENSOR_INTERVAL_MS,
            transport: TransportKind::Datagram,
            orientation_enabled: true,
            acceleration_enabled: false,
            glove_enabled: true,
            shoe_enabled: true,
            local_port: DEFAULT_DATA_PORT,
            remote_port: DEFAULT_DATA_PORT,
            multicast_port: DEFAULT_MULTICAST_PORT,
            multicast_address: DEFAULT_MULTICAST_ADDR,
            axis_table: AxisRevision::Current,
            wifi: None,
        }
    }
}

impl Settings {
    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            player: self.player.clone(),
            bodypart: self.bodypart.clone(),
            glove_bodypart: self.glove_bodypart.clone(),
            transport: self.transport,
        }
    }

    pub fn enabled_sensors(&self) -> SensorSet {
        let mut set = SensorSet::empty();
        set.set(SensorSet::ORIENTATION, self.orientation_enabled);
        set.set(SensorSet::ACCELERATION, self.acceleration_enabled);
        set.set(SensorSet::GLOVE, self.glove_enabled);
        set.set(SensorSet::SHOE, self.shoe_enabled);
        set
    }

    pub fn set_sensor_enabled(&mut self, kind: SensorKind, enabled: bool) {
        match kind {
            SensorKind::OrientationAbs => self.orientation_enabled = enabled,
            SensorKind::AccelerationRel => self.acceleration_enabled = enabled,
            SensorKind::Glove => self.glove_enabled = enabled,
            SensorKind::Shoe => self.shoe_enabled = enabled,
        }
    }
}

/// Tags stamped on every outbound reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub player: String,
    pub bodypart: String,
    pub glove_bodypart: String,
    pub transport: TransportKind,
}

impl SessionIdentity {
    pub fn bodypart_for(&self, kind: SensorKind) -> &str {
        match kind {
            SensorKind::Glove => &self.glove_bodypart,
            _ => &self.bodypart,
        }
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Settings::default().identity()
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tick_interval: Duration,
    pub handshake_interval: Duration,
    pub keepalive_interval: Duration,
    pub receive_timeout: Duration,
    pub orientation_threshold: f32,
    pub acceleration_threshold: f32,
    pub discrete_threshold: f32,
    pub axis_table: AxisRevision,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_SENSOR_INTERVAL_MS),
            handshake_interval: Duration::from_millis(1000),
            keepalive_interval: Duration::from_secs(30),
            receive_timeout: Duration::from_secs(60),
            orientation_threshold: 0.002,
            acceleration_threshold: 0.05,
            discrete_threshold: 0.0,
            axis_table: AxisRevision::Current,
        }
    }
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tick_interval: Duration::from_millis(settings.sensor_interval_ms.max(1)),
            axis_table: settings.axis_table,
            ..Default::default()
        }
    }

    pub fn threshold(&self, kind: SensorKind) -> f32 {
        match kind {
            SensorKind::OrientationAbs => self.orientation_threshold,
            SensorKind::AccelerationRel => self.acceleration_threshold,
            SensorKind::Glove | SensorKind::Shoe => self.discrete_threshold,
        }
    }
}

pub trait SettingsStore: Send {
    fn load(&self) -> Result<Settings>;
    fn save(&mut self, settings: &Settings) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: Settings,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }
}

impl SettingsStore for MemoryStore {
    fn load(&self) -> Result<Settings> {
        Ok(self.settings.clone())
    }

    fn save(&mut self, settings: &Settings) -> Result<()> {
        self.settings = settings.clone();
        Ok(())
    }
}

/// Settings kept as a pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for JsonFileStore {
    fn load(&self) -> Result<Settings> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("{} not found, using default settings", self.path.display());
                Ok(Settings::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, settings: &Settings) -> Result<()> {
        let text = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.player, "playerone");
        assert_eq!(settings.bodypart, "katana");
        assert_eq!(settings.glove_bodypart, "hand_left");
        assert_eq!(settings.multicast_group, "BN");
        assert_eq!(settings.local_port, 12345);
        assert_eq!(settings.multicast_port, 12346);
        assert_eq!(settings.enabled_sensors(), SensorSet::ORIENTATION | SensorSet::GLOVE | SensorSet::SHOE);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"player":"p1","transport":"stream"}"#).unwrap();
        assert_eq!(settings.player, "p1");
        assert_eq!(settings.transport, TransportKind::Stream);
        assert_eq!(settings.bodypart, "katana");
        assert_eq!(settings.multicast_address, DEFAULT_MULTICAST_ADDR);
    }

    #[test]
    fn test_transport_kind_parse() {
        assert_eq!("ble".parse::<TransportKind>().unwrap(), TransportKind::Peripheral);
        assert_eq!("stream".parse::<TransportKind>().unwrap(), TransportKind::Stream);
        assert!(matches!("carrier-pigeon".parse::<TransportKind>(), Err(Error::Settings(_))));
    }

    #[test]
    fn test_glove_uses_glove_bodypart() {
        let identity = Settings::default().identity();
        assert_eq!(identity.bodypart_for(SensorKind::Glove), "hand_left");
        assert_eq!(identity.bodypart_for(SensorKind::OrientationAbs), "katana");
    }

    #[test]
    fn test_session_config_from_settings() {
        let settings = Settings {
            sensor_interval_ms: 50,
            axis_table: AxisRevision::Legacy,
            ..Default::default()
        };
        let config = SessionConfig::from_settings(&settings);
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.axis_table, AxisRevision::Legacy);
        assert_eq!(config.threshold(SensorKind::AccelerationRel), 0.05);
        assert_eq!(config.threshold(SensorKind::Glove), 0.0);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::default();
        let mut settings = store.load().unwrap();
        settings.set_sensor_enabled(SensorKind::AccelerationRel, true);
        store.save(&settings).unwrap();
        assert!(store.load().unwrap().acceleration_enabled);
    }

    #[test]
    fn test_json_file_store() {
        let path = std::env::temp_dir().join(format!("bodylink-settings-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let mut store = JsonFileStore::new(&path);
        assert_eq!(store.load().unwrap(), Settings::default());

        let settings = Settings {
            player: "p7".to_string(),
            wifi: Some(WifiCredentials {
                ssid: "lab".to_string(),
                password: "secret".to_string(),
            }),
            ..Default::default()
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load().unwrap(), settings);

        fs::remove_file(&path).unwrap();
    }
}
