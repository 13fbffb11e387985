use serde_json::{Map, Value};

use crate::config::SessionIdentity;
use crate::error::{Error, Result};
use crate::sensor::SensorKind;

use super::protocol::WILDCARD;

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Haptic {
        duration_ms: u64,
        strength: u8,
    },
    SetPlayer {
        player: String,
    },
    SetBodypart {
        bodypart: String,
    },
    EnableSensor {
        kind: SensorKind,
        enabled: bool,
    },
    SetWifi {
        ssid: String,
        password: String,
        multicast_group: String,
    },
}

impl Action {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Action::Haptic { .. } => "haptic",
            Action::SetPlayer { .. } => "set_player",
            Action::SetBodypart { .. } => "set_bodypart",
            Action::EnableSensor { .. } => "enable_sensor",
            Action::SetWifi { .. } => "set_wifi",
        }
    }
}

/// An inbound control message together with the tags it is addressed to.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedAction {
    pub player: String,
    pub bodypart: String,
    pub action: Action,
}

impl ScopedAction {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::Malformed("action is not an object".to_string()))?;

        let player = required_str(obj, "player")?;
        let bodypart = required_str(obj, "bodypart")?;
        let type_tag = required_str(obj, "type")?;

        let action = match type_tag.as_str() {
            "haptic" => Action::Haptic {
                duration_ms: required_u64(obj, "duration_ms")?,
                strength: required_i64(obj, "strength")?.clamp(1, 255) as u8,
            },
            "set_player" => Action::SetPlayer {
                player: required_str(obj, "new_player")?,
            },
            "set_bodypart" => Action::SetBodypart {
                bodypart: required_str(obj, "new_bodypart")?,
            },
            "enable_sensor" => {
                let tag = required_str(obj, "sensortype")?;
                let kind = SensorKind::from_tag(&tag)
                    .ok_or_else(|| Error::Malformed(format!("unknown sensortype `{}`", tag)))?;
                Action::EnableSensor {
                    kind,
                    enabled: required_bool(obj, "enable")?,
                }
            }
            "set_wifi" => Action::SetWifi {
                ssid: required_str(obj, "ssid")?,
                password: required_str(obj, "password")?,
                multicast_group: required_str(obj, "multicast_group")
                    .or_else(|_| required_str(obj, "multicast_message"))?,
            },
            other => return Err(Error::Malformed(format!("unknown action type `{}`", other))),
        };

        Ok(Self {
            player,
            bodypart,
            action,
        })
    }

    pub fn applies_to(&self, identity: &SessionIdentity) -> bool {
        tag_matches(&self.player, &identity.player) && tag_matches(&self.bodypart, &identity.bodypart)
    }
}

fn tag_matches(target: &str, local: &str) -> bool {
    target == WILDCARD || target == local
}

fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    obj.get(key)
        .ok_or_else(|| Error::Malformed(format!("missing field `{}`", key)))
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String> {
    field(obj, key)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::Malformed(format!("field `{}` is not a string", key)))
}

fn required_i64(obj: &Map<String, Value>, key: &str) -> Result<i64> {
    let value = field(obj, key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .ok_or_else(|| Error::Malformed(format!("field `{}` is not a number", key)))
}

fn required_u64(obj: &Map<String, Value>, key: &str) -> Result<u64> {
    let value = required_i64(obj, key)?;
    u64::try_from(value).map_err(|_| Error::Malformed(format!("field `{}` is negative", key)))
}

fn required_bool(obj: &Map<String, Value>, key: &str) -> Result<bool> {
    match field(obj, key)? {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(Error::Malformed(format!("field `{}` is not a boolean", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;

    fn local(player: &str, bodypart: &str) -> SessionIdentity {
        SessionIdentity {
            player: player.to_string(),
            bodypart: bodypart.to_string(),
            glove_bodypart: "hand_left".to_string(),
            transport: TransportKind::Datagram,
        }
    }

    #[test]
    fn test_haptic_wildcard_accepted() {
        let action = ScopedAction::parse(
            r#"{"type":"haptic","player":"all","bodypart":"all","duration_ms":200,"strength":128}"#,
        )
        .unwrap();
        assert_eq!(
            action.action,
            Action::Haptic {
                duration_ms: 200,
                strength: 128
            }
        );
        assert!(action.applies_to(&local("p1", "katana")));
        assert!(action.applies_to(&local("someone", "head")));
    }

    #[test]
    fn test_other_player_dropped() {
        let action = ScopedAction::parse(
            r#"{"type":"haptic","player":"p2","bodypart":"all","duration_ms":200,"strength":128}"#,
        )
        .unwrap();
        assert!(!action.applies_to(&local("p1", "katana")));
        assert!(action.applies_to(&local("p2", "katana")));
    }

    #[test]
    fn test_bodypart_scoping() {
        let action = ScopedAction::parse(
            r#"{"type":"set_player","player":"all","bodypart":"head","new_player":"p9"}"#,
        )
        .unwrap();
        assert!(action.applies_to(&local("p1", "head")));
        assert!(!action.applies_to(&local("p1", "katana")));
    }

    #[test]
    fn test_haptic_missing_strength_is_malformed() {
        let result = ScopedAction::parse(r#"{"type":"haptic","player":"all","bodypart":"all","duration_ms":200}"#);
        assert!(matches!(result, Err(Error::Malformed(_))));
    }

    #[test]
    fn test_missing_scope_is_malformed() {
        let result = ScopedAction::parse(r#"{"type":"haptic","duration_ms":200,"strength":10}"#);
        assert!(matches!(result, Err(Error::Malformed(_))));
    }

    #[test]
    fn test_haptic_strength_clamped() {
        let loud = ScopedAction::parse(
            r#"{"type":"haptic","player":"all","bodypart":"all","duration_ms":50,"strength":900}"#,
        )
        .unwrap();
        let silent = ScopedAction::parse(
            r#"{"type":"haptic","player":"all","bodypart":"all","duration_ms":50,"strength":0}"#,
        )
        .unwrap();
        assert_eq!(loud.action, Action::Haptic { duration_ms: 50, strength: 255 });
        assert_eq!(silent.action, Action::Haptic { duration_ms: 50, strength: 1 });
    }

    #[test]
    fn test_enable_sensor() {
        let action = ScopedAction::parse(
            r#"{"type":"enable_sensor","player":"all","bodypart":"all","sensortype":"acceleration_rel","enable":"true"}"#,
        )
        .unwrap();
        assert_eq!(
            action.action,
            Action::EnableSensor {
                kind: SensorKind::AccelerationRel,
                enabled: true
            }
        );

        let unknown = ScopedAction::parse(
            r#"{"type":"enable_sensor","player":"all","bodypart":"all","sensortype":"radar","enable":true}"#,
        );
        assert!(unknown.is_err());
    }

    #[test]
    fn test_set_wifi_accepts_either_group_key() {
        let action = ScopedAction::parse(
            r#"{"type":"set_wifi","player":"all","bodypart":"all","ssid":"lab","password":"pw","multicast_message":"BN2"}"#,
        )
        .unwrap();
        assert_eq!(action.action.type_tag(), "set_wifi");
        assert_eq!(
            action.action,
            Action::SetWifi {
                ssid: "lab".to_string(),
                password: "pw".to_string(),
                multicast_group: "BN2".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_type_and_garbage() {
        assert!(ScopedAction::parse(r#"{"type":"explode","player":"all","bodypart":"all"}"#).is_err());
        assert!(matches!(ScopedAction::parse("[1,2]"), Err(Error::Malformed(_))));
        assert!(matches!(ScopedAction::parse("{oops"), Err(Error::Json(_))));
    }
}
