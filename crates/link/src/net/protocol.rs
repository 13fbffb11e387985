use serde::{Deserialize, Serialize};

use crate::config::SessionIdentity;
use crate::error::{Error, Result};
use crate::sensor::{SensorKind, SensorSample};

pub const HANDSHAKE_PROBE: &str = "ACKN";
pub const HANDSHAKE_REPLY: &str = "ACKH";
pub const RESET_VALUE: &str = "reset";
pub const WILDCARD: &str = "all";

/// An empty token matches anything.
pub fn contains_token(data: &[u8], token: &str) -> bool {
    count_token(data, token) > 0 || token.is_empty()
}

/// Non-overlapping occurrences of `token` in `data`.
pub fn count_token(data: &[u8], token: &str) -> usize {
    let token = token.as_bytes();
    if token.is_empty() {
        return 0;
    }

    let mut count = 0;
    let mut i = 0;
    while i + token.len() <= data.len() {
        if data[i..].starts_with(token) {
            count += 1;
            i += token.len();
        } else {
            i += 1;
        }
    }
    count
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Integer(i64),
    Number(f32),
    Integers(Vec<i64>),
    Numbers(Vec<f32>),
    Text(String),
}

impl ReadingValue {
    pub fn for_kind(kind: SensorKind, values: &[f32]) -> Self {
        match (kind.is_discrete(), values) {
            (true, [single]) => ReadingValue::Integer(discrete(*single) as i64),
            (true, many) => ReadingValue::Integers(many.iter().map(|&v| discrete(v) as i64).collect()),
            (false, [single]) => ReadingValue::Number(*single),
            (false, many) => ReadingValue::Numbers(many.to_vec()),
        }
    }

    pub fn components(&self) -> Option<Vec<f32>> {
        match self {
            ReadingValue::Integer(v) => Some(vec![*v as f32]),
            ReadingValue::Number(v) => Some(vec![*v]),
            ReadingValue::Integers(vs) => Some(vs.iter().map(|&v| v as f32).collect()),
            ReadingValue::Numbers(vs) => Some(vs.clone()),
            ReadingValue::Text(_) => None,
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, ReadingValue::Text(text) if text == RESET_VALUE)
    }
}

/// One outbound sensor unit as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub player: String,
    pub bodypart: String,
    pub sensortype: String,
    pub value: ReadingValue,
}

impl SensorReading {
    pub fn from_sample(identity: &SessionIdentity, sample: &SensorSample) -> Self {
        Self {
            player: identity.player.clone(),
            bodypart: identity.bodypart_for(sample.kind).to_string(),
            sensortype: sample.kind.tag().to_string(),
            value: ReadingValue::for_kind(sample.kind, &sample.values),
        }
    }

    pub fn reset(identity: &SessionIdentity, kind: SensorKind) -> Self {
        Self {
            player: identity.player.clone(),
            bodypart: identity.bodypart_for(kind).to_string(),
            sensortype: kind.tag().to_string(),
            value: ReadingValue::Text(RESET_VALUE.to_string()),
        }
    }

    pub fn kind(&self) -> Option<SensorKind> {
        SensorKind::from_tag(&self.sensortype)
    }
}

/// Concatenates the readings as JSON objects with no delimiter.
pub fn encode_frame(readings: &[SensorReading]) -> Result<Vec<u8>> {
    let mut frame = Vec::new();
    for reading in readings {
        serde_json::to_writer(&mut frame, reading)?;
    }
    Ok(frame)
}

pub fn decode_reading(text: &str) -> Result<SensorReading> {
    let reading: SensorReading = serde_json::from_str(text)?;
    Ok(reading)
}

/// Fixed-length payload for the notify channels: little-endian f32 for
/// continuous kinds, one byte per value for discrete kinds.
pub fn encode_binary(kind: SensorKind, values: &[f32]) -> Vec<u8> {
    if kind.is_discrete() {
        values.iter().map(|&v| discrete(v)).collect()
    } else {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

pub fn decode_binary(kind: SensorKind, payload: &[u8]) -> Result<Vec<f32>> {
    let width = if kind.is_discrete() { 1 } else { 4 };
    let expected = kind.component_count() * width;
    if payload.len() != expected {
        return Err(Error::Malformed(format!(
            "{} payload is {} bytes, expected {}",
            kind.tag(),
            payload.len(),
            expected
        )));
    }

    if kind.is_discrete() {
        return Ok(payload.iter().map(|&b| b as f32).collect());
    }

    Ok(payload
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn discrete(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
