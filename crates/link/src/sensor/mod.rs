mod realign;
mod throttle;

use std::time::Instant;

use bitflags::bitflags;

use crate::error::{Error, Result};

pub use realign::{AxisRevision, AxisTable};
pub use throttle::{ChangeThrottle, should_send};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    OrientationAbs,
    AccelerationRel,
    Glove,
    Shoe,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::OrientationAbs,
        SensorKind::AccelerationRel,
        SensorKind::Glove,
        SensorKind::Shoe,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            SensorKind::OrientationAbs => "orientation_abs",
            SensorKind::AccelerationRel => "acceleration_rel",
            SensorKind::Glove => "glove",
            SensorKind::Shoe => "shoe",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    pub fn component_count(&self) -> usize {
        match self {
            SensorKind::OrientationAbs => 4,
            SensorKind::AccelerationRel => 3,
            SensorKind::Glove => 9,
            SensorKind::Shoe => 1,
        }
    }

    /// Discrete kinds carry small integer readings rather than floats.
    pub fn is_discrete(&self) -> bool {
        matches!(self, SensorKind::Glove | SensorKind::Shoe)
    }

    pub fn flag(&self) -> SensorSet {
        match self {
            SensorKind::OrientationAbs => SensorSet::ORIENTATION,
            SensorKind::AccelerationRel => SensorSet::ACCELERATION,
            SensorKind::Glove => SensorSet::GLOVE,
            SensorKind::Shoe => SensorSet::SHOE,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SensorSet: u8 {
        const ORIENTATION = 1 << 0;
        const ACCELERATION = 1 << 1;
        const GLOVE = 1 << 2;
        const SHOE = 1 << 3;
    }
}

impl SensorSet {
    pub fn enables(&self, kind: SensorKind) -> bool {
        self.contains(kind.flag())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub kind: SensorKind,
    pub values: Vec<f32>,
    pub timestamp: Instant,
}

impl SensorSample {
    pub fn new(kind: SensorKind, values: Vec<f32>) -> Result<Self> {
        if values.len() != kind.component_count() {
            return Err(Error::Malformed(format!(
                "{} expects {} components, got {}",
                kind.tag(),
                kind.component_count(),
                values.len()
            )));
        }

        Ok(Self {
            kind,
            values,
            timestamp: Instant::now(),
        })
    }

    /// Device-native quaternion, not yet realigned.
    pub fn orientation(quat: [f32; 4]) -> Self {
        Self::from_parts(SensorKind::OrientationAbs, quat.to_vec())
    }

    pub fn acceleration(accel: [f32; 3]) -> Self {
        Self::from_parts(SensorKind::AccelerationRel, accel.to_vec())
    }

    pub fn glove(flex: [u8; 9]) -> Self {
        Self::from_parts(SensorKind::Glove, flex.iter().map(|&v| v as f32).collect())
    }

    pub fn shoe(step: u8) -> Self {
        Self::from_parts(SensorKind::Shoe, vec![step as f32])
    }

    fn from_parts(kind: SensorKind, values: Vec<f32>) -> Self {
        Self {
            kind,
            values,
            timestamp: Instant::now(),
        }
    }
}
