use std::f32::consts::TAU;
use std::time::Instant;

use glam::{EulerRot, Quat, Vec3};

use bodylink::SensorSample;

const GLOVE_PERIOD_SECS: f32 = 2.0;
const STEP_PERIOD_SECS: f32 = 1.0;

/// Stand-in for sensor hardware: a slow sweep plus a periodic glove squeeze.
pub struct MotionSource {
    started: Instant,
}

impl MotionSource {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn samples(&self) -> Vec<SensorSample> {
        let t = self.started.elapsed().as_secs_f32();
        vec![
            SensorSample::orientation(orientation_at(t)),
            SensorSample::acceleration(acceleration_at(t)),
            SensorSample::glove(glove_at(t)),
            SensorSample::shoe(((t / STEP_PERIOD_SECS) as u32 % 2) as u8),
        ]
    }
}

/// Device-native component order: x, y, z, w.
fn orientation_at(t: f32) -> [f32; 4] {
    let yaw = (t / 10.0) * TAU;
    let pitch = (t * 0.5).sin() * 0.3;
    let q = Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0);
    [q.x, q.y, q.z, q.w]
}

fn acceleration_at(t: f32) -> [f32; 3] {
    (Vec3::new((t * 2.0).sin(), 0.0, (t * 2.0).cos()) * 0.3).to_array()
}

fn glove_at(t: f32) -> [u8; 9] {
    let closed = (t / GLOVE_PERIOD_SECS) as u32 % 2 == 1;
    let flex = if closed { 1 } else { 0 };
    [flex, flex, flex, flex, flex, 0, 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_is_unit_quaternion() {
        for t in [0.0, 1.3, 7.9] {
            let [x, y, z, w] = orientation_at(t);
            let norm = (x * x + y * y + z * z + w * w).sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_glove_toggles() {
        assert_eq!(glove_at(0.5)[0], 0);
        assert_eq!(glove_at(2.5)[0], 1);
    }

    #[test]
    fn test_samples_cover_every_kind() {
        let kinds: Vec<_> = MotionSource::new().samples().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, bodylink::SensorKind::ALL.to_vec());
    }
}
