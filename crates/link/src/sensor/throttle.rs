use std::collections::HashMap;

use super::SensorKind;

/// True when any component of `current` moved more than `threshold` away
/// from `previous`. On true, `previous` becomes `current`.
pub fn should_send(current: &[f32], previous: &mut Vec<f32>, threshold: f32) -> bool {
    let changed = previous.len() != current.len()
        || current
            .iter()
            .zip(previous.iter())
            .any(|(now, before)| (now - before).abs() > threshold);

    if changed {
        previous.clear();
        previous.extend_from_slice(current);
    }
    changed
}

/// Last transmitted vector per sensor kind.
#[derive(Debug, Default)]
pub struct ChangeThrottle {
    previous: HashMap<SensorKind, Vec<f32>>,
}

impl ChangeThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, kind: SensorKind, current: &[f32], threshold: f32) -> bool {
        let previous = self.previous.entry(kind).or_default();
        should_send(current, previous, threshold)
    }

    /// Same test as `check`, but leaves the cache alone until `record`.
    pub fn would_send(&self, kind: SensorKind, current: &[f32], threshold: f32) -> bool {
        let mut previous = self.previous.get(&kind).cloned().unwrap_or_default();
        should_send(current, &mut previous, threshold)
    }

    pub fn record(&mut self, kind: SensorKind, sent: &[f32]) {
        self.previous.insert(kind, sent.to_vec());
    }

    pub fn previous(&self, kind: SensorKind) -> Option<&[f32]> {
        self.previous.get(&kind).map(Vec::as_slice)
    }

    /// Forget the cached vector so the next sample of `kind` is always sent.
    pub fn forget(&mut self, kind: SensorKind) {
        self.previous.remove(&kind);
    }

    pub fn clear(&mut self) {
        self.previous.clear();
    }
}
