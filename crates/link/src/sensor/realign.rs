use serde::{Deserialize, Serialize};

/// Maps a device-native quaternion onto the wire axis convention:
/// `out[i] = sign[i] * input[axis[i]]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisTable {
    pub axis: [usize; 4],
    pub sign: [i8; 4],
}

impl AxisTable {
    pub const CURRENT: AxisTable = AxisTable {
        axis: [0, 2, 3, 1],
        sign: [1, 1, -1, 1],
    };

    pub const LEGACY: AxisTable = AxisTable {
        axis: [1, 2, 3, 0],
        sign: [-1, 1, -1, -1],
    };

    pub fn realign(&self, input: [f32; 4]) -> [f32; 4] {
        let mut out = [0.0; 4];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = self.sign[i] as f32 * input[self.axis[i]];
        }
        out
    }
}

/// Protocol revision of the axis table. Both are in use by deployed hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisRevision {
    #[default]
    Current,
    Legacy,
}

impl AxisRevision {
    pub fn table(&self) -> AxisTable {
        match self {
            AxisRevision::Current => AxisTable::CURRENT,
            AxisRevision::Legacy => AxisTable::LEGACY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_quaternion_current() {
        let out = AxisTable::CURRENT.realign([1.0, 0.0, 0.0, 0.0]);
        assert_eq!(out, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_identity_quaternion_legacy() {
        let out = AxisTable::LEGACY.realign([1.0, 0.0, 0.0, 0.0]);
        assert_eq!(out, [0.0, 0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_component_order_per_revision() {
        let input = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(AxisTable::CURRENT.realign(input), [1.0, 3.0, -4.0, 2.0]);
        assert_eq!(AxisTable::LEGACY.realign(input), [-2.0, 3.0, -4.0, -1.0]);
    }

    #[test]
    fn test_revision_selects_table() {
        assert_eq!(AxisRevision::default().table(), AxisTable::CURRENT);
        assert_eq!(AxisRevision::Legacy.table(), AxisTable::LEGACY);
    }
}
