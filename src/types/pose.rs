//! Pose frame types

use std::collections::BTreeMap;

use super::Skeleton;

/// Rotation + translation pair carried by `tran` boxes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    /// Unit quaternion as x, y, z, w
    pub rotation: [f32; 4],
    /// Translation in meters
    pub translation: [f32; 3],
}

impl Transform {
    pub const IDENTITY: Transform = Transform { rotation: [0.0, 0.0, 0.0, 1.0], translation: [0.0; 3] };

    pub fn new(rotation: [f32; 4], translation: [f32; 3]) -> Self {
        Self { rotation, translation }
    }

    /// Build from the 7-float wire order (rotation first).
    pub fn from_components(c: [f32; 7]) -> Self {
        Self { rotation: [c[0], c[1], c[2], c[3]], translation: [c[4], c[5], c[6]] }
    }

    /// Flatten back to the 7-float wire order.
    pub fn components(&self) -> [f32; 7] {
        let [rx, ry, rz, rw] = self.rotation;
        let [tx, ty, tz] = self.translation;
        [rx, ry, rz, rw, tx, ty, tz]
    }
}

/// One decoded `fram` packet.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSample {
    /// Frame number. Raw from the wire until a session normalizes it.
    pub frame: u32,
    /// Sender-side playback time in seconds
    pub time: f32,
    /// POSIX timestamp (seconds) when the frame was captured
    pub utc: f64,
    /// Per-bone transforms keyed by bone id
    pub bones: BTreeMap<u16, Transform>,
}

impl PoseSample {
    /// Transforms in the skeleton's joint order.
    ///
    /// Bones absent from this sample fall back to the bone's rest transform so
    /// positional arrays always have one entry per joint.
    pub fn ordered_by(&self, skeleton: &Skeleton) -> Vec<Transform> {
        skeleton
            .joint_order()
            .iter()
            .map(|bone| self.bones.get(&bone.id).copied().unwrap_or(bone.rest))
            .collect()
    }

    /// Copy of this sample relabelled with another frame number.
    pub fn with_frame(&self, frame: u32) -> Self {
        Self { frame, ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Bone;

    fn chain() -> Skeleton {
        Skeleton::new(vec![
            Bone::new(0, crate::ROOT_PARENT_ID, Transform::IDENTITY),
            Bone::new(2, 0, Transform::new([0.0, 0.0, 0.0, 1.0], [0.0, 2.0, 0.0])),
            Bone::new(1, 0, Transform::new([0.0, 0.0, 0.0, 1.0], [0.0, 1.0, 0.0])),
        ])
        .unwrap()
    }

    #[test]
    fn components_round_trip_in_wire_order() {
        let t = Transform::from_components([0.1, 0.2, 0.3, 0.9, 1.0, 2.0, 3.0]);
        assert_eq!(t.rotation, [0.1, 0.2, 0.3, 0.9]);
        assert_eq!(t.translation, [1.0, 2.0, 3.0]);
        assert_eq!(t.components(), [0.1, 0.2, 0.3, 0.9, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn ordered_by_follows_joint_order_and_fills_gaps() {
        let skeleton = chain();
        let moved = Transform::new([0.0, 0.0, 0.0, 1.0], [5.0, 5.0, 5.0]);
        let sample = PoseSample {
            frame: 3,
            time: 0.1,
            utc: 1.0,
            bones: BTreeMap::from([(0, Transform::IDENTITY), (2, moved)]),
        };

        let ordered = sample.ordered_by(&skeleton);

        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[0], Transform::IDENTITY);
        // bone 1 missing from the sample: rest transform
        assert_eq!(ordered[1].translation, [0.0, 1.0, 0.0]);
        assert_eq!(ordered[2], moved);
    }

    #[test]
    fn with_frame_keeps_payload() {
        let sample = PoseSample { frame: 7, time: 0.5, utc: 2.0, bones: BTreeMap::new() };
        let relabelled = sample.with_frame(599);
        assert_eq!(relabelled.frame, 599);
        assert_eq!(relabelled.utc, sample.utc);
    }
}
