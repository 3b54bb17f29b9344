//! Classified datagram types

use super::{PoseSample, Skeleton};

/// A datagram after decoding and classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `skdf` skeleton definition
    Skeleton(Skeleton),
    /// `fram` pose frame
    Pose(PoseSample),
    /// Decoded cleanly but carries neither shape; dropped without a session
    Unrecognized,
}

impl Packet {
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::Skeleton(_) => "skeleton",
            Packet::Pose(_) => "pose",
            Packet::Unrecognized => "unrecognized",
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Packet::Unrecognized)
    }
}
