//! Core types for decoded capture data.
//!
//! - [`Skeleton`] is a validated bone tree built from an `skdf` packet
//! - [`PoseSample`] is one `fram` packet with per-bone [`Transform`]s keyed by bone id
//! - [`Packet`] is the classifier's verdict for one datagram
//!
//! Pose samples key transforms by bone id, not by position. Writers that expect
//! positional joint arrays reorder them with [`PoseSample::ordered_by`], which
//! follows the skeleton's depth-first [`Skeleton::joint_order`].
//!
//! ```rust
//! use smf_capture::types::{Bone, Skeleton, Transform};
//! use smf_capture::ROOT_PARENT_ID;
//!
//! let skeleton = Skeleton::new(vec![
//!     Bone::new(0, ROOT_PARENT_ID, Transform::IDENTITY),
//!     Bone::new(1, 0, Transform::IDENTITY),
//! ])
//! .unwrap();
//! assert_eq!(skeleton.joint_path(1), "/root/torso_1");
//! ```

mod packet;
mod pose;
mod skeleton;

pub use packet::Packet;
pub use pose::{PoseSample, Transform};
pub use skeleton::{Bone, Skeleton, joint_name};
