//! Test utilities: mocopi fixtures and a recording writer
//!
//! Compiled for unit tests and, behind the `benchmark` feature, for the
//! benchmarks. Integration tests under `tests/` build their own fixtures.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::writer::{SessionInfo, Writer, WriterFactory};
use crate::{Bone, CaptureError, PoseSample, ROOT_PARENT_ID, Result, Skeleton, Transform};

/// Parent id of every bone in the 27-bone mocopi rig, indexed by bone id.
const MOCOPI_PARENTS: [u16; 27] = [
    ROOT_PARENT_ID,
    0, 1, 2, 3, 4, 5, 6, // torso chain
    7, 8, 9, // neck, head
    7, 11, 12, 13, // left arm
    7, 15, 16, 17, // right arm
    0, 19, 20, 21, // left leg
    0, 23, 24, 25, // right leg
];

/// Bones of a mocopi skeleton in wire order (ids 0..=26).
pub fn mocopi_skeleton_bones() -> Vec<Bone> {
    MOCOPI_PARENTS
        .iter()
        .enumerate()
        .map(|(id, &parent)| {
            let id = id as u16;
            let offset = if id == 0 { [0.0, 0.9, 0.0] } else { [0.0, 0.05 + f32::from(id) * 0.001, 0.0] };
            Bone::new(id, parent, Transform::new([0.0, 0.0, 0.0, 1.0], offset))
        })
        .collect()
}

pub fn mocopi_skeleton() -> Skeleton {
    Skeleton::new(mocopi_skeleton_bones()).expect("mocopi fixture is a valid tree")
}

/// Deterministic pose for `frame` covering bone ids `0..bone_count`, sampled at 60 Hz.
pub fn sample_pose(frame: u32, bone_count: u16) -> PoseSample {
    let bones = (0..bone_count)
        .map(|id| {
            let half_angle = (frame as f32 * 0.01 + f32::from(id) * 0.1) / 2.0;
            let rotation = [0.0, half_angle.sin(), 0.0, half_angle.cos()];
            let translation = [f32::from(id) * 0.01, 0.9, frame as f32 * 0.001];
            (id, Transform::new(rotation, translation))
        })
        .collect::<BTreeMap<_, _>>();

    PoseSample {
        frame,
        time: frame as f32 / 60.0,
        utc: 1_700_000_000.0 + f64::from(frame) / 60.0,
        bones,
    }
}

/// Fresh, empty directory under the system temp dir.
pub fn scratch_dir(name: &str) -> PathBuf {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("smf-capture-{name}-{}-{unique}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// One observed writer call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriterCall {
    /// Skeleton update with this many bones
    Skeleton(usize),
    /// Pose sample with this (normalized) frame number
    Sample(u32),
    /// Close with this frame rate
    Close(u32),
}

/// Writer that records every call and can be told to fail.
#[derive(Default)]
pub struct RecordingWriter {
    calls: Mutex<Vec<WriterCall>>,
    fail_samples: AtomicBool,
    fail_close: AtomicBool,
    closed: Notify,
}

impl RecordingWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reject every `add_timesample` call.
    pub fn failing_samples() -> Arc<Self> {
        let writer = Self::default();
        writer.fail_samples.store(true, Ordering::SeqCst);
        Arc::new(writer)
    }

    /// Reject the `close` call.
    pub fn failing_close() -> Arc<Self> {
        let writer = Self::default();
        writer.fail_close.store(true, Ordering::SeqCst);
        Arc::new(writer)
    }

    pub fn calls(&self) -> Vec<WriterCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Frame numbers of every recorded sample in call order.
    pub fn sample_frames(&self) -> Vec<u32> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                WriterCall::Sample(frame) => Some(frame),
                _ => None,
            })
            .collect()
    }

    pub fn close_rate(&self) -> Option<u32> {
        self.calls().into_iter().find_map(|call| match call {
            WriterCall::Close(rate) => Some(rate),
            _ => None,
        })
    }

    /// Wait up to `timeout` for `close` to be called.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        if self.close_rate().is_some() {
            return true;
        }
        tokio::time::timeout(timeout, self.closed.notified()).await.is_ok() || self.close_rate().is_some()
    }

    fn record(&self, call: WriterCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

#[async_trait::async_trait]
impl Writer for RecordingWriter {
    async fn update_skeleton(&self, skeleton: &Skeleton) -> Result<()> {
        self.record(WriterCall::Skeleton(skeleton.len()));
        Ok(())
    }

    async fn add_timesample(&self, sample: &PoseSample) -> Result<()> {
        if self.fail_samples.load(Ordering::SeqCst) {
            return Err(CaptureError::writer_failure("recording", "add_timesample", "injected failure"));
        }
        self.record(WriterCall::Sample(sample.frame));
        Ok(())
    }

    async fn close(&self, frame_rate: u32) -> Result<()> {
        self.record(WriterCall::Close(frame_rate));
        self.closed.notify_one();
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(CaptureError::writer_failure("recording", "close", "injected failure"));
        }
        Ok(())
    }
}

/// Factory handing out [`RecordingWriter`]s and remembering them by peer.
#[derive(Default)]
pub struct RecordingFactory {
    writers: Mutex<Vec<(SocketAddr, Arc<RecordingWriter>)>>,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Writers created for `peer`, oldest first.
    pub fn writers_for(&self, peer: SocketAddr) -> Vec<Arc<RecordingWriter>> {
        self.writers
            .lock()
            .map(|writers| writers.iter().filter(|(p, _)| *p == peer).map(|(_, w)| Arc::clone(w)).collect())
            .unwrap_or_default()
    }

    pub fn session_count(&self) -> usize {
        self.writers.lock().map(|writers| writers.len()).unwrap_or(0)
    }
}

impl WriterFactory for RecordingFactory {
    fn create(&self, session: &SessionInfo) -> Result<Arc<dyn Writer>> {
        let writer = RecordingWriter::new();
        if let Ok(mut writers) = self.writers.lock() {
            writers.push((session.peer, Arc::clone(&writer)));
        }
        Ok(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mocopi_fixture_is_a_single_tree() {
        let skeleton = mocopi_skeleton();
        assert_eq!(skeleton.len(), 27);
        assert_eq!(skeleton.root().id, 0);
        assert_eq!(skeleton.joint_path(14), "/root/torso_1/torso_2/torso_3/torso_4/torso_5/torso_6/torso_7/l_shoulder/l_up_arm/l_low_arm/l_hand");
    }

    #[test]
    fn sample_pose_is_deterministic() {
        assert_eq!(sample_pose(42, 27), sample_pose(42, 27));
        assert_eq!(sample_pose(42, 5).bones.len(), 5);
    }

    #[test]
    fn scratch_dirs_are_unique() {
        assert_ne!(scratch_dir("a"), scratch_dir("a"));
    }
}
