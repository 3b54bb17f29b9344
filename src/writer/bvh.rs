//! BVH (joint hierarchy + motion) writer
//!
//! Output layout for a session titled `T` under the output directory:
//!
//! ```text
//! T/
//!   fragments/<bucket>.part   motion lines of one bucket, removed on close
//!   main.bvh                  HIERARCHY + MOTION, written on close
//! ```
//!
//! Each bucket gets its own fragment file, so concurrent flushes of different
//! buckets never interleave lines. `close` concatenates the fragments in bucket
//! order behind the hierarchy and motion header.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use glam::{EulerRot, Quat};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{SessionInfo, Writer, WriterFactory};
use crate::types::{PoseSample, Skeleton, Transform, joint_name};
use crate::{CaptureError, Result};

/// Meters on the wire, centimeters in the file.
const UNIT_SCALE: f32 = 100.0;

const CHANNELS: &str = "CHANNELS 6 Xposition Yposition Zposition Zrotation Xrotation Yrotation";

struct Fragment {
    path: PathBuf,
    file: BufWriter<File>,
}

/// Writes one session to a `.bvh` file.
pub struct BvhWriter {
    dir: PathBuf,
    stride: u32,
    skeleton: StdMutex<Option<Arc<Skeleton>>>,
    fragments: Mutex<BTreeMap<u32, Arc<Mutex<Fragment>>>>,
    frames: AtomicU64,
    closed: AtomicBool,
}

impl BvhWriter {
    /// `stride` must match the session's bucket size so each bucket maps to one fragment.
    pub fn new<P: AsRef<Path>>(dir: P, stride: u32) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            stride: stride.max(1),
            skeleton: StdMutex::new(None),
            fragments: Mutex::new(BTreeMap::new()),
            frames: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Path of the merged output file.
    pub fn main_file(&self) -> PathBuf {
        self.dir.join("main.bvh")
    }

    fn fragments_dir(&self) -> PathBuf {
        self.dir.join("fragments")
    }

    fn current_skeleton(&self) -> Option<Arc<Skeleton>> {
        self.skeleton.lock().ok().and_then(|guard| guard.clone())
    }

    fn failure(&self, operation: &'static str, reason: &'static str) -> CaptureError {
        CaptureError::writer_failure(self.dir.display().to_string(), operation, reason)
    }

    async fn fragment(&self, base: u32) -> Result<Arc<Mutex<Fragment>>> {
        let mut fragments = self.fragments.lock().await;
        if let Some(fragment) = fragments.get(&base) {
            return Ok(Arc::clone(fragment));
        }

        let dir = self.fragments_dir();
        fs::create_dir_all(&dir).await.map_err(|e| CaptureError::file_error(dir.clone(), e))?;
        let path = dir.join(format!("{base:010}.part"));
        let file = File::create(&path).await.map_err(|e| CaptureError::file_error(path.clone(), e))?;
        debug!("Opened BVH fragment {}", path.display());

        let fragment = Arc::new(Mutex::new(Fragment { path, file: BufWriter::new(file) }));
        fragments.insert(base, Arc::clone(&fragment));
        Ok(fragment)
    }
}

#[async_trait::async_trait]
impl Writer for BvhWriter {
    async fn update_skeleton(&self, skeleton: &Skeleton) -> Result<()> {
        let mut current = self
            .skeleton
            .lock()
            .map_err(|_| self.failure("update_skeleton", "skeleton lock poisoned"))?;

        if current.as_deref() == Some(skeleton) {
            return Ok(());
        }
        if current.is_some() && self.frames.load(Ordering::Relaxed) > 0 {
            warn!("Skeleton changed after motion was written to {}", self.dir.display());
        }
        *current = Some(Arc::new(skeleton.clone()));
        Ok(())
    }

    async fn add_timesample(&self, sample: &PoseSample) -> Result<()> {
        let skeleton = self
            .current_skeleton()
            .ok_or_else(|| self.failure("add_timesample", "pose sample written before any skeleton"))?;

        let line = motion_line(&sample.ordered_by(&skeleton));
        let base = sample.frame / self.stride * self.stride;

        let fragment = self.fragment(base).await?;
        let mut fragment = fragment.lock().await;
        let Fragment { path, file } = &mut *fragment;
        file.write_all(line.as_bytes()).await.map_err(|e| CaptureError::file_error(path.clone(), e))?;

        self.frames.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&self, frame_rate: u32) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(self.failure("close", "writer already closed"));
        }

        let fragments = std::mem::take(&mut *self.fragments.lock().await);
        let Some(skeleton) = self.current_skeleton() else {
            if fragments.is_empty() {
                warn!("No skeleton or motion captured for {}, nothing written", self.dir.display());
                return Ok(());
            }
            return Err(self.failure("close", "motion captured without a skeleton"));
        };

        fs::create_dir_all(&self.dir).await.map_err(|e| CaptureError::file_error(self.dir.clone(), e))?;
        let main_path = self.main_file();
        let main = File::create(&main_path).await.map_err(|e| CaptureError::file_error(main_path.clone(), e))?;
        let mut out = BufWriter::new(main);

        let frames = self.frames.load(Ordering::Relaxed);
        let mut header = hierarchy(&skeleton);
        let _ = writeln!(header, "MOTION");
        let _ = writeln!(header, "Frames: {frames}");
        let _ = writeln!(header, "Frame Time: {}", 1.0 / f64::from(frame_rate.max(1)));
        out.write_all(header.as_bytes()).await.map_err(|e| CaptureError::file_error(main_path.clone(), e))?;

        for (_, fragment) in fragments {
            let mut fragment = fragment.lock().await;
            let Fragment { path, file } = &mut *fragment;
            file.flush().await.map_err(|e| CaptureError::file_error(path.clone(), e))?;
            let body = fs::read(&*path).await.map_err(|e| CaptureError::file_error(path.clone(), e))?;
            out.write_all(&body).await.map_err(|e| CaptureError::file_error(main_path.clone(), e))?;
            fs::remove_file(&*path).await.map_err(|e| CaptureError::file_error(path.clone(), e))?;
        }

        out.flush().await.map_err(|e| CaptureError::file_error(main_path.clone(), e))?;
        out.get_ref().sync_all().await.map_err(|e| CaptureError::file_error(main_path.clone(), e))?;
        let _ = fs::remove_dir(self.fragments_dir()).await;

        info!("Wrote {} frames at {}Hz to {}", frames, frame_rate, main_path.display());
        Ok(())
    }
}

/// Render the HIERARCHY section.
pub fn hierarchy(skeleton: &Skeleton) -> String {
    let mut out = String::from("HIERARCHY\n");
    write_joint(&mut out, skeleton, 0, 0);
    out
}

fn write_joint(out: &mut String, skeleton: &Skeleton, index: usize, depth: usize) {
    let indent = "  ".repeat(depth);
    let bone = &skeleton.joint_order()[index];
    let [x, y, z] = bone.rest.translation.map(|v| v * UNIT_SCALE);
    let kind = if bone.is_root() { "ROOT" } else { "JOINT" };

    let _ = writeln!(out, "{indent}{kind} {}", joint_name(bone.id));
    let _ = writeln!(out, "{indent}{{");
    let _ = writeln!(out, "{indent}  OFFSET {x} {y} {z}");
    let _ = writeln!(out, "{indent}  {CHANNELS}");

    let mut has_children = false;
    for child in skeleton.child_indices(index) {
        has_children = true;
        write_joint(out, skeleton, child, depth + 1);
    }
    if !has_children {
        let _ = writeln!(out, "{indent}  End Site");
        let _ = writeln!(out, "{indent}  {{");
        let _ = writeln!(out, "{indent}    OFFSET 0 0 0");
        let _ = writeln!(out, "{indent}  }}");
    }
    let _ = writeln!(out, "{indent}}}");
}

/// One MOTION line: position in centimeters then Z, X, Y rotation in degrees per joint.
pub fn motion_line(transforms: &[Transform]) -> String {
    let mut line = String::with_capacity(transforms.len() * 6 * 10);
    for (i, t) in transforms.iter().enumerate() {
        let [tx, ty, tz] = t.translation.map(|v| v * UNIT_SCALE);
        let (rz, rx, ry) = zxy_degrees(t.rotation);
        if i > 0 {
            line.push(' ');
        }
        let _ = write!(line, "{tx:.5} {ty:.5} {tz:.5} {rz:.5} {rx:.5} {ry:.5}");
    }
    line.push('\n');
    line
}

/// Decompose an x, y, z, w quaternion into intrinsic Z, X, Y angles in degrees.
fn zxy_degrees([x, y, z, w]: [f32; 4]) -> (f32, f32, f32) {
    let q = Quat::from_xyzw(x, y, z, w);
    let q = if q.length_squared() > f32::EPSILON { q.normalize() } else { Quat::IDENTITY };
    let (a, b, c) = q.to_euler(EulerRot::ZXY);
    (a.to_degrees(), b.to_degrees(), c.to_degrees())
}

/// Creates a [`BvhWriter`] per session under a common output directory.
#[derive(Debug, Clone)]
pub struct BvhWriterFactory {
    output_dir: PathBuf,
    stride: u32,
}

impl BvhWriterFactory {
    pub fn new<P: AsRef<Path>>(output_dir: P, stride: u32) -> Self {
        Self { output_dir: output_dir.as_ref().to_path_buf(), stride }
    }
}

impl WriterFactory for BvhWriterFactory {
    fn create(&self, session: &SessionInfo) -> Result<Arc<dyn Writer>> {
        Ok(Arc::new(BvhWriter::new(self.output_dir.join(session.title()), self.stride)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{mocopi_skeleton, sample_pose, scratch_dir};
    use crate::types::Bone;

    fn two_bone_skeleton() -> Skeleton {
        Skeleton::new(vec![
            Bone::new(0, crate::ROOT_PARENT_ID, Transform::new([0.0, 0.0, 0.0, 1.0], [0.0, 0.9, 0.0])),
            Bone::new(1, 0, Transform::new([0.0, 0.0, 0.0, 1.0], [0.0, 0.1, 0.0])),
        ])
        .unwrap()
    }

    #[test]
    fn hierarchy_nests_joints_and_end_sites() {
        let text = hierarchy(&two_bone_skeleton());
        let expected = [
            "HIERARCHY",
            "ROOT root",
            "{",
            "  OFFSET 0 90 0",
            "  CHANNELS 6 Xposition Yposition Zposition Zrotation Xrotation Yrotation",
            "  JOINT torso_1",
            "  {",
            "    OFFSET 0 10 0",
            "    CHANNELS 6 Xposition Yposition Zposition Zrotation Xrotation Yrotation",
            "    End Site",
            "    {",
            "      OFFSET 0 0 0",
            "    }",
            "  }",
            "}",
        ]
        .map(|line| format!("{line}\n"))
        .concat();
        assert_eq!(text, expected);
    }

    #[test]
    fn motion_line_scales_and_decomposes() {
        let half = std::f32::consts::FRAC_1_SQRT_2;
        // 90 degrees about Z
        let t = Transform::new([0.0, 0.0, half, half], [0.01, 0.02, 0.03]);
        let line = motion_line(&[t]);
        let values: Vec<f32> = line.split_whitespace().map(|v| v.parse().unwrap()).collect();

        assert_eq!(values.len(), 6);
        assert!((values[0] - 1.0).abs() < 1e-4);
        assert!((values[1] - 2.0).abs() < 1e-4);
        assert!((values[2] - 3.0).abs() < 1e-4);
        assert!((values[3] - 90.0).abs() < 1e-3);
        assert!(values[4].abs() < 1e-3);
        assert!(values[5].abs() < 1e-3);
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn degenerate_quaternion_is_identity() {
        assert_eq!(zxy_degrees([0.0, 0.0, 0.0, 0.0]), (0.0, 0.0, 0.0));
    }

    #[tokio::test]
    async fn merges_fragments_in_bucket_order() {
        let dir = scratch_dir("bvh_merge");
        let writer = BvhWriter::new(&dir, 2);
        let skeleton = mocopi_skeleton();
        writer.update_skeleton(&skeleton).await.unwrap();

        // later bucket written first
        for frame in [2, 3, 0, 1] {
            writer.add_timesample(&sample_pose(frame, 27)).await.unwrap();
        }
        writer.close(50).await.unwrap();

        let text = std::fs::read_to_string(writer.main_file()).unwrap();
        assert!(text.starts_with("HIERARCHY\nROOT root\n"));
        assert!(text.contains("MOTION\nFrames: 4\nFrame Time: 0.02\n"));

        let motion: Vec<&str> = text.split("Frame Time: 0.02\n").nth(1).unwrap().lines().collect();
        assert_eq!(motion.len(), 4);
        for (line, frame) in motion.iter().zip([0u32, 1, 2, 3]) {
            assert_eq!(*line, motion_line(&sample_pose(frame, 27).ordered_by(&skeleton)).trim_end());
        }
        assert!(!dir.join("fragments").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn frame_time_keeps_full_precision() {
        let dir = scratch_dir("bvh_frame_time");
        let writer = BvhWriter::new(&dir, 4);
        writer.update_skeleton(&mocopi_skeleton()).await.unwrap();
        writer.add_timesample(&sample_pose(0, 27)).await.unwrap();
        writer.close(60).await.unwrap();

        let text = std::fs::read_to_string(writer.main_file()).unwrap();
        let line = text.lines().find(|l| l.starts_with("Frame Time: ")).unwrap();
        let frame_time: f64 = line.trim_start_matches("Frame Time: ").parse().unwrap();
        assert_eq!(frame_time, 1.0 / 60.0);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn close_without_anything_writes_nothing() {
        let dir = scratch_dir("bvh_empty");
        let writer = BvhWriter::new(&dir, 600);
        writer.close(60).await.unwrap();
        assert!(!writer.main_file().exists());
        assert!(writer.close(60).await.is_err());
    }

    #[tokio::test]
    async fn samples_require_a_skeleton() {
        let writer = BvhWriter::new(scratch_dir("bvh_no_skeleton"), 600);
        assert!(writer.add_timesample(&sample_pose(0, 27)).await.is_err());
    }
}
