//! Per-sender capture sessions
//!
//! ```text
//! route(peer, packet) ──► SessionRegistry ──► queue ──► SessionWorker
//!                                                          │ full bucket
//!                                                          ▼
//!                                                       Flusher ──► Writer
//! ```
//!
//! A session opens on the first recognized packet from a new address and ends
//! after `idle_timeout_ms` without packets or on [`SessionRegistry::shutdown`].
//! On the way out the worker flushes every remaining bucket, waits for all
//! flushes, infers the frame rate and closes its writer exactly once.

pub mod buckets;
pub mod flusher;
pub mod frame_rate;
mod registry;
mod worker;

use std::net::SocketAddr;

pub use buckets::{Bucket, BucketBuffer};
pub use flusher::FlushTotals;
pub use frame_rate::{CANDIDATE_FRAME_RATES, infer_frame_rate};
pub use registry::{SessionMessage, SessionRegistry};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// No packet within the idle timeout
    Idle,
    /// Process-wide shutdown
    Stopped,
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub peer: SocketAddr,
    pub title: String,
    pub end: SessionEnd,
    /// Pose frames accepted into the buffer
    pub received: usize,
    /// Pose frames discarded: numbered below the session's first frame,
    /// late for an already flushed bucket, or evicted while waiting for a skeleton
    pub dropped: usize,
    /// Highest normalized frame number accepted
    pub last_frame: Option<u32>,
    pub flush: FlushTotals,
    pub frame_rate: u32,
    /// Set when the writer failed to close; the session's output is lost
    pub close_error: Option<String>,
}

impl SessionReport {
    pub fn close_failed(&self) -> bool {
        self.close_error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::CaptureConfig;
    use crate::test_utils::{
        RecordingFactory, RecordingWriter, WriterCall, mocopi_skeleton, sample_pose,
    };
    use crate::types::Packet;
    use crate::writer::{SessionInfo, Writer};

    const WAIT: Duration = Duration::from_secs(5);

    fn config(stride: u32, idle_timeout_ms: u64) -> Arc<CaptureConfig> {
        Arc::new(CaptureConfig { stride, idle_timeout_ms, ..CaptureConfig::default() })
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 7], port))
    }

    fn skeleton() -> Packet {
        Packet::Skeleton(mocopi_skeleton())
    }

    fn pose(frame: u32) -> Packet {
        Packet::Pose(sample_pose(frame, 27))
    }

    #[tokio::test]
    async fn idle_session_closes_writer_with_padded_final_bucket() {
        let _ = tracing_subscriber::fmt::try_init();
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(4, 100), factory.clone());
        let sender = peer(50000);

        registry.route(sender, skeleton()).unwrap();
        for frame in [1005, 1006, 1007] {
            registry.route(sender, pose(frame)).unwrap();
        }

        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await, "idle session was never closed");

        assert_eq!(writer.calls()[0], WriterCall::Skeleton(27));
        // Offsets normalized to zero; frame 3 duplicates frame 2.
        assert_eq!(writer.sample_frames(), vec![0, 1, 2, 3]);
        assert_eq!(writer.close_rate(), Some(60));
        assert!(!registry.contains(sender));

        let reports = registry.shutdown().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].end, SessionEnd::Idle);
        assert_eq!(reports[0].received, 3);
        assert_eq!(reports[0].last_frame, Some(2));
        assert!(!reports[0].close_failed());
    }

    #[tokio::test]
    async fn padding_can_be_disabled() {
        let factory = RecordingFactory::new();
        let config = Arc::new(CaptureConfig {
            stride: 4,
            idle_timeout_ms: 50,
            pad_final_bucket: false,
            ..CaptureConfig::default()
        });
        let registry = SessionRegistry::new(config, factory.clone());
        let sender = peer(50001);

        registry.route(sender, skeleton()).unwrap();
        for frame in [7, 8, 9] {
            registry.route(sender, pose(frame)).unwrap();
        }

        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await);
        assert_eq!(writer.sample_frames(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn poses_before_skeleton_are_buffered() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(2, 100), factory.clone());
        let sender = peer(50002);

        for frame in 0..4 {
            registry.route(sender, pose(frame)).unwrap();
        }
        registry.route(sender, skeleton()).unwrap();

        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await);

        let mut frames = writer.sample_frames();
        frames.sort_unstable();
        assert_eq!(frames, vec![0, 1, 2, 3]);
        assert_eq!(writer.calls()[0], WriterCall::Skeleton(27));
    }

    #[tokio::test]
    async fn session_without_skeleton_still_closes() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(600, 50), factory.clone());
        let sender = peer(50003);

        registry.route(sender, pose(10)).unwrap();
        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await);
        assert!(writer.sample_frames().is_empty());
        // A single timestamp cannot give a rate.
        assert_eq!(writer.close_rate(), Some(60));
    }

    #[tokio::test]
    async fn frames_below_offset_are_dropped() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(600, 50), factory.clone());
        let sender = peer(50004);

        registry.route(sender, skeleton()).unwrap();
        for frame in [100, 99, 101] {
            registry.route(sender, pose(frame)).unwrap();
        }
        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await);

        let reports = registry.shutdown().await;
        assert_eq!(reports[0].dropped, 1);
        assert_eq!(reports[0].received, 2);
        assert_eq!(writer.sample_frames(), vec![0, 1, 599]);
    }

    #[tokio::test]
    async fn late_duplicate_does_not_stall_later_buckets() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(4, 60_000), factory.clone());
        let sender = peer(50010);

        registry.route(sender, skeleton()).unwrap();
        for frame in 0..4 {
            registry.route(sender, pose(frame)).unwrap();
        }
        registry.route(sender, pose(1)).unwrap();
        for frame in 4..12 {
            registry.route(sender, pose(frame)).unwrap();
        }

        let writer = factory.writers_for(sender).remove(0);
        let deadline = tokio::time::Instant::now() + WAIT;
        while writer.sample_frames().len() < 12 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // Every full bucket reached the writer while the session was still open.
        assert_eq!(writer.close_rate(), None);
        let mut live = writer.sample_frames();
        live.sort_unstable();
        assert_eq!(live, (0..12).collect::<Vec<_>>());

        let reports = registry.shutdown().await;
        assert_eq!(reports[0].dropped, 1);
        assert_eq!(reports[0].received, 12);
        assert_eq!(reports[0].flush.buckets, 3);
        assert_eq!(writer.sample_frames().len(), 12);
    }

    #[tokio::test]
    async fn pending_poses_without_skeleton_are_bounded() {
        let factory = RecordingFactory::new();
        let config = Arc::new(CaptureConfig {
            stride: 2,
            idle_timeout_ms: 100,
            max_pending_frames: 4,
            ..CaptureConfig::default()
        });
        let registry = SessionRegistry::new(config, factory.clone());
        let sender = peer(50011);

        for frame in 0..10 {
            registry.route(sender, pose(frame)).unwrap();
        }
        registry.route(sender, skeleton()).unwrap();

        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await);

        let mut frames = writer.sample_frames();
        frames.sort_unstable();
        assert_eq!(frames, vec![6, 7, 8, 9]);

        let reports = registry.shutdown().await;
        assert_eq!(reports[0].received, 10);
        assert_eq!(reports[0].dropped, 6);
        assert_eq!(reports[0].last_frame, Some(9));
    }

    #[tokio::test]
    async fn last_frame_is_highest_under_reordering() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(600, 50), factory.clone());
        let sender = peer(50012);

        registry.route(sender, skeleton()).unwrap();
        for frame in [0, 5, 3] {
            registry.route(sender, pose(frame)).unwrap();
        }
        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await);

        let reports = registry.shutdown().await;
        assert_eq!(reports[0].last_frame, Some(5));
    }

    #[tokio::test]
    async fn repeated_skeleton_reaches_writer_once() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(600, 50), factory.clone());
        let sender = peer(50005);

        registry.route(sender, skeleton()).unwrap();
        registry.route(sender, skeleton()).unwrap();
        registry.route(sender, pose(0)).unwrap();
        registry.route(sender, skeleton()).unwrap();

        let writer = factory.writers_for(sender).remove(0);
        assert!(writer.wait_closed(WAIT).await);
        let skeletons = writer.calls().iter().filter(|c| matches!(c, WriterCall::Skeleton(_))).count();
        assert_eq!(skeletons, 1);
    }

    #[tokio::test]
    async fn interleaved_sessions_are_isolated() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(10, 150), factory.clone());
        let (a, b) = (peer(51000), peer(51001));

        registry.route(a, skeleton()).unwrap();
        registry.route(b, skeleton()).unwrap();
        for i in 0..20 {
            registry.route(a, pose(500 + i)).unwrap();
            registry.route(b, pose(9000 + i * 2)).unwrap();
        }
        assert_eq!(registry.active_sessions(), 2);

        let writer_a = factory.writers_for(a).remove(0);
        let writer_b = factory.writers_for(b).remove(0);
        assert!(writer_a.wait_closed(WAIT).await);
        assert!(writer_b.wait_closed(WAIT).await);

        let mut frames_a = writer_a.sample_frames();
        frames_a.sort_unstable();
        assert_eq!(frames_a, (0..20).collect::<Vec<_>>());

        let mut frames_b = writer_b.sample_frames();
        frames_b.sort_unstable();
        let mut expected_b: Vec<u32> = (0..20).map(|i| i * 2).collect();
        expected_b.extend([9, 19, 29, 39]);
        expected_b.sort_unstable();
        assert_eq!(frames_b, expected_b);

        assert_eq!(writer_a.close_rate(), Some(60));
        assert_eq!(writer_b.close_rate(), Some(30));
        assert_eq!(factory.session_count(), 2);
    }

    #[tokio::test]
    async fn writer_failures_do_not_stop_the_session() {
        let writer = RecordingWriter::failing_samples();
        let shared = Arc::clone(&writer);
        let factory = move |_: &SessionInfo| -> crate::Result<Arc<dyn Writer>> { Ok(shared.clone()) };
        let registry = SessionRegistry::new(config(2, 50), Arc::new(factory));
        let sender = peer(50006);

        registry.route(sender, skeleton()).unwrap();
        for frame in 0..5 {
            registry.route(sender, pose(frame)).unwrap();
        }
        assert!(writer.wait_closed(WAIT).await);

        let reports = registry.shutdown().await;
        assert_eq!(reports[0].received, 5);
        assert_eq!(reports[0].flush.buckets, 3);
        assert_eq!(reports[0].flush.written, 0);
        assert_eq!(reports[0].flush.failed, 6);
        assert!(!reports[0].close_failed());
    }

    #[tokio::test]
    async fn failed_close_is_reported() {
        let writer = RecordingWriter::failing_close();
        let shared = Arc::clone(&writer);
        let factory = move |_: &SessionInfo| -> crate::Result<Arc<dyn Writer>> { Ok(shared.clone()) };
        let registry = SessionRegistry::new(config(600, 50), Arc::new(factory));

        registry.route(peer(50007), skeleton()).unwrap();
        assert!(writer.wait_closed(WAIT).await);

        let reports = registry.shutdown().await;
        assert!(reports[0].close_failed());
    }

    #[tokio::test]
    async fn shutdown_drains_live_sessions() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(600, 60_000), factory.clone());
        let sender = peer(50008);

        registry.route(sender, skeleton()).unwrap();
        for frame in 0..10 {
            registry.route(sender, pose(frame)).unwrap();
        }

        let reports = tokio::time::timeout(WAIT, registry.shutdown()).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].end, SessionEnd::Stopped);
        assert_eq!(reports[0].received, 10);

        let writer = factory.writers_for(sender).remove(0);
        assert_eq!(writer.close_rate(), Some(60));
        assert_eq!(writer.sample_frames().len(), 11);
    }

    #[tokio::test]
    async fn returning_peer_opens_a_new_session() {
        let factory = RecordingFactory::new();
        let registry = SessionRegistry::new(config(600, 50), factory.clone());
        let sender = peer(50009);

        registry.route(sender, skeleton()).unwrap();
        let first = factory.writers_for(sender).remove(0);
        assert!(first.wait_closed(WAIT).await);

        registry.route(sender, skeleton()).unwrap();
        assert_eq!(factory.writers_for(sender).len(), 2);

        let reports = registry.shutdown().await;
        assert_eq!(reports.len(), 2);
        assert_ne!(reports[0].title, reports[1].title);
    }
}
