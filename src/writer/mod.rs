//! Animation writer contract
//!
//! Session workers never build output files themselves. They drive a
//! [`Writer`] through three calls and nothing else, so output formats can be
//! added without touching the pipeline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Result;
use crate::types::{PoseSample, Skeleton};

pub mod bvh;

pub use bvh::{BvhWriter, BvhWriterFactory};

/// Sink for one capture session.
///
/// Several bucket flushes of the same session may call `add_timesample`
/// concurrently, so implementations must keep their own output consistent.
#[async_trait::async_trait]
pub trait Writer: Send + Sync + 'static {
    /// Replace the skeleton. May arrive at any point before `close`, and repeated
    /// calls with identical content must have no further effect.
    async fn update_skeleton(&self, skeleton: &Skeleton) -> Result<()>;

    /// Append one pose frame. Frames of one bucket arrive in increasing order.
    async fn add_timesample(&self, sample: &PoseSample) -> Result<()>;

    /// Called exactly once after every bucket has been flushed. Must not return
    /// until all output is durably written.
    async fn close(&self, frame_rate: u32) -> Result<()>;
}

/// Identity of a capture session, passed to writer factories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub peer: SocketAddr,
    /// Process-unique session number; a reconnecting peer gets a new one
    pub id: u64,
    /// Unix time in seconds when the session opened
    pub started_at: u64,
}

impl SessionInfo {
    pub fn new(peer: SocketAddr, id: u64) -> Self {
        let started_at = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
        Self { peer, id, started_at }
    }

    /// File-system safe session title, e.g. `1718000000_192.168.1.20_50123_0`.
    pub fn title(&self) -> String {
        let ip = self.peer.ip().to_string().replace([':', '%'], "-");
        format!("{}_{}_{}_{}", self.started_at, ip, self.peer.port(), self.id)
    }
}

/// Creates one writer per session.
pub trait WriterFactory: Send + Sync + 'static {
    fn create(&self, session: &SessionInfo) -> Result<Arc<dyn Writer>>;
}

impl<F> WriterFactory for F
where
    F: Fn(&SessionInfo) -> Result<Arc<dyn Writer>> + Send + Sync + 'static,
{
    fn create(&self, session: &SessionInfo) -> Result<Arc<dyn Writer>> {
        self(session)
    }
}
