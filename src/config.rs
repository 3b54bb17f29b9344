//! Capture configuration
//!
//! All settings have defaults matching a stock mocopi setup, so an empty YAML
//! document is a valid configuration:
//!
//! ```yaml
//! listen: 0.0.0.0:12351
//! stride: 600              # frames per bucket
//! idle_timeout_ms: 1000    # session ends after this long without packets
//! flush_concurrency: 4     # bucket flushes running at once, process-wide
//! pad_final_bucket: true
//! max_pending_frames: 6000 # poses held while no skeleton has arrived
//! strict_preamble: false
//! fallback_frame_rate: 60
//! output_dir: captures
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{CaptureError, Result};

/// Default UDP port mocopi senders target.
pub const DEFAULT_PORT: u16 = 12351;

/// Settings for the listener, session workers, and output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    /// Address the UDP socket binds to
    pub listen: SocketAddr,
    /// Bucket size in frames
    pub stride: u32,
    /// Idle time after which a session is finalized
    pub idle_timeout_ms: u64,
    /// Upper bound on concurrently running bucket flushes
    pub flush_concurrency: usize,
    /// Duplicate the last sample of an under-full final bucket into its last slot
    pub pad_final_bucket: bool,
    /// Poses a session holds before its first skeleton; beyond this the oldest bucket is dropped
    pub max_pending_frames: usize,
    /// Refuse sessions whose first datagram lacks the SMF preamble
    pub strict_preamble: bool,
    /// Frame rate reported when it cannot be inferred
    pub fallback_frame_rate: u32,
    /// Directory session outputs are written under
    pub output_dir: PathBuf,
    /// Receive buffer size; datagrams longer than this are truncated by the OS
    pub recv_buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            stride: 600,
            idle_timeout_ms: 1000,
            flush_concurrency: 4,
            pad_final_bucket: true,
            max_pending_frames: 6000,
            strict_preamble: false,
            fallback_frame_rate: 60,
            output_dir: PathBuf::from("."),
            recv_buffer_size: 65_536,
        }
    }
}

impl CaptureConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CaptureConfig = if yaml.trim().is_empty() {
            CaptureConfig::default()
        } else {
            serde_yaml_ng::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| CaptureError::file_error(path.to_path_buf(), e))?;
        let config = Self::from_yaml(&yaml)?;
        debug!("Loaded capture config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.stride == 0 {
            return Err(CaptureError::config("stride must be at least 1 frame"));
        }
        if self.idle_timeout_ms == 0 {
            return Err(CaptureError::config("idle_timeout_ms must be positive"));
        }
        if self.flush_concurrency == 0 {
            return Err(CaptureError::config("flush_concurrency must be at least 1"));
        }
        if self.max_pending_frames == 0 {
            return Err(CaptureError::config("max_pending_frames must be at least 1"));
        }
        if self.fallback_frame_rate == 0 {
            return Err(CaptureError::config("fallback_frame_rate must be positive"));
        }
        if self.recv_buffer_size < 8 {
            return Err(CaptureError::config("recv_buffer_size cannot hold a box header"));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}
