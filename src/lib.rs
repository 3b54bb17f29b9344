//! Concurrent UDP ingest of SMF motion-capture telemetry.
//!
//! mocopi-style senders stream skeleton definitions and pose frames as SMF
//! boxes over UDP. This crate decodes those datagrams, keeps one capture
//! session per sender address, buckets pose frames into fixed-size windows,
//! and streams them to a pluggable [`Writer`] in the background.
//!
//! # Layout
//!
//! - [`smf`]: box decoder, packet classifier, encoder and preamble check
//! - [`types`]: skeletons, pose samples and classified packets
//! - [`session`]: registry, per-session workers, bucket flushes, frame-rate inference
//! - [`listener`]: the UDP receive loop feeding the registry
//! - [`writer`]: the writer contract and the BVH writer
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use smf_capture::{BvhWriterFactory, CaptureConfig, Listener};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CaptureConfig::default();
//!     let factory = Arc::new(BvhWriterFactory::new("captures", config.stride));
//!     let listener = Listener::bind(config, factory).await?;
//!
//!     let cancel = CancellationToken::new();
//!     let summary = listener.run(cancel).await?;
//!     println!("{} sessions captured", summary.sessions.len());
//!     Ok(())
//! }
//! ```

pub mod config;
mod error;
pub mod listener;
pub mod session;
pub mod smf;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod writer;

pub use config::CaptureConfig;
pub use error::*;
pub use listener::{CaptureSummary, Listener, ListenerStats};
pub use session::{SessionEnd, SessionRegistry, SessionReport};
pub use smf::format::ROOT_PARENT_ID;
pub use smf::{parse_datagram, validate_preamble};
pub use types::*;
pub use writer::{BvhWriter, BvhWriterFactory, SessionInfo, Writer, WriterFactory};
