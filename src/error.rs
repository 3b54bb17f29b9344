//! Error types for capture processing.
//!
//! Every failure in the ingest pipeline is reported through [`CaptureError`].
//! The variants map onto how the pipeline reacts to them:
//!
//! - **Per-datagram errors** (`MalformedPacket`, `UnrecognizedPacket`,
//!   `OrphanBone`, `Skeleton`): the datagram is discarded and the listener
//!   keeps running. No session state is touched.
//! - **Writer errors** (`Writer`, `File`): caught at the session worker
//!   boundary and logged. A failure during `close` means capture data for that
//!   session was lost and is reported loudly.
//! - **Startup errors** (`Bind`, `Config`): fatal for the process.
//!
//! ```rust
//! use smf_capture::CaptureError;
//!
//! let error = CaptureError::malformed(12, "box length exceeds remaining bytes");
//! assert!(error.is_recoverable());
//! assert!(error.to_string().contains("offset 12"));
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for capture operations.
pub type Result<T, E = CaptureError> = std::result::Result<T, E>;

/// Main error type for capture operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum CaptureError {
    #[error("Malformed packet at offset {offset}: {details}")]
    MalformedPacket { offset: usize, details: String },

    #[error("Packet matches neither skeleton nor pose shape")]
    UnrecognizedPacket,

    #[error("Bone {bone} references parent {parent} which is not part of the skeleton")]
    OrphanBone { bone: u16, parent: u16 },

    #[error("Invalid skeleton: {reason}")]
    Skeleton { reason: String },

    #[error("Writer failed during {operation} for session {session}")]
    Writer {
        session: String,
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Output file error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {reason}")]
    Config { reason: String },

    #[error("Failed to bind UDP socket on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Session for {peer} is already closed")]
    SessionClosed { peer: SocketAddr },
}

impl CaptureError {
    /// Returns whether the pipeline can continue after this error.
    ///
    /// Recoverable errors only cost the datagram or operation that raised them.
    pub fn is_recoverable(&self) -> bool {
        match self {
            CaptureError::MalformedPacket { .. } => true,
            CaptureError::UnrecognizedPacket => true,
            CaptureError::OrphanBone { .. } => true,
            CaptureError::Skeleton { .. } => true,
            CaptureError::Writer { .. } => true,
            CaptureError::File { .. } => true,
            CaptureError::SessionClosed { .. } => true,
            CaptureError::Config { .. } => false,
            CaptureError::Bind { .. } => false,
        }
    }

    /// Returns whether this error was raised while decoding a datagram.
    pub fn is_packet_error(&self) -> bool {
        matches!(
            self,
            CaptureError::MalformedPacket { .. }
                | CaptureError::UnrecognizedPacket
                | CaptureError::OrphanBone { .. }
                | CaptureError::Skeleton { .. }
        )
    }

    /// Helper constructor for malformed packet errors.
    pub fn malformed(offset: usize, details: impl Into<String>) -> Self {
        CaptureError::MalformedPacket { offset, details: details.into() }
    }

    /// Helper constructor for skeleton validation errors.
    pub fn invalid_skeleton(reason: impl Into<String>) -> Self {
        CaptureError::Skeleton { reason: reason.into() }
    }

    /// Helper constructor wrapping an error raised by a writer.
    pub fn writer_failure(
        session: impl Into<String>,
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        CaptureError::Writer { session: session.into(), operation, source: source.into() }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        CaptureError::File { path, source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        CaptureError::Config { reason: reason.into() }
    }
}

impl From<std::io::Error> for CaptureError {
    fn from(err: std::io::Error) -> Self {
        CaptureError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

impl From<serde_yaml_ng::Error> for CaptureError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        CaptureError::Config { reason: err.to_string() }
    }
}
