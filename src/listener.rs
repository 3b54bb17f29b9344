//! UDP ingress listener
//!
//! Receives one datagram per event, decodes and classifies it, and hands the
//! result to the [`SessionRegistry`]. The loop never waits on session or
//! flush work; a bad datagram costs only itself.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::CaptureConfig;
use crate::session::{SessionRegistry, SessionReport};
use crate::smf::{parse_datagram, validate_preamble};
use crate::types::Packet;
use crate::writer::WriterFactory;
use crate::{CaptureError, Result};

/// Datagram counters of one listener run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub datagrams: u64,
    pub routed: u64,
    pub malformed: u64,
    pub unrecognized: u64,
    /// First datagrams refused for a missing preamble
    pub rejected: u64,
}

/// Outcome of a listener run.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub stats: ListenerStats,
    pub sessions: Vec<SessionReport>,
}

impl CaptureSummary {
    /// Sessions whose writer failed to close.
    pub fn failed_closes(&self) -> usize {
        self.sessions.iter().filter(|s| s.close_failed()).count()
    }
}

/// UDP socket plus the sessions fed from it.
pub struct Listener {
    socket: UdpSocket,
    config: Arc<CaptureConfig>,
    registry: SessionRegistry,
    stats: ListenerStats,
}

impl Listener {
    /// Bind the socket at `config.listen`.
    pub async fn bind(config: CaptureConfig, factory: Arc<dyn WriterFactory>) -> Result<Self> {
        config.validate()?;
        let addr = config.listen;
        let socket = UdpSocket::bind(addr).await.map_err(|source| CaptureError::Bind { addr, source })?;
        info!("Listening for SMF datagrams on {}", socket.local_addr().unwrap_or(addr));

        let config = Arc::new(config);
        let registry = SessionRegistry::new(Arc::clone(&config), factory);
        Ok(Self { socket, config, registry, stats: ListenerStats::default() })
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().map_err(|source| CaptureError::Bind { addr: self.config.listen, source })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Receive until `cancel` fires, then stop every session and wait for all
    /// writers to close.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<CaptureSummary> {
        let mut buf = vec![0u8; self.config.recv_buffer_size];

        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Listener cancelled");
                    break;
                }
                received = self.socket.recv_from(&mut buf) => received,
            };

            match received {
                Ok((len, peer)) => self.handle_datagram(&buf[..len], peer),
                Err(e) => {
                    // ICMP errors surface here on some platforms; the socket stays usable.
                    warn!("UDP receive failed: {}", e);
                }
            }
        }

        let sessions = self.registry.shutdown().await;
        let summary = CaptureSummary { stats: self.stats, sessions };
        info!(
            datagrams = summary.stats.datagrams,
            malformed = summary.stats.malformed,
            sessions = summary.sessions.len(),
            failed_closes = summary.failed_closes(),
            "Listener stopped"
        );
        Ok(summary)
    }

    fn handle_datagram(&mut self, bytes: &[u8], peer: SocketAddr) {
        self.stats.datagrams += 1;
        trace!(%peer, len = bytes.len(), "Datagram received");

        if self.config.strict_preamble && !self.registry.contains(peer) {
            if let Err(e) = validate_preamble(bytes) {
                self.stats.rejected += 1;
                warn!(%peer, "Refusing session without SMF preamble: {}", e);
                return;
            }
        }

        let packet = match parse_datagram(bytes) {
            Ok(Packet::Unrecognized) => {
                self.stats.unrecognized += 1;
                trace!(%peer, "Ignoring unrecognized datagram");
                return;
            }
            Ok(packet) => packet,
            Err(e) => {
                self.stats.malformed += 1;
                if e.is_packet_error() {
                    debug!(%peer, "Dropping datagram: {}", e);
                } else {
                    warn!(%peer, "Dropping datagram: {}", e);
                }
                return;
            }
        };

        match self.registry.route(peer, packet) {
            Ok(()) => self.stats.routed += 1,
            Err(e) => error!(%peer, "Could not route packet: {}", e),
        }
    }
}
