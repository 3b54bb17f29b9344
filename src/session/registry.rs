//! Session registry and packet router
//!
//! Maps each sender address to the queue of its worker. The map lock is held
//! only while looking up or creating an entry; pushes go to unbounded queues
//! and never wait, so the receive loop cannot stall on a slow session.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace};

use super::SessionReport;
use super::worker::SessionWorker;
use crate::config::CaptureConfig;
use crate::types::Packet;
use crate::writer::{SessionInfo, WriterFactory};
use crate::{CaptureError, Result};

/// Item on a session queue.
#[derive(Debug)]
pub enum SessionMessage {
    Packet(Packet),
    /// Finish the session now; anything still queued is discarded
    Stop,
}

#[derive(Clone)]
struct SessionHandle {
    id: u64,
    tx: UnboundedSender<SessionMessage>,
}

type SessionMap = Arc<Mutex<HashMap<SocketAddr, SessionHandle>>>;

/// A worker's way back to its own registry entry.
pub(crate) struct SessionLink {
    peer: SocketAddr,
    id: u64,
    sessions: SessionMap,
}

impl SessionLink {
    /// Remove the registry entry if it still belongs to this worker.
    pub(crate) fn detach(&self) {
        if remove_owned(&self.sessions, self.peer, self.id) {
            trace!(peer = %self.peer, "Session detached from registry");
        }
    }
}

fn remove_owned(sessions: &SessionMap, peer: SocketAddr, id: u64) -> bool {
    let Ok(mut sessions) = sessions.lock() else {
        return false;
    };
    if sessions.get(&peer).is_some_and(|handle| handle.id == id) {
        sessions.remove(&peer);
        return true;
    }
    false
}

/// Live sessions keyed by sender address.
pub struct SessionRegistry {
    config: Arc<CaptureConfig>,
    factory: Arc<dyn WriterFactory>,
    sessions: SessionMap,
    /// Bounds concurrent bucket flushes across every session
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    reports: Arc<Mutex<Vec<SessionReport>>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(config: Arc<CaptureConfig>, factory: Arc<dyn WriterFactory>) -> Self {
        let permits = Arc::new(Semaphore::new(config.flush_concurrency.max(1)));
        Self {
            config,
            factory,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            permits,
            tracker: TaskTracker::new(),
            reports: Arc::new(Mutex::new(Vec::new())),
            next_id: AtomicU64::new(0),
        }
    }

    /// Whether `peer` currently has a live session.
    pub fn contains(&self, peer: SocketAddr) -> bool {
        self.sessions.lock().map(|sessions| sessions.contains_key(&peer)).unwrap_or(false)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    /// Queue a classified packet on the session of `peer`, opening one if needed.
    ///
    /// A session that is tearing down may close its queue between lookup and
    /// push; the packet then opens a fresh session instead.
    pub fn route(&self, peer: SocketAddr, packet: Packet) -> Result<()> {
        let mut message = SessionMessage::Packet(packet);
        for _ in 0..2 {
            let handle = self.lookup_or_create(peer)?;
            match handle.tx.send(message) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    trace!(%peer, "Session queue closed, reopening");
                    message = returned;
                    remove_owned(&self.sessions, peer, handle.id);
                }
            }
        }
        Err(CaptureError::SessionClosed { peer })
    }

    /// Ask every live session to finish and wait until all of them have closed
    /// their writers. Returns the reports of every session that ever ran.
    pub async fn shutdown(&self) -> Vec<SessionReport> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .lock()
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default();

        info!(sessions = handles.len(), "Stopping capture sessions");
        for handle in handles {
            let _ = handle.tx.send(SessionMessage::Stop);
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.take_reports()
    }

    /// Reports of sessions finished so far.
    pub fn take_reports(&self) -> Vec<SessionReport> {
        self.reports.lock().map(|mut reports| std::mem::take(&mut *reports)).unwrap_or_default()
    }

    fn lookup_or_create(&self, peer: SocketAddr) -> Result<SessionHandle> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| CaptureError::SessionClosed { peer })?;
        if let Some(handle) = sessions.get(&peer) {
            return Ok(handle.clone());
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = SessionInfo::new(peer, id);
        let writer = self.factory.create(&info)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle { id, tx };

        let worker = SessionWorker::new(
            peer,
            info.title(),
            Arc::clone(&self.config),
            writer,
            Arc::clone(&self.permits),
        );
        let link = SessionLink { peer, id, sessions: Arc::clone(&self.sessions) };
        let reports = Arc::clone(&self.reports);
        self.tracker.spawn(async move {
            let report = worker.run(rx, link).await;
            if let Ok(mut reports) = reports.lock() {
                reports.push(report);
            }
        });

        debug!(%peer, id, "Opened session");
        sessions.insert(peer, handle.clone());
        Ok(handle)
    }
}
