//! Background bucket flushes
//!
//! Each full (or final) bucket becomes one task that feeds its samples to the
//! session's writer. Tasks of one session live in a [`JoinSet`] so the worker
//! can await all of them before closing the writer. A semaphore shared by every
//! session bounds how many flushes run at once across the process.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::buckets::Bucket;
use crate::writer::Writer;

/// Outcome of one bucket flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    pub base: u32,
    pub written: usize,
    pub failed: usize,
}

/// Totals over every flush of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushTotals {
    pub buckets: usize,
    pub written: usize,
    pub failed: usize,
}

impl FlushTotals {
    fn add(&mut self, outcome: FlushOutcome) {
        self.buckets += 1;
        self.written += outcome.written;
        self.failed += outcome.failed;
    }
}

/// Per-session flush fan-out.
pub struct Flusher {
    peer: SocketAddr,
    writer: Arc<dyn Writer>,
    permits: Arc<Semaphore>,
    tasks: JoinSet<FlushOutcome>,
    totals: FlushTotals,
}

impl Flusher {
    pub fn new(peer: SocketAddr, writer: Arc<dyn Writer>, permits: Arc<Semaphore>) -> Self {
        Self { peer, writer, permits, tasks: JoinSet::new(), totals: FlushTotals::default() }
    }

    /// Hand a bucket to a background task. Never waits for the flush itself.
    pub fn submit(&mut self, bucket: Bucket) {
        self.reap();

        let peer = self.peer;
        let writer = Arc::clone(&self.writer);
        let permits = Arc::clone(&self.permits);
        debug!(%peer, base = bucket.base, samples = bucket.len(), "Submitting bucket flush");

        self.tasks.spawn(async move {
            // Held until every sample of the bucket reached the writer.
            let _permit = permits.acquire_owned().await.ok();
            flush_bucket(peer, writer.as_ref(), bucket).await
        });
    }

    /// Flushes submitted but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every submitted flush and return the session totals.
    pub async fn join_all(mut self) -> FlushTotals {
        while let Some(result) = self.tasks.join_next().await {
            self.collect(result);
        }
        self.totals
    }

    /// Collect flushes that already finished.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.collect(result);
        }
    }

    fn collect(&mut self, result: Result<FlushOutcome, tokio::task::JoinError>) {
        match result {
            Ok(outcome) => self.totals.add(outcome),
            Err(e) => error!(peer = %self.peer, "Bucket flush task failed: {}", e),
        }
    }
}

async fn flush_bucket(peer: SocketAddr, writer: &dyn Writer, bucket: Bucket) -> FlushOutcome {
    let mut outcome = FlushOutcome { base: bucket.base, ..Default::default() };

    for sample in &bucket.samples {
        match writer.add_timesample(sample).await {
            Ok(()) => outcome.written += 1,
            Err(e) => {
                outcome.failed += 1;
                warn!(%peer, frame = sample.frame, "Writer rejected pose sample: {}", e);
            }
        }
    }

    if outcome.failed > 0 {
        error!(%peer, base = bucket.base, failed = outcome.failed, "Bucket flushed with writer failures");
    } else {
        debug!(%peer, base = bucket.base, written = outcome.written, "Bucket flushed");
    }
    outcome
}
