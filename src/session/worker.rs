//! Session worker
//!
//! Owns all state of one capture session: the current skeleton, the bucketed
//! pose buffer, the frame offset and the timestamp history. Nothing else ever
//! touches it, so none of it is locked.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, trace, warn};

use super::buckets::BucketBuffer;
use super::flusher::Flusher;
use super::frame_rate::infer_frame_rate;
use super::registry::{SessionLink, SessionMessage};
use super::{SessionEnd, SessionReport};
use crate::config::CaptureConfig;
use crate::types::{Packet, PoseSample, Skeleton};
use crate::writer::Writer;

pub(crate) struct SessionWorker {
    peer: SocketAddr,
    title: String,
    config: Arc<CaptureConfig>,
    writer: Arc<dyn Writer>,
    flusher: Flusher,
    skeleton: Option<Skeleton>,
    buffer: BucketBuffer,
    /// Raw number of the first pose frame, subtracted from every later frame
    offset: Option<u32>,
    last_frame: Option<u32>,
    utc: Vec<f64>,
    received: usize,
    dropped: usize,
}

impl SessionWorker {
    pub(crate) fn new(
        peer: SocketAddr,
        title: String,
        config: Arc<CaptureConfig>,
        writer: Arc<dyn Writer>,
        permits: Arc<Semaphore>,
    ) -> Self {
        let flusher = Flusher::new(peer, Arc::clone(&writer), permits);
        let buffer = BucketBuffer::new(config.stride);
        Self {
            peer,
            title,
            config,
            writer,
            flusher,
            skeleton: None,
            buffer,
            offset: None,
            last_frame: None,
            utc: Vec::new(),
            received: 0,
            dropped: 0,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut rx: UnboundedReceiver<SessionMessage>,
        link: SessionLink,
    ) -> SessionReport {
        info!(peer = %self.peer, session = %self.title, "Session started");
        let idle = self.config.idle_timeout();

        let end = loop {
            match tokio::time::timeout(idle, rx.recv()).await {
                Ok(Some(SessionMessage::Packet(packet))) => self.handle(packet).await,
                Ok(Some(SessionMessage::Stop)) => break SessionEnd::Stopped,
                Ok(None) | Err(_) => break SessionEnd::Idle,
            }
        };

        // New datagrams from this peer now open a fresh session.
        link.detach();
        rx.close();

        let mut leftovers = 0usize;
        while let Ok(message) = rx.try_recv() {
            if let SessionMessage::Packet(packet) = message {
                leftovers += 1;
                if end == SessionEnd::Idle {
                    self.handle(packet).await;
                }
            }
        }
        if leftovers > 0 {
            debug!(peer = %self.peer, leftovers, ?end, "Handled packets queued during teardown");
        }

        self.finish(end).await
    }

    async fn handle(&mut self, packet: Packet) {
        match packet {
            Packet::Skeleton(skeleton) => self.on_skeleton(skeleton).await,
            Packet::Pose(sample) => self.on_pose(sample),
            Packet::Unrecognized => {}
        }
    }

    async fn on_skeleton(&mut self, skeleton: Skeleton) {
        if self.skeleton.as_ref() == Some(&skeleton) {
            trace!(peer = %self.peer, "Skeleton unchanged");
            return;
        }

        if let Err(e) = self.writer.update_skeleton(&skeleton).await {
            error!(peer = %self.peer, "Writer rejected skeleton: {}", e);
        }
        debug!(peer = %self.peer, bones = skeleton.len(), replaced = self.skeleton.is_some(), "Skeleton set");
        self.skeleton = Some(skeleton);
        self.flush_ready();
    }

    fn on_pose(&mut self, mut sample: PoseSample) {
        let offset = *self.offset.get_or_insert(sample.frame);
        let Some(frame) = sample.frame.checked_sub(offset) else {
            self.dropped += 1;
            debug!(peer = %self.peer, raw = sample.frame, offset, "Dropping frame older than session start");
            return;
        };

        sample.frame = frame;
        let utc = sample.utc;
        if !self.buffer.insert(sample) {
            self.dropped += 1;
            debug!(peer = %self.peer, frame, "Dropping frame for an already flushed bucket");
            return;
        }

        self.last_frame = self.last_frame.max(Some(frame));
        self.utc.push(utc);
        self.received += 1;
        self.flush_ready();
        self.evict_pending();
    }

    /// Bound the poses held while no skeleton exists by dropping the oldest buckets.
    fn evict_pending(&mut self) {
        if self.skeleton.is_some() {
            return;
        }
        while self.buffer.sample_count() > self.config.max_pending_frames {
            let Some(bucket) = self.buffer.pop_oldest() else { break };
            self.dropped += bucket.len();
            warn!(
                peer = %self.peer,
                base = bucket.base,
                frames = bucket.len(),
                "No skeleton yet, dropping oldest pending bucket"
            );
        }
    }

    /// Submit every full bucket at the head of the buffer. Nothing is flushed
    /// before a skeleton exists.
    fn flush_ready(&mut self) {
        if self.skeleton.is_none() {
            return;
        }
        while let Some(bucket) = self.buffer.pop_ready() {
            self.flusher.submit(bucket);
        }
    }

    async fn finish(mut self, end: SessionEnd) -> SessionReport {
        let stride = self.buffer.stride();
        let remaining = self.buffer.drain();

        if self.skeleton.is_some() {
            for mut bucket in remaining {
                if self.config.pad_final_bucket && bucket.pad(stride) {
                    trace!(peer = %self.peer, base = bucket.base, "Padded under-full bucket");
                }
                self.flusher.submit(bucket);
            }
        } else {
            let discarded: usize = remaining.iter().map(|b| b.len()).sum();
            if discarded > 0 {
                warn!(peer = %self.peer, discarded, "Session ended without a skeleton, discarding poses");
            }
        }

        let in_flight = self.flusher.in_flight();
        if in_flight > 0 {
            debug!(peer = %self.peer, in_flight, "Waiting for bucket flushes");
        }
        let flush = self.flusher.join_all().await;

        let frame_rate = infer_frame_rate(&self.utc, self.config.fallback_frame_rate);
        let close_error = match self.writer.close(frame_rate).await {
            Ok(()) => None,
            Err(e) => {
                error!(peer = %self.peer, session = %self.title, "Writer close failed, capture data lost: {}", e);
                Some(e.to_string())
            }
        };

        info!(
            peer = %self.peer,
            session = %self.title,
            ?end,
            frames = self.received,
            buckets = flush.buckets,
            frame_rate,
            "Session finished"
        );

        SessionReport {
            peer: self.peer,
            title: self.title,
            end,
            received: self.received,
            dropped: self.dropped,
            last_frame: self.last_frame,
            flush,
            frame_rate,
            close_error,
        }
    }
}
