//! Time-bucketed pose buffer

use std::collections::BTreeMap;

use crate::types::PoseSample;

/// A contiguous range of `stride` frames handed to the flusher as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// First frame of the range, a multiple of the stride
    pub base: u32,
    /// Samples sorted by frame number
    pub samples: Vec<PoseSample>,
}

impl Bucket {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Last frame slot of this bucket.
    pub fn final_slot(&self, stride: u32) -> u32 {
        self.base.saturating_add(stride - 1)
    }

    /// Duplicate the last sample into the bucket's final frame slot.
    ///
    /// Returns whether a sample was added. Full buckets and buckets that
    /// already hold their final frame are left alone.
    pub fn pad(&mut self, stride: u32) -> bool {
        let last_slot = self.final_slot(stride);
        match self.samples.last() {
            Some(last) if self.samples.len() < stride as usize && last.frame < last_slot => {
                let filler = last.with_frame(last_slot);
                self.samples.push(filler);
                true
            }
            _ => false,
        }
    }
}

/// Pose samples of one session grouped by `frame / stride * stride`.
#[derive(Debug)]
pub struct BucketBuffer {
    stride: u32,
    buckets: BTreeMap<u32, BTreeMap<u32, PoseSample>>,
    /// Highest key already handed out; its bucket and all before it are closed
    closed_through: Option<u32>,
    len: usize,
}

impl BucketBuffer {
    pub fn new(stride: u32) -> Self {
        Self { stride: stride.max(1), buckets: BTreeMap::new(), closed_through: None, len: 0 }
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Bucket key of a normalized frame number.
    pub fn key_of(&self, frame: u32) -> u32 {
        frame / self.stride * self.stride
    }

    /// Store a sample under its bucket. A repeated frame replaces the earlier sample.
    ///
    /// Returns `false` and discards the sample when its bucket was already
    /// popped, drained or evicted.
    pub fn insert(&mut self, sample: PoseSample) -> bool {
        let key = self.key_of(sample.frame);
        if self.closed_through.is_some_and(|closed| key <= closed) {
            return false;
        }
        if self.buckets.entry(key).or_default().insert(sample.frame, sample).is_none() {
            self.len += 1;
        }
        true
    }

    /// Highest bucket key no longer accepting samples.
    pub fn closed_through(&self) -> Option<u32> {
        self.closed_through
    }

    fn close_key(&mut self, key: u32) {
        self.closed_through = self.closed_through.max(Some(key));
    }

    /// Remove the oldest bucket if it holds `stride` samples.
    ///
    /// Only the smallest key is ever considered, so a full later bucket waits
    /// behind an incomplete earlier one and flushes stay in time order.
    pub fn pop_ready(&mut self) -> Option<Bucket> {
        let entry = self.buckets.first_entry()?;
        if entry.get().len() < self.stride as usize {
            return None;
        }
        let (base, samples) = entry.remove_entry();
        Some(self.close(base, samples))
    }

    /// Remove the oldest bucket whatever its fill.
    pub fn pop_oldest(&mut self) -> Option<Bucket> {
        let (base, samples) = self.buckets.pop_first()?;
        Some(self.close(base, samples))
    }

    /// Remove every bucket in key order, regardless of fill.
    pub fn drain(&mut self) -> Vec<Bucket> {
        std::mem::take(&mut self.buckets)
            .into_iter()
            .map(|(base, samples)| self.close(base, samples))
            .collect()
    }

    fn close(&mut self, base: u32, samples: BTreeMap<u32, PoseSample>) -> Bucket {
        self.close_key(base);
        self.len -= samples.len();
        Bucket { base, samples: samples.into_values().collect() }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Samples held across all buckets.
    pub fn sample_count(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
