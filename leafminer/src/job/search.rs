//! Nonce space partitioning and search.

use std::sync::Arc;

use super::Job;
use crate::sha256d::hash_candidate;
use crate::state::JobState;

/// Nonces hashed between checks of job validity.
pub const BATCH_SIZE: u32 = 4096;

/// Inclusive range of nonces owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoncePartition {
    start: u32,
    end: u32,
}

impl NoncePartition {
    pub const FULL: Self = Self {
        start: 0,
        end: u32::MAX,
    };

    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: start.min(end),
            end: start.max(end),
        }
    }

    /// Contiguous slice `index` of `count` equal slices of the 32-bit space.
    /// The last slice absorbs the remainder.
    pub fn for_worker(index: usize, count: usize) -> Self {
        let count = count.max(1) as u64;
        let index = (index as u64).min(count - 1);
        let span = (u32::MAX as u64 + 1) / count;

        let start = index * span;
        let end = if index == count - 1 {
            u32::MAX as u64
        } else {
            start + span - 1
        };
        Self {
            start: start as u32,
            end: end as u32,
        }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> u64 {
        (self.end - self.start) as u64 + 1
    }

    pub fn contains(&self, nonce: u32) -> bool {
        (self.start..=self.end).contains(&nonce)
    }
}

/// Digest that passed the coarse filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub nonce: u32,
    pub digest: [u8; 32],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStep {
    /// A nonce passed the coarse filter.
    Found(Candidate),
    /// The batch ran out without a candidate.
    Continue,
    /// Every nonce in the partition has been tried.
    Exhausted,
}

/// Cursor over one job's nonces within a partition.
#[derive(Debug)]
pub struct NonceSearch {
    job: Arc<Job>,
    next: Option<u32>,
    end: u32,
}

impl NonceSearch {
    pub fn new(job: Arc<Job>, partition: NoncePartition) -> Self {
        Self {
            job,
            next: Some(partition.start),
            end: partition.end,
        }
    }

    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }

    /// Hash up to `batch` nonces, stopping at the first that passes the
    /// coarse filter. Every attempt is added to the shared hash counter.
    pub fn pickaxe(&mut self, batch: u32, state: &JobState) -> SearchStep {
        let midstate = *self.job.midstate();
        let mut tail = self.job.tail(0);
        let mut tried = 0u64;

        let step = loop {
            let Some(nonce) = self.next else {
                break SearchStep::Exhausted;
            };
            if tried == batch as u64 {
                break SearchStep::Continue;
            }

            self.next = if nonce == self.end {
                None
            } else {
                Some(nonce + 1)
            };
            tail[12..].copy_from_slice(&nonce.to_le_bytes());
            tried += 1;

            if let Some(digest) = hash_candidate(&midstate, &tail) {
                break SearchStep::Found(Candidate { nonce, digest });
            }
        };

        state.record_hashes(tried);
        step
    }
}
