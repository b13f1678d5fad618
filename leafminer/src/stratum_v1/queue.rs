//! Bounded queue of shares waiting to be submitted.
//!
//! Workers push, the session pops. A full queue refuses the new share
//! instead of blocking the hasher.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;

use crate::job::Share;
use crate::tracing::prelude::*;

pub const SUBMISSION_QUEUE_CAPACITY: usize = 10;

/// The share was dropped because the queue was full.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("submission queue full ({capacity} shares), dropped share for job {job_id}")]
pub struct QueueFull {
    pub capacity: usize,
    pub job_id: String,
}

#[derive(Debug)]
pub struct SubmissionQueue {
    shares: Mutex<VecDeque<Share>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl SubmissionQueue {
    pub fn new() -> Self {
        Self::with_capacity(SUBMISSION_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shares: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a share. On overflow the new share is dropped and logged;
    /// queued shares are untouched.
    pub fn push(&self, share: Share) -> Result<(), QueueFull> {
        let mut shares = self.shares.lock();
        if shares.len() >= self.capacity {
            drop(shares);
            self.dropped.fetch_add(1, Ordering::Relaxed);
            let err = QueueFull {
                capacity: self.capacity,
                job_id: share.job_id,
            };
            error!(job_id = %err.job_id, nonce = share.nonce, "{}", err);
            return Err(err);
        }
        shares.push_back(share);
        Ok(())
    }

    pub fn pop(&self) -> Option<Share> {
        self.shares.lock().pop_front()
    }

    /// Forget everything queued. Used when the session resets.
    pub fn clear(&self) -> usize {
        let mut shares = self.shares.lock();
        let count = shares.len();
        shares.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.shares.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shares dropped for lack of room since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for SubmissionQueue {
    fn default() -> Self {
        Self::new()
    }
}
