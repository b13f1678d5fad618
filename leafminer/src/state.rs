//! Shared job and session state.
//!
//! One [`JobState`] exists per process. The Stratum session is the only
//! writer of job identity, validity, subscription and pool difficulty; mining
//! workers read the current job and write the statistics counters.
//!
//! Job slots live behind a single lock so a worker never sees a job without
//! its validity flag or a half-promoted next job. Counters are relaxed atomics;
//! they are telemetry, not consensus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::job::search::Candidate;
use crate::job::{Job, Share};
use crate::types::Difficulty;

/// Session identity from a successful `mining.subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub subscription_id: String,
    pub extranonce1: Vec<u8>,
    pub extranonce2_size: u64,
}

/// Where [`JobState::install_job`] put a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Became the current, mining-eligible job.
    Current,
    /// Queued behind a still-valid current job.
    Next,
    /// Same id as the current job; dropped.
    Duplicate,
}

/// Outcome of evaluating a search candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchReport {
    pub difficulty: Difficulty,
    pub is_block: bool,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Meets pool difficulty under a still-current job.
    Submit(Share),
    BelowPoolDifficulty,
    /// Meets pool difficulty, but the job was replaced or invalidated.
    Stale,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub hashes: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub blocks_found: u64,
    pub highest_difficulty: f64,
    pub pool_difficulty: f64,
}

#[derive(Debug, Default)]
struct Slots {
    current: Option<Arc<Job>>,
    next: Option<Arc<Job>>,
    valid: bool,
    subscription: Option<Subscription>,
}

#[derive(Debug, Default)]
struct Counters {
    hashes: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    blocks_found: AtomicU64,
    /// f64 bits
    highest_difficulty: AtomicU64,
}

#[derive(Debug, Default)]
pub struct JobState {
    slots: RwLock<Slots>,
    /// f64 bits
    pool_difficulty: AtomicU64,
    counters: Counters,
}

impl JobState {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current job, if it is valid to mine.
    pub fn try_begin_search(&self) -> Option<Arc<Job>> {
        let slots = self.slots.read();
        if slots.valid {
            slots.current.clone()
        } else {
            None
        }
    }

    /// Whether `job` is still the current, valid job.
    pub fn is_current(&self, job: &Arc<Job>) -> bool {
        let slots = self.slots.read();
        slots.valid && slots.current.as_ref().is_some_and(|c| Arc::ptr_eq(c, job))
    }

    pub fn has_valid_job(&self) -> bool {
        self.slots.read().valid
    }

    pub fn current_job_id(&self) -> Option<String> {
        self.slots.read().current.as_ref().map(|job| job.id().to_string())
    }

    pub fn next_job_id(&self) -> Option<String> {
        self.slots.read().next.as_ref().map(|job| job.id().to_string())
    }

    /// Place a newly notified job.
    ///
    /// Clean jobs replace the current job and discard any queued one. Other
    /// jobs wait in the next slot unless nothing valid is being mined.
    pub fn install_job(&self, job: Arc<Job>) -> Placement {
        let mut slots = self.slots.write();

        if slots.current.as_ref().is_some_and(|c| c.id() == job.id()) {
            return Placement::Duplicate;
        }

        if job.clean_jobs() {
            slots.next = None;
        } else if slots.valid {
            slots.next = Some(job);
            return Placement::Next;
        }

        slots.current = Some(job);
        slots.valid = true;
        Placement::Current
    }

    /// Invalidate the current job after a genuine rejection, promoting the
    /// queued job if there is one. Returns the promoted job.
    pub fn invalidate_current(&self) -> Option<Arc<Job>> {
        let mut slots = self.slots.write();
        slots.valid = false;

        let next = slots.next.take()?;
        slots.current = Some(next.clone());
        slots.valid = true;
        Some(next)
    }

    pub fn set_subscription(&self, subscription: Subscription) {
        self.slots.write().subscription = Some(subscription);
    }

    pub fn subscription(&self) -> Option<Subscription> {
        self.slots.read().subscription.clone()
    }

    /// Forget the session: subscription, both job slots and the counters.
    /// Pool difficulty is kept until the next `mining.set_difficulty`.
    pub fn reset_session(&self) {
        *self.slots.write() = Slots::default();

        let c = &self.counters;
        for counter in [
            &c.hashes,
            &c.accepted,
            &c.rejected,
            &c.blocks_found,
            &c.highest_difficulty,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn set_pool_difficulty(&self, difficulty: Difficulty) {
        self.pool_difficulty
            .store(difficulty.as_f64().to_bits(), Ordering::Release);
    }

    pub fn pool_difficulty(&self) -> Difficulty {
        Difficulty::new(f64::from_bits(self.pool_difficulty.load(Ordering::Acquire)))
    }

    /// Evaluate a candidate from searching `job`.
    ///
    /// Every candidate updates the highest difficulty seen and is checked
    /// against the network target. A share is only produced while `job` is
    /// still the current valid job.
    pub fn report_result(&self, job: &Arc<Job>, candidate: &Candidate) -> SearchReport {
        let difficulty = Difficulty::from_hash(&candidate.digest);
        self.record_difficulty(difficulty);

        let is_block = job.is_block(&candidate.digest);
        if is_block {
            self.counters.blocks_found.fetch_add(1, Ordering::Relaxed);
        }

        let verdict = if difficulty <= self.pool_difficulty() {
            Verdict::BelowPoolDifficulty
        } else if self.is_current(job) {
            Verdict::Submit(job.share(candidate.nonce))
        } else {
            Verdict::Stale
        };

        SearchReport {
            difficulty,
            is_block,
            verdict,
        }
    }

    pub fn record_hashes(&self, count: u64) {
        self.counters.hashes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_accepted(&self) {
        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.counters.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_difficulty(&self, difficulty: Difficulty) {
        let new = difficulty.as_f64();
        let _ = self.counters.highest_difficulty.fetch_update(
            Ordering::Relaxed,
            Ordering::Relaxed,
            |bits| (new > f64::from_bits(bits)).then_some(new.to_bits()),
        );
    }

    pub fn stats(&self) -> Stats {
        let c = &self.counters;
        Stats {
            hashes: c.hashes.load(Ordering::Relaxed),
            accepted: c.accepted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            blocks_found: c.blocks_found.load(Ordering::Relaxed),
            highest_difficulty: f64::from_bits(c.highest_difficulty.load(Ordering::Relaxed)),
            pool_difficulty: self.pool_difficulty().as_f64(),
        }
    }
}
