//! Hashing workers.
//!
//! A [`MiningWorker`] owns one slice of the nonce space and searches the
//! current job within it. It never blocks on the pool: shares go into the
//! [`SubmissionQueue`] and job changes are noticed through [`JobState`]
//! between batches.
//!
//! [`WorkerPool`] runs one worker per OS thread. The cooperative daemon mode
//! drives a single worker directly with a deadline instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::job::search::{NoncePartition, NonceSearch, SearchStep, BATCH_SIZE};
use crate::state::{JobState, Verdict};
use crate::stratum_v1::SubmissionQueue;
use crate::tracing::prelude::*;

/// Sleep between polls when there is nothing to mine.
pub const IDLE_SLEEP: Duration = Duration::from_millis(100);

/// Why [`MiningWorker::mine`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MineOutcome {
    /// No valid job.
    Idle,
    /// A share was queued for submission.
    Submitted,
    /// The job being searched was replaced or invalidated.
    Abandoned,
    /// The partition has been fully searched for the current job.
    Exhausted,
    Shutdown,
    /// The deadline passed.
    Yielded,
}

pub struct MiningWorker {
    index: usize,
    partition: NoncePartition,
    state: Arc<JobState>,
    queue: Arc<SubmissionQueue>,
    shutdown: Arc<AtomicBool>,

    /// Kept across calls so a job is resumed, not restarted
    search: Option<NonceSearch>,
}

impl MiningWorker {
    pub fn new(
        index: usize,
        partition: NoncePartition,
        state: Arc<JobState>,
        queue: Arc<SubmissionQueue>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            index,
            partition,
            state,
            queue,
            shutdown,
            search: None,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn partition(&self) -> NoncePartition {
        self.partition
    }

    /// Search the current job until something worth reporting happens.
    ///
    /// Validity is re-checked after every batch of [`BATCH_SIZE`] nonces.
    /// At most one share is queued per call.
    pub fn mine(&mut self, deadline: Option<Instant>) -> MineOutcome {
        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return MineOutcome::Shutdown;
            }

            let Some(job) = self.state.try_begin_search() else {
                self.search = None;
                return MineOutcome::Idle;
            };

            let search = match &mut self.search {
                Some(search) if Arc::ptr_eq(search.job(), &job) => search,
                slot => {
                    debug!(
                        worker = self.index,
                        job_id = %job.id(),
                        start = self.partition.start(),
                        end = self.partition.end(),
                        "Starting job"
                    );
                    slot.insert(NonceSearch::new(job, self.partition))
                }
            };

            match search.pickaxe(BATCH_SIZE, &self.state) {
                SearchStep::Found(candidate) => {
                    let report = self.state.report_result(search.job(), &candidate);
                    if report.is_block {
                        info!(
                            worker = self.index,
                            job_id = %search.job().id(),
                            nonce = %format!("{:08x}", candidate.nonce),
                            difficulty = %report.difficulty,
                            "Block found"
                        );
                    }

                    match report.verdict {
                        Verdict::Submit(share) => {
                            info!(
                                worker = self.index,
                                job_id = %share.job_id,
                                nonce = %format!("{:08x}", share.nonce),
                                difficulty = %report.difficulty,
                                "Share found"
                            );
                            // A full queue logs and drops the share
                            let _ = self.queue.push(share);
                            return MineOutcome::Submitted;
                        }
                        Verdict::BelowPoolDifficulty => {}
                        Verdict::Stale => return MineOutcome::Abandoned,
                    }
                }
                SearchStep::Continue => {
                    trace!(worker = self.index, "Batch done");
                    if !self.state.is_current(search.job()) {
                        debug!(worker = self.index, job_id = %search.job().id(), "Job replaced");
                        return MineOutcome::Abandoned;
                    }
                }
                SearchStep::Exhausted => return MineOutcome::Exhausted,
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return MineOutcome::Yielded;
            }
        }
    }

    /// Thread body: mine until shutdown, napping while there is no work.
    fn run(mut self) {
        debug!(worker = self.index, "Worker started");
        loop {
            match self.mine(None) {
                MineOutcome::Shutdown => break,
                MineOutcome::Idle | MineOutcome::Exhausted => std::thread::sleep(IDLE_SLEEP),
                MineOutcome::Submitted | MineOutcome::Abandoned | MineOutcome::Yielded => {}
            }
        }
        debug!(worker = self.index, "Worker stopped");
    }
}

/// Hashing workers on dedicated OS threads, each with a disjoint partition.
pub struct WorkerPool {
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        count: usize,
        state: Arc<JobState>,
        queue: Arc<SubmissionQueue>,
    ) -> std::io::Result<Self> {
        let count = count.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            shutdown: shutdown.clone(),
            handles: Vec::with_capacity(count),
        };

        for index in 0..count {
            let worker = MiningWorker::new(
                index,
                NoncePartition::for_worker(index, count),
                state.clone(),
                queue.clone(),
                shutdown.clone(),
            );
            // On error, dropping the pool stops the workers already running
            let handle = std::thread::Builder::new()
                .name(format!("leafminer-worker-{}", index))
                .spawn(move || worker.run())?;
            pool.handles.push(handle);
        }

        info!(workers = count, "Mining workers started");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Ask every worker to stop at its next batch boundary.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stop the workers and wait for them to exit.
    pub fn join(mut self) {
        self.shutdown();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Mining worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
