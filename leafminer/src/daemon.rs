//! Daemon lifecycle management for leafminer.
//!
//! This module wires the pool session, the hashing workers and the telemetry
//! reporter together, and handles signals and graceful shutdown.
//!
//! Two scheduling modes are supported:
//!
//! - **Threaded**: a [`WorkerPool`] hashes on OS threads while the session
//!   runs in its own task. They share nothing but [`JobState`] and the
//!   submission queue.
//! - **Cooperative**: one worker and the session take turns in a single
//!   loop: hash for a slice, then submit and listen.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{self, SignalKind};
use tokio::time::sleep;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::config::{Config, MiningMode};
use crate::error::{Error, Result};
use crate::job::search::NoncePartition;
use crate::state::JobState;
use crate::stratum_v1::{
    StratumError, StratumResult, StratumSession, SubmissionQueue, TcpTransport, Transport,
    LISTEN_BUDGET,
};
use crate::telemetry::{run_reporter, LogSink};
use crate::tracing::prelude::*;
use crate::worker::{MineOutcome, MiningWorker, WorkerPool};

/// Pause between session passes in threaded mode.
pub const SESSION_PASS_DELAY: Duration = Duration::from_millis(100);

/// Wait before reconnecting after the pool session fails.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Hashing time per turn in cooperative mode.
pub const COOPERATIVE_SLICE: Duration = Duration::from_secs(1);

/// Listening time per turn in cooperative mode when no share was found.
pub const COOPERATIVE_LISTEN: Duration = Duration::from_millis(100);

/// The main daemon that coordinates all mining operations.
pub struct Daemon {
    config: Config,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Token that stops the daemon when cancelled, as a signal would.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run against the configured pool until shutdown is requested.
    pub async fn run(self) -> Result<()> {
        let session = StratumSession::new(
            self.config.pool.clone(),
            TcpTransport::new(),
            Arc::new(JobState::new()),
            Arc::new(SubmissionQueue::new()),
        );
        self.run_with(session).await
    }

    /// Run with a prepared session.
    ///
    /// Failing to reach the pool on the first pass is returned as an error
    /// rather than retried; later failures are retried with a back-off.
    pub async fn run_with<T>(self, mut session: StratumSession<T>) -> Result<()>
    where
        T: Transport + 'static,
    {
        info!(
            pool = %self.config.pool.url,
            port = self.config.pool.port,
            mode = %self.config.mode,
            workers = self.config.workers,
            "Starting"
        );

        session.request_job().await?;

        let state = session.state().clone();
        let queue = session.queue().clone();

        self.tracker.spawn(run_reporter(
            state.clone(),
            queue.clone(),
            Arc::new(LogSink),
            self.config.stats_interval(),
            self.shutdown.clone(),
        ));

        let workers = match self.config.mode {
            MiningMode::Threaded => {
                let pool = WorkerPool::spawn(self.config.workers, state, queue)?;
                self.tracker
                    .spawn(session_loop(session, self.shutdown.clone()));
                Some(pool)
            }
            MiningMode::Cooperative => {
                let worker = MiningWorker::new(
                    0,
                    NoncePartition::FULL,
                    state,
                    queue,
                    Arc::new(AtomicBool::new(false)),
                );
                self.tracker
                    .spawn(cooperative_loop(session, worker, self.shutdown.clone()));
                None
            }
        };
        self.tracker.close();

        info!("Started.");

        // Install signal handlers
        let mut sigint = unix::signal(SignalKind::interrupt())?;
        let mut sigterm = unix::signal(SignalKind::terminate())?;

        // Wait for shutdown signal
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            },
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            },
            _ = self.shutdown.cancelled() => {},
        }

        // Initiate shutdown
        trace!("Shutting down.");
        self.shutdown.cancel();

        if let Some(pool) = workers {
            tokio::task::spawn_blocking(move || pool.join())
                .await
                .map_err(|e| Error::Other(format!("worker shutdown failed: {}", e)))?;
        }

        // Wait for all tasks to complete
        self.tracker.wait().await;
        info!("Exiting.");

        Ok(())
    }
}

/// Threaded mode: drive the session in passes while workers hash elsewhere.
async fn session_loop<T: Transport>(mut session: StratumSession<T>, shutdown: CancellationToken) {
    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            result = session.step() => result,
        };

        if let Err(e) = result {
            if !back_off(&e, &shutdown).await {
                break;
            }
            continue;
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = sleep(SESSION_PASS_DELAY) => {},
        }
    }
    debug!("Session loop stopped");
}

/// Cooperative mode: one loop alternates between hashing and pool I/O.
async fn cooperative_loop<T: Transport>(
    mut session: StratumSession<T>,
    worker: MiningWorker,
    shutdown: CancellationToken,
) {
    let mut worker = Some(worker);
    while let Some(current) = worker.take() {
        let (returned, result) = tokio::select! {
            _ = shutdown.cancelled() => break,
            turn = cooperative_pass(&mut session, current) => turn,
        };
        worker = returned;

        if let Err(e) = result {
            if !back_off(&e, &shutdown).await {
                break;
            }
        }
    }
    debug!("Cooperative loop stopped");
}

/// One turn: make sure there is work, hash a slice, then submit and listen.
///
/// The worker hashes on a blocking thread and is handed back with the
/// outcome of the pool I/O. It is only lost if that thread panics.
async fn cooperative_pass<T: Transport>(
    session: &mut StratumSession<T>,
    mut worker: MiningWorker,
) -> (Option<MiningWorker>, StratumResult<()>) {
    if let Err(e) = session.request_job().await {
        return (Some(worker), Err(e));
    }

    if !session.state().has_valid_job() {
        let result = session.listen(LISTEN_BUDGET).await.map(|_| ());
        return (Some(worker), result);
    }

    let deadline = std::time::Instant::now() + COOPERATIVE_SLICE;
    let hashing = tokio::task::spawn_blocking(move || {
        let outcome = worker.mine(Some(deadline));
        (worker, outcome)
    });
    let (worker, outcome) = match hashing.await {
        Ok(done) => done,
        Err(e) => {
            error!(error = %e, "Hashing thread failed");
            return (None, Ok(()));
        }
    };
    trace!(outcome = ?outcome, "Slice done");

    let budget = if outcome == MineOutcome::Submitted {
        LISTEN_BUDGET
    } else {
        COOPERATIVE_LISTEN
    };
    (Some(worker), submit_and_listen(session, budget).await)
}

async fn submit_and_listen<T: Transport>(
    session: &mut StratumSession<T>,
    budget: Duration,
) -> StratumResult<()> {
    session.flush_submissions().await?;
    session.listen(budget).await?;
    Ok(())
}

/// Log a session failure and wait before the next attempt. Returns false if
/// shutdown was requested meanwhile.
async fn back_off(error: &StratumError, shutdown: &CancellationToken) -> bool {
    error!(
        error = %error,
        retry_in_secs = RECONNECT_BACKOFF.as_secs(),
        "Pool session failed"
    );
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = sleep(RECONNECT_BACKOFF) => true,
    }
}
