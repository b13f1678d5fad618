//! Stratum v1 session: connection lifecycle and protocol state.
//!
//! The session is driven in passes. Each pass makes sure there is a
//! connection and a subscription, flushes queued shares, then listens for a
//! bounded time. Everything the pool says is decoded into a [`PoolMessage`]
//! and applied to the shared [`JobState`].
//!
//! Rejected shares are matched against `request_job_id`, the request id
//! taken when the newest job arrived. A rejection whose id is older belongs
//! to a job the pool already replaced and is ignored.

use std::sync::Arc;
use std::time::Duration;

use strum::Display;
use tokio::time::{sleep, Instant};

use super::connection::Transport;
use super::error::{StratumError, StratumResult};
use super::messages::{
    Correlation, JobNotification, PoolErrorCode, PoolMessage, RejectReason, Request, SubmitParams,
};
use super::queue::SubmissionQueue;
use crate::config::PoolConfig;
use crate::job::extranonce2::Extranonce2;
use crate::job::Job;
use crate::state::{JobState, Placement, Subscription};
use crate::tracing::prelude::*;
use crate::types::Difficulty;

/// Client id sent in `mining.subscribe`.
pub const USER_AGENT: &str = concat!("LeafMiner/", env!("CARGO_PKG_VERSION"));

pub const LINK_ATTEMPTS: u32 = 2;
pub const CONNECT_ATTEMPTS: u32 = 2;

/// Retry delay grows by this much per failed attempt.
pub const RETRY_DELAY_STEP: Duration = Duration::from_millis(500);

/// Listening stops after this long without a line.
pub const LISTEN_IDLE: Duration = Duration::from_secs(1);

/// Upper bound on one listen, however chatty the pool.
pub const LISTEN_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Disconnected,
    /// Bringing the network link up
    WifiConnecting,
    TcpConnecting,
    /// Connected, subscribe sent or pending
    Connected,
    Subscribed,
    Authorized,
    /// Authorized with a job to mine
    Active,
}

/// JSON-RPC id counter. Never yields 0; wraps from `u64::MAX` to 1.
#[derive(Debug)]
struct RequestIds {
    next: u64,
}

impl RequestIds {
    fn new() -> Self {
        Self { next: 1 }
    }

    fn next(&mut self) -> u64 {
        let id = self.next;
        self.next = if id == u64::MAX { 1 } else { id + 1 };
        id
    }
}

pub struct StratumSession<T> {
    config: PoolConfig,
    transport: T,
    state: Arc<JobState>,
    queue: Arc<SubmissionQueue>,
    phase: SessionState,
    ids: RequestIds,
    correlation: Correlation,
    subscribe_id: Option<u64>,

    /// Id taken when the newest job was installed
    request_job_id: u64,

    /// Next extranonce2 to hand to a job; known once subscribed
    extranonce2: Option<Extranonce2>,
}

impl<T: Transport> StratumSession<T> {
    pub fn new(
        config: PoolConfig,
        transport: T,
        state: Arc<JobState>,
        queue: Arc<SubmissionQueue>,
    ) -> Self {
        Self {
            config,
            transport,
            state,
            queue,
            phase: SessionState::Disconnected,
            ids: RequestIds::new(),
            correlation: Correlation::default(),
            subscribe_id: None,
            request_job_id: 0,
            extranonce2: None,
        }
    }

    pub fn phase(&self) -> SessionState {
        self.phase
    }

    pub fn request_job_id(&self) -> u64 {
        self.request_job_id
    }

    pub fn state(&self) -> &Arc<JobState> {
        &self.state
    }

    pub fn queue(&self) -> &Arc<SubmissionQueue> {
        &self.queue
    }

    /// One scheduling pass: get work, send shares, hear the pool out.
    pub async fn step(&mut self) -> StratumResult<()> {
        self.request_job().await?;
        self.flush_submissions().await?;
        self.listen(LISTEN_BUDGET).await?;
        Ok(())
    }

    /// Make sure work is on its way.
    ///
    /// Nothing to do while a valid job is being mined. Otherwise connect if
    /// needed and subscribe once per connection; jobs arrive on a later
    /// [`listen`](Self::listen).
    pub async fn request_job(&mut self) -> StratumResult<()> {
        if self.transport.is_connected() && self.state.has_valid_job() {
            return Ok(());
        }

        self.ensure_connected().await?;

        if self.subscribe_id.is_none() {
            let id = self.ids.next();
            let request = Request::subscribe(id, USER_AGENT);
            self.send(&request).await?;
            self.subscribe_id = Some(id);
            debug!(id, user_agent = USER_AGENT, "Sent subscribe");
        }
        Ok(())
    }

    /// Bring up the link and the TCP connection, each with bounded retries.
    ///
    /// Exhausting either resets the session and returns
    /// [`StratumError::ConnectionFailed`].
    pub async fn ensure_connected(&mut self) -> StratumResult<()> {
        if self.transport.is_connected() {
            return Ok(());
        }
        if self.phase != SessionState::Disconnected {
            self.reset_session();
        }

        self.phase = SessionState::WifiConnecting;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.link_up().await {
                Ok(()) => break,
                Err(e) if attempt < LINK_ATTEMPTS => {
                    warn!(attempt, error = %e, "Network link not up, retrying");
                    sleep(RETRY_DELAY_STEP * attempt).await;
                }
                Err(e) => {
                    error!(attempts = attempt, error = %e, "Network link unavailable");
                    self.reset_session();
                    return Err(StratumError::ConnectionFailed(format!(
                        "network link down after {} attempts: {}",
                        attempt, e
                    )));
                }
            }
        }

        self.phase = SessionState::TcpConnecting;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .transport
                .connect(&self.config.url, self.config.port)
                .await
            {
                Ok(()) => break,
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(attempt, error = %e, "Pool connection failed, retrying");
                    sleep(RETRY_DELAY_STEP * attempt).await;
                }
                Err(e) => {
                    error!(
                        pool = %self.config.url,
                        port = self.config.port,
                        attempts = attempt,
                        error = %e,
                        "Pool unreachable"
                    );
                    self.reset_session();
                    return Err(StratumError::ConnectionFailed(format!(
                        "{}:{} unreachable after {} attempts: {}",
                        self.config.url, self.config.port, attempt, e
                    )));
                }
            }
        }

        self.phase = SessionState::Connected;
        info!(pool = %self.config.url, port = self.config.port, "Connected to pool");
        Ok(())
    }

    /// Read and apply pool messages until the pool goes quiet for
    /// [`LISTEN_IDLE`] or `budget` runs out. Returns the number of lines
    /// handled.
    ///
    /// Queued shares are flushed after every line so replies are not held
    /// back by a long listen.
    pub async fn listen(&mut self, budget: Duration) -> StratumResult<usize> {
        if !self.transport.is_connected() {
            return Err(StratumError::NotConnected);
        }

        let deadline = Instant::now() + budget;
        let mut handled = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.transport.read_line(remaining.min(LISTEN_IDLE)).await {
                Ok(Some(line)) => {
                    self.handle_line(&line).await?;
                    handled += 1;
                    self.flush_submissions().await?;
                }
                Ok(None) => break,
                Err(StratumError::InvalidMessage(e)) => {
                    warn!(error = %e, "Dropping unreadable line from pool");
                }
                Err(e) => {
                    self.connection_lost(&e);
                    return Err(e);
                }
            }
        }

        Ok(handled)
    }

    /// Decode and apply one line. Malformed messages are logged and dropped.
    pub async fn handle_line(&mut self, line: &str) -> StratumResult<()> {
        match PoolMessage::parse(line, &self.correlation) {
            Ok(message) => self.apply(message).await,
            Err(e) => {
                warn!(error = %e, line, "Dropping malformed pool message");
                Ok(())
            }
        }
    }

    async fn apply(&mut self, message: PoolMessage) -> StratumResult<()> {
        match message {
            PoolMessage::Subscribed(subscription) => self.on_subscribed(subscription).await?,
            PoolMessage::Notify(notification) => self.on_notify(notification),
            PoolMessage::SetDifficulty(difficulty) => {
                let difficulty = Difficulty::new(difficulty);
                self.state.set_pool_difficulty(difficulty);
                info!(%difficulty, "Pool difficulty set");
            }
            PoolMessage::Authorized { authorized: true } => {
                self.phase = if self.state.has_valid_job() {
                    SessionState::Active
                } else {
                    SessionState::Authorized
                };
                info!(worker = %self.config.wallet_address, "Authorized");
            }
            PoolMessage::Authorized { authorized: false } => {
                error!(worker = %self.config.wallet_address, "Pool refused authorization");
            }
            PoolMessage::SubmitAccepted { id } => {
                self.state.record_accepted();
                let stats = self.state.stats();
                info!(
                    id = ?id,
                    accepted = stats.accepted,
                    rejected = stats.rejected,
                    "Share accepted"
                );
            }
            PoolMessage::SubmitRejected { id, reason } => self.on_rejected(id, &reason),
            PoolMessage::Unknown(what) => {
                warn!(message = %what, "Ignoring unrecognized pool message");
            }
        }
        Ok(())
    }

    async fn on_subscribed(&mut self, subscription: Subscription) -> StratumResult<()> {
        if self.phase != SessionState::Connected {
            warn!(phase = %self.phase, "Unexpected subscribe reply, ignoring");
            return Ok(());
        }

        let extranonce2 = match Extranonce2::new(subscription.extranonce2_size) {
            Ok(extranonce2) => extranonce2,
            Err(e) => {
                error!(error = %e, "Unusable subscribe reply");
                return Ok(());
            }
        };

        info!(
            subscription_id = %subscription.subscription_id,
            extranonce1 = %hex::encode(&subscription.extranonce1),
            extranonce2_size = subscription.extranonce2_size,
            "Subscribed"
        );
        self.extranonce2 = Some(extranonce2);
        self.state.set_subscription(subscription);
        self.phase = SessionState::Subscribed;

        let id = self.ids.next();
        self.correlation.authorize_id = Some(id);
        let authorize = Request::authorize(id, &self.config.wallet_address, &self.config.password);
        self.send(&authorize).await?;

        let id = self.ids.next();
        self.correlation.suggest_difficulty_id = Some(id);
        let suggest = Request::suggest_difficulty(id, self.config.suggested_difficulty);
        self.send(&suggest).await
    }

    fn on_notify(&mut self, notification: JobNotification) {
        if self.state.current_job_id().as_deref() == Some(notification.job_id.as_str()) {
            debug!(job_id = %notification.job_id, "Duplicate job, ignoring");
            return;
        }

        let (Some(subscription), Some(extranonce2)) =
            (self.state.subscription(), self.extranonce2.as_mut())
        else {
            warn!(job_id = %notification.job_id, "Job before subscription, ignoring");
            return;
        };

        let job_extranonce2 = *extranonce2;
        extranonce2.increment();

        let job_id = notification.job_id.clone();
        let clean_jobs = notification.clean_jobs;
        let job = Arc::new(Job::new(
            notification,
            subscription.extranonce1,
            job_extranonce2,
        ));

        let placement = self.state.install_job(job);
        if placement == Placement::Duplicate {
            debug!(job_id = %job_id, "Duplicate job, ignoring");
            return;
        }

        self.request_job_id = self.ids.next();
        if self.phase == SessionState::Authorized {
            self.phase = SessionState::Active;
        }
        info!(
            job_id = %job_id,
            clean_jobs,
            placement = ?placement,
            extranonce2 = %job_extranonce2,
            "New job"
        );
    }

    fn on_rejected(&mut self, id: Option<u64>, reason: &RejectReason) {
        // Missing ids can't be correlated, so they count as late
        if id.map_or(true, |id| id < self.request_job_id) {
            info!(id = ?id, %reason, "Rejection for a superseded job, ignoring");
            return;
        }

        self.state.record_rejected();

        if matches!(
            reason.known_code(),
            Some(PoolErrorCode::JobNotFound | PoolErrorCode::LowDifficulty)
        ) {
            let promoted = self.state.invalidate_current();
            warn!(
                id = ?id,
                %reason,
                promoted = ?promoted.as_ref().map(|job| job.id()),
                "Share rejected, current job invalidated"
            );
        } else {
            warn!(id = ?id, %reason, "Share rejected");
        }
    }

    /// Submit every queued share. Returns how many were sent.
    pub async fn flush_submissions(&mut self) -> StratumResult<usize> {
        if !self.transport.is_connected() || !self.is_subscribed() {
            return Ok(0);
        }

        let mut sent = 0;
        while let Some(share) = self.queue.pop() {
            let id = self.ids.next();
            let (job_id, nonce) = (share.job_id.clone(), share.nonce);
            let params = SubmitParams {
                username: self.config.wallet_address.clone(),
                share,
            };
            self.send(&Request::submit(id, &params)).await?;
            info!(id, job_id = %job_id, nonce = %format!("{:08x}", nonce), "Submitted share");
            sent += 1;
        }
        Ok(sent)
    }

    /// Drop the connection and everything tied to it: subscription, jobs,
    /// counters and unsent shares.
    pub fn reset_session(&mut self) {
        self.transport.disconnect();
        self.state.reset_session();

        let discarded = self.queue.clear();
        if discarded > 0 {
            warn!(discarded, "Discarded unsent shares");
        }

        self.phase = SessionState::Disconnected;
        self.correlation = Correlation::default();
        self.subscribe_id = None;
        self.extranonce2 = None;
    }

    fn is_subscribed(&self) -> bool {
        matches!(
            self.phase,
            SessionState::Subscribed | SessionState::Authorized | SessionState::Active
        )
    }

    async fn send(&mut self, request: &Request) -> StratumResult<()> {
        let line = request.to_json()?;
        let result = self.transport.send(&line).await;
        if let Err(e) = result {
            self.connection_lost(&e);
            return Err(e);
        }
        Ok(())
    }

    fn connection_lost(&mut self, error: &StratumError) {
        error!(error = %error, "Lost connection to pool");
        self.reset_session();
    }

    #[cfg(test)]
    fn seed_extranonce2(&mut self, value: u64) {
        if let Some(extranonce2) = self.extranonce2.as_mut() {
            *extranonce2 = Extranonce2::with_value(value, extranonce2.size() as u64).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    use serde_json::{json, Value};
    use test_case::test_case;

    use crate::job::search::NoncePartition;
    use crate::job::test_blocks::block_881423;
    use crate::stratum_v1::connection::{MockTransport, MockTransportHandle};
    use crate::worker::{MineOutcome, MiningWorker};

    const WALLET: &str = "bc1qwallet";

    fn pool_config() -> PoolConfig {
        PoolConfig {
            url: "pool.test".into(),
            port: 3333,
            wallet_address: WALLET.into(),
            password: "x".into(),
            suggested_difficulty: 0.0001,
        }
    }

    fn session() -> (StratumSession<MockTransport>, MockTransportHandle) {
        let (transport, handle) = MockTransport::pair();
        let session = StratumSession::new(
            pool_config(),
            transport,
            Arc::new(JobState::new()),
            Arc::new(SubmissionQueue::new()),
        );
        (session, handle)
    }

    fn subscribe_reply(id: u64) -> Value {
        json!({
            "id": id,
            "result": [
                [["mining.notify", "ae6812eb4cd7735a302a8a9dd95cf71f"]],
                block_881423::EXTRANONCE1,
                4
            ],
            "error": null
        })
    }

    fn notify(job_id: &str, clean_jobs: bool) -> Value {
        json!({
            "id": null,
            "method": "mining.notify",
            "params": block_881423::notify_params(job_id, clean_jobs),
        })
    }

    fn rejection(id: Option<u64>, code: i64) -> Value {
        json!({"id": id, "result": null, "error": [code, "rejected", null]})
    }

    /// Session past the subscribe reply, with the handshake requests drained.
    async fn subscribed() -> (StratumSession<MockTransport>, MockTransportHandle) {
        let (mut session, mut handle) = session();
        session.request_job().await.unwrap();
        let subscribe = handle.try_recv().unwrap();
        handle.send_json(subscribe_reply(subscribe["id"].as_u64().unwrap()));
        session.listen(LISTEN_BUDGET).await.unwrap();
        handle.drain();
        (session, handle)
    }

    async fn deliver(
        session: &mut StratumSession<MockTransport>,
        handle: &MockTransportHandle,
        messages: &[Value],
    ) {
        for message in messages {
            handle.send_json(message.clone());
        }
        session.listen(LISTEN_BUDGET).await.unwrap();
    }

    #[test]
    fn test_request_ids_wrap_to_one() {
        let mut ids = RequestIds { next: u64::MAX };
        assert_eq!(ids.next(), u64::MAX);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake() {
        let (mut session, mut handle) = session();

        session.request_job().await.unwrap();
        assert_eq!(session.phase(), SessionState::Connected);
        let subscribe = handle.try_recv().unwrap();
        assert_eq!(subscribe["method"], "mining.subscribe");
        assert_eq!(subscribe["params"], json!([USER_AGENT, null]));
        assert!(USER_AGENT.starts_with("LeafMiner/"));

        // Nothing is resent while waiting for the reply
        session.request_job().await.unwrap();
        assert!(handle.try_recv().is_none());

        deliver(
            &mut session,
            &handle,
            &[subscribe_reply(subscribe["id"].as_u64().unwrap())],
        )
        .await;
        assert_eq!(session.phase(), SessionState::Subscribed);
        let subscription = session.state().subscription().unwrap();
        assert_eq!(subscription.extranonce1, block_881423::extranonce1());
        assert_eq!(subscription.extranonce2_size, 4);

        let sent = handle.drain();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["method"], "mining.authorize");
        assert_eq!(sent[0]["params"], json!([WALLET, "x"]));
        assert_eq!(sent[1]["method"], "mining.suggest_difficulty");
        assert_eq!(sent[1]["params"], json!([0.0001]));

        // The suggest_difficulty reply is not a share result
        deliver(
            &mut session,
            &handle,
            &[
                json!({"id": sent[0]["id"], "result": true, "error": null}),
                json!({"id": sent[1]["id"], "result": true, "error": null}),
            ],
        )
        .await;
        assert_eq!(session.phase(), SessionState::Authorized);
        assert_eq!(session.state().stats().accepted, 0);

        deliver(&mut session, &handle, &[notify("a", true)]).await;
        assert_eq!(session.phase(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_authorization_stays_subscribed() {
        let (mut session, handle) = subscribed().await;

        // Request ids: subscribe 1, authorize 2
        deliver(
            &mut session,
            &handle,
            &[json!({"id": 2, "result": false, "error": [24, "Unauthorized worker", null]})],
        )
        .await;

        assert_eq!(session.phase(), SessionState::Subscribed);
        assert_eq!(session.state().stats().rejected, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_are_bounded() {
        let (mut session, handle) = session();
        handle.refuse_connections(true);
        let start = Instant::now();

        let result = session.request_job().await;

        assert!(matches!(result, Err(StratumError::ConnectionFailed(_))));
        assert_eq!(handle.link_attempts(), 1);
        assert_eq!(handle.connect_attempts(), CONNECT_ATTEMPTS as usize);
        assert_eq!(start.elapsed(), RETRY_DELAY_STEP);
        assert_eq!(session.phase(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_retries_are_bounded() {
        let (mut session, handle) = session();
        handle.refuse_link(true);

        let result = session.request_job().await;

        assert!(matches!(result, Err(StratumError::ConnectionFailed(_))));
        assert_eq!(handle.link_attempts(), LINK_ATTEMPTS as usize);
        assert_eq!(handle.connect_attempts(), 0);
        assert_eq!(session.phase(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_job_replaces_current() {
        let (mut session, handle) = subscribed().await;
        let state = session.state().clone();

        deliver(&mut session, &handle, &[notify("a", true), notify("b", false)]).await;
        assert_eq!(state.current_job_id().as_deref(), Some("a"));
        assert_eq!(state.next_job_id().as_deref(), Some("b"));

        deliver(&mut session, &handle, &[notify("c", true)]).await;

        assert!(state.has_valid_job());
        assert_eq!(state.current_job_id().as_deref(), Some("c"));
        assert_eq!(state.next_job_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_job_gets_the_next_extranonce2() {
        let (mut session, handle) = subscribed().await;
        let state = session.state().clone();

        deliver(&mut session, &handle, &[notify("a", true)]).await;
        let first = state.try_begin_search().unwrap().extranonce2;
        deliver(&mut session, &handle, &[notify("b", true)]).await;
        let second = state.try_begin_search().unwrap().extranonce2;

        assert_eq!(first.value() + 1, second.value());
        assert_eq!(second.size(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_job_is_dropped() {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true)]).await;
        let request_job_id = session.request_job_id();
        let job = session.state().try_begin_search().unwrap();

        deliver(&mut session, &handle, &[notify("a", true)]).await;

        assert_eq!(session.request_job_id(), request_job_id);
        assert!(session.state().is_current(&job));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_rejection_changes_nothing() {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true), notify("b", false)]).await;
        let late = session.request_job_id() - 1;

        deliver(
            &mut session,
            &handle,
            &[rejection(Some(late), 21), rejection(None, 21), rejection(Some(late), 23)],
        )
        .await;

        let state = session.state();
        assert!(state.has_valid_job());
        assert_eq!(state.current_job_id().as_deref(), Some("a"));
        assert_eq!(state.next_job_id().as_deref(), Some("b"));
        assert_eq!(state.stats().rejected, 0);
    }

    #[test_case(21; "job not found")]
    #[test_case(23; "low difficulty")]
    #[tokio::test(start_paused = true)]
    async fn test_rejection_promotes_next_job(code: i64) {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true), notify("b", false)]).await;
        let id = session.request_job_id() + 1;

        deliver(&mut session, &handle, &[rejection(Some(id), code)]).await;

        let state = session.state();
        assert!(state.has_valid_job());
        assert_eq!(state.current_job_id().as_deref(), Some("b"));
        assert_eq!(state.next_job_id(), None);
        assert_eq!(state.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_not_found_without_next_stops_mining() {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true)]).await;
        let id = session.request_job_id() + 1;

        deliver(&mut session, &handle, &[rejection(Some(id), 21)]).await;

        assert!(!session.state().has_valid_job());
        assert_eq!(session.state().stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_rejection_keeps_job() {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true)]).await;
        let id = session.request_job_id() + 1;

        deliver(&mut session, &handle, &[rejection(Some(id), 22)]).await;

        let state = session.state();
        assert!(state.has_valid_job());
        assert_eq!(state.current_job_id().as_deref(), Some("a"));
        assert_eq!(state.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_messages_are_dropped() {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true)]).await;
        let mut short_notify = notify("b", true);
        short_notify["params"].as_array_mut().unwrap().pop();

        handle.send("this is not json");
        deliver(
            &mut session,
            &handle,
            &[
                short_notify,
                json!({"id": null, "method": "mining.set_difficulty", "params": [1, 2]}),
                json!({"id": null, "method": "mining.set_version_mask", "params": ["1fffe000"]}),
            ],
        )
        .await;

        assert_eq!(session.phase(), SessionState::Subscribed);
        assert_eq!(session.state().current_job_id().as_deref(), Some("a"));
        assert_eq!(session.state().pool_difficulty(), Difficulty::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undecodable_line_keeps_session() {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true)]).await;
        let phase = session.phase();

        handle.send_undecodable();
        deliver(
            &mut session,
            &handle,
            &[json!({"id": null, "method": "mining.set_difficulty", "params": [2.0]})],
        )
        .await;

        assert_eq!(session.phase(), phase);
        assert!(session.state().has_valid_job());
        assert_eq!(session.state().current_job_id().as_deref(), Some("a"));
        assert!(session.state().subscription().is_some());
        // The line after the bad one was still read
        assert_eq!(session.state().pool_difficulty(), Difficulty::new(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_returns_when_pool_is_quiet() {
        let (mut session, _handle) = subscribed().await;
        let start = Instant::now();

        let handled = session.listen(LISTEN_BUDGET).await.unwrap();

        assert_eq!(handled, 0);
        assert_eq!(start.elapsed(), LISTEN_IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listen_is_bounded_for_a_chatty_pool() {
        let (mut session, handle) = subscribed().await;
        tokio::spawn(async move {
            loop {
                sleep(Duration::from_millis(500)).await;
                handle.send_json(json!({
                    "id": null, "method": "mining.set_difficulty", "params": [2.0]
                }));
            }
        });
        let start = Instant::now();

        let handled = session.listen(LISTEN_BUDGET).await.unwrap();

        assert!(handled >= 9);
        assert!(start.elapsed() >= LISTEN_BUDGET);
        assert!(start.elapsed() < LISTEN_BUDGET + LISTEN_IDLE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_resets_session() {
        let (mut session, handle) = subscribed().await;
        deliver(&mut session, &handle, &[notify("a", true)]).await;

        drop(handle);
        let result = session.listen(LISTEN_BUDGET).await;

        assert!(matches!(result, Err(StratumError::Disconnected)));
        assert_eq!(session.phase(), SessionState::Disconnected);
        assert!(!session.state().has_valid_job());
        assert!(session.state().subscription().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_share_accepted() {
        let (mut session, mut handle) = subscribed().await;
        session.seed_extranonce2(u32::from_le_bytes(block_881423::EXTRANONCE2) as u64);

        deliver(
            &mut session,
            &handle,
            &[
                notify("A", true),
                json!({"id": null, "method": "mining.set_difficulty", "params": [1.0]}),
            ],
        )
        .await;
        assert_eq!(session.state().current_job_id().as_deref(), Some("A"));

        let partition =
            NoncePartition::new(block_881423::NONCE - 1000, block_881423::NONCE + 1000);
        let mut worker = MiningWorker::new(
            0,
            partition,
            session.state().clone(),
            session.queue().clone(),
            Arc::new(AtomicBool::new(false)),
        );
        assert_eq!(worker.mine(None), MineOutcome::Submitted);

        assert_eq!(session.flush_submissions().await.unwrap(), 1);
        let submits: Vec<Value> = handle
            .drain()
            .into_iter()
            .filter(|m| m["method"] == "mining.submit")
            .collect();
        assert_eq!(submits.len(), 1);
        assert_eq!(
            submits[0]["params"],
            json!([WALLET, "A", "220cf1ad", "679ac169", "ff05fb02"])
        );

        deliver(
            &mut session,
            &handle,
            &[json!({"id": submits[0]["id"], "result": true, "error": null})],
        )
        .await;

        let stats = session.state().stats();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.rejected, 0);
        assert_eq!(stats.blocks_found, 1);
        assert!(handle.try_recv().is_none());
    }
}
