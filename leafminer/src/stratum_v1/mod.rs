//! Stratum v1 mining protocol client.
//!
//! The protocol uses JSON-RPC over TCP with newline-delimited messages.
//!
//! # Protocol Overview
//!
//! Stratum v1 is a bidirectional, event-driven protocol:
//!
//! - **Client requests**: subscribe, authorize, suggest_difficulty, submit
//! - **Server notifications**: mining.notify (new work), mining.set_difficulty
//! - **Server responses**: Results for client requests (boolean or error array)
//!
//! # Architecture
//!
//! [`StratumSession`] is polled in passes rather than run as a free-standing
//! task, so the same code serves a dedicated session task and a single loop
//! that alternates between hashing and pool I/O. It talks to the pool through
//! a [`Transport`], and to the miners only through [`JobState`] and the
//! [`SubmissionQueue`].
//!
//! ```rust,ignore
//! let mut session = StratumSession::new(pool, TcpTransport::new(), state, queue);
//! loop {
//!     session.step().await?;
//! }
//! ```
//!
//! [`JobState`]: crate::state::JobState

mod connection;
mod error;
mod messages;
mod queue;
mod session;

pub use connection::{TcpTransport, Transport};
#[cfg(test)]
pub(crate) use connection::{MockTransport, MockTransportHandle};
pub use error::{StratumError, StratumResult};
pub use messages::{
    JobNotification, PoolErrorCode, PoolMessage, RejectReason, Request, SubmitParams,
};
pub use queue::{QueueFull, SubmissionQueue, SUBMISSION_QUEUE_CAPACITY};
pub use session::{SessionState, StratumSession, LISTEN_BUDGET, LISTEN_IDLE, USER_AGENT};
