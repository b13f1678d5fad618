//! Stratum v1 CPU mining client.
//!
//! Jobs arrive from a pool over [`stratum_v1`], are bound to an extranonce2
//! and published through [`state::JobState`], and are searched by the
//! [`worker`]s. Shares found go back to the pool through the submission
//! queue. [`daemon`] wires it all together.

pub mod config;
pub mod daemon;
pub mod error;
pub mod job;
pub mod sha256d;
pub mod state;
pub mod stratum_v1;
pub mod telemetry;
pub mod tracing;
pub mod types;
pub mod worker;
