//! Mining daemon.
//!
//! Configured through `LEAFMINER_*` environment variables; see
//! [`leafminer::config::Config::from_env`].

use anyhow::Context;

use leafminer::config::Config;
use leafminer::daemon::Daemon;
use leafminer::tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing::init_journald_or_stdout();

    let config = Config::from_env().context("invalid configuration")?;

    Daemon::new(config).run().await.context("daemon failed")
}
