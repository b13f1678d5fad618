//! Configuration for leafminer.
//!
//! Everything comes from environment variables, read once at startup. The
//! loaded values are never written back.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{Error, Result};

pub const DEFAULT_PASSWORD: &str = "x";
pub const DEFAULT_SUGGESTED_DIFFICULTY: f64 = 0.0001;
pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_STATS_INTERVAL: u64 = 30;

/// Pool connection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool host name or address, without scheme or port
    pub url: String,

    pub port: u16,

    /// Payout address, sent as the Stratum username
    pub wallet_address: String,

    pub password: String,

    /// Sent in `mining.suggest_difficulty` after subscribing
    pub suggested_difficulty: f64,
}

/// How hashing and pool I/O share the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum MiningMode {
    /// One hashing thread per worker, pool session on its own task
    #[default]
    Threaded,
    /// Hashing and pool I/O take turns in a single loop
    Cooperative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub pool: PoolConfig,
    pub mode: MiningMode,

    /// Number of hashing workers (threaded mode)
    pub workers: usize,

    /// Seconds between statistics reports
    pub stats_interval: u64,
}

impl Config {
    /// Load configuration from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `LEAFMINER_WALLET`: payout address (required)
    /// - `LEAFMINER_POOL_URL`: pool host, optionally `stratum+tcp://host:port` (required)
    /// - `LEAFMINER_POOL_PORT`: pool port (required unless the URL has one)
    /// - `LEAFMINER_POOL_PASSWORD`: default `x`
    /// - `LEAFMINER_SUGGESTED_DIFFICULTY`: default 0.0001
    /// - `LEAFMINER_MODE`: `threaded` (default) or `cooperative`
    /// - `LEAFMINER_WORKERS`: default 2
    /// - `LEAFMINER_STATS_INTERVAL`: seconds, default 30
    pub fn from_env() -> Result<Self> {
        let wallet_address = required("LEAFMINER_WALLET")?;
        let (url, url_port) = parse_pool_url(&required("LEAFMINER_POOL_URL")?)?;

        let port = match optional("LEAFMINER_POOL_PORT") {
            Some(port) => parse("LEAFMINER_POOL_PORT", &port)?,
            None => url_port.ok_or_else(|| {
                Error::Config("LEAFMINER_POOL_PORT not set and pool URL has no port".into())
            })?,
        };
        if port == 0 {
            return Err(Error::Config("pool port must not be 0".into()));
        }

        let password = optional("LEAFMINER_POOL_PASSWORD").unwrap_or_else(|| DEFAULT_PASSWORD.into());

        let suggested_difficulty: f64 = optional("LEAFMINER_SUGGESTED_DIFFICULTY")
            .map(|v| parse("LEAFMINER_SUGGESTED_DIFFICULTY", &v))
            .transpose()?
            .unwrap_or(DEFAULT_SUGGESTED_DIFFICULTY);
        if !suggested_difficulty.is_finite() || suggested_difficulty <= 0.0 {
            return Err(Error::Config(format!(
                "LEAFMINER_SUGGESTED_DIFFICULTY must be positive, got {}",
                suggested_difficulty
            )));
        }

        let mode = optional("LEAFMINER_MODE")
            .map(|v| parse("LEAFMINER_MODE", &v))
            .transpose()?
            .unwrap_or_default();

        let workers = optional("LEAFMINER_WORKERS")
            .map(|v| parse("LEAFMINER_WORKERS", &v))
            .transpose()?
            .unwrap_or(DEFAULT_WORKERS);
        if workers == 0 {
            return Err(Error::Config("LEAFMINER_WORKERS must be at least 1".into()));
        }

        let stats_interval = optional("LEAFMINER_STATS_INTERVAL")
            .map(|v| parse("LEAFMINER_STATS_INTERVAL", &v))
            .transpose()?
            .unwrap_or(DEFAULT_STATS_INTERVAL)
            .max(1);

        Ok(Self {
            pool: PoolConfig {
                url,
                port,
                wallet_address,
                password,
                suggested_difficulty,
            },
            mode,
            workers,
            stats_interval,
        })
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval)
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &str) -> Result<String> {
    optional(name).ok_or_else(|| Error::Config(format!("{} is required", name)))
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::Config(format!("{}={:?}: {}", name, value, e)))
}

/// Split a pool address into host and optional port.
///
/// Accepts `host`, `host:port`, and either form behind `stratum+tcp://` or
/// `tcp://`.
pub fn parse_pool_url(url: &str) -> Result<(String, Option<u16>)> {
    let rest = url
        .strip_prefix("stratum+tcp://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url)
        .trim_end_matches('/');

    if rest.contains("://") {
        return Err(Error::Config(format!("unsupported pool URL scheme: {}", url)));
    }

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, Some(parse("pool URL port", port)?)),
        None => (rest, None),
    };

    if host.is_empty() {
        return Err(Error::Config(format!("pool URL has no host: {}", url)));
    }
    Ok((host.to_string(), port))
}
