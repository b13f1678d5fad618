//! Stratum v1 message types and JSON-RPC serialization.
//!
//! Outbound requests are serde-serialized [`Request`]s. Inbound lines are
//! decoded once into a [`PoolMessage`]. Pools disagree on the details of
//! replies (null vs. missing fields, error shapes), so inbound messages are
//! classified structurally from a [`serde_json::Value`] rather than through
//! strict typed deserialization.

use std::fmt;

use bitcoin::block::Version;
use bitcoin::hashes::Hash;
use bitcoin::{BlockHash, CompactTarget, TxMerkleNode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use strum::FromRepr;

use super::error::{StratumError, StratumResult};
use crate::job::Share;
use crate::state::Subscription;

pub mod method {
    pub const SUBSCRIBE: &str = "mining.subscribe";
    pub const AUTHORIZE: &str = "mining.authorize";
    pub const SUGGEST_DIFFICULTY: &str = "mining.suggest_difficulty";
    pub const SUBMIT: &str = "mining.submit";
    pub const NOTIFY: &str = "mining.notify";
    pub const SET_DIFFICULTY: &str = "mining.set_difficulty";
}

/// Number of positional params in `mining.notify`.
const NOTIFY_PARAMS: usize = 9;

/// Client-to-pool JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    pub fn subscribe(id: u64, user_agent: &str) -> Self {
        Self::new(id, method::SUBSCRIBE, json!([user_agent, null]))
    }

    pub fn authorize(id: u64, username: &str, password: &str) -> Self {
        Self::new(id, method::AUTHORIZE, json!([username, password]))
    }

    pub fn suggest_difficulty(id: u64, difficulty: f64) -> Self {
        Self::new(id, method::SUGGEST_DIFFICULTY, json!([difficulty]))
    }

    pub fn submit(id: u64, params: &SubmitParams) -> Self {
        Self::new(id, method::SUBMIT, Value::Array(params.to_stratum_json()))
    }

    /// Serialize to a single JSON line, without the trailing newline.
    pub fn to_json(&self) -> StratumResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Mining job notification from pool (mining.notify).
#[derive(Debug, Clone, PartialEq)]
pub struct JobNotification {
    /// Unique job identifier
    pub job_id: String,

    /// Previous block hash
    pub prev_hash: BlockHash,

    /// First part of coinbase transaction (before extranonce)
    pub coinbase1: Vec<u8>,

    /// Second part of coinbase transaction (after extranonce)
    pub coinbase2: Vec<u8>,

    /// Merkle branch hashes for computing merkle root
    pub merkle_branches: Vec<TxMerkleNode>,

    /// Block version field
    pub version: Version,

    /// Encoded network target (nbits)
    pub nbits: CompactTarget,

    /// Block timestamp (Unix epoch seconds)
    pub ntime: u32,

    /// If true, abandon all previous jobs
    pub clean_jobs: bool,
}

impl JobNotification {
    /// Parse from the positional `mining.notify` params.
    ///
    /// Exactly nine params are required; anything else is a malformed job.
    pub fn from_stratum_params(params: &[Value]) -> Result<Self, String> {
        if params.len() != NOTIFY_PARAMS {
            return Err(format!(
                "mining.notify expects {} params, got {}",
                NOTIFY_PARAMS,
                params.len()
            ));
        }

        let job_id = params[0].as_str().ok_or("job_id not a string")?.to_string();
        let prev_hash = parse_block_hash(params[1].as_str().ok_or("prev_hash not a string")?)?;

        let coinbase1 = hex::decode(params[2].as_str().ok_or("coinbase1 not a string")?)
            .map_err(|e| format!("coinbase1 hex: {}", e))?;
        let coinbase2 = hex::decode(params[3].as_str().ok_or("coinbase2 not a string")?)
            .map_err(|e| format!("coinbase2 hex: {}", e))?;

        let merkle_branches = params[4]
            .as_array()
            .ok_or("merkle_branches not an array")?
            .iter()
            .map(|branch| parse_merkle_node(branch.as_str().ok_or("merkle branch not a string")?))
            .collect::<Result<Vec<_>, String>>()?;

        let version = Version::from_consensus(parse_hex_u32(&params[5], "version")? as i32);
        let nbits = CompactTarget::from_consensus(parse_hex_u32(&params[6], "nbits")?);
        let ntime = parse_hex_u32(&params[7], "ntime")?;
        let clean_jobs = params[8].as_bool().ok_or("clean_jobs not a bool")?;

        Ok(Self {
            job_id,
            prev_hash,
            coinbase1,
            coinbase2,
            merkle_branches,
            version,
            nbits,
            ntime,
            clean_jobs,
        })
    }
}

fn parse_hex_u32(value: &Value, field: &str) -> Result<u32, String> {
    let hex = value
        .as_str()
        .ok_or_else(|| format!("{} not a string", field))?;
    u32::from_str_radix(hex, 16).map_err(|e| format!("{} hex: {}", field, e))
}

/// Parse a block hash from Stratum hex string.
///
/// Stratum v1 sends the previous block hash as eight 4-byte words, each
/// written big-endian. Reversing the bytes within each word yields the
/// internal (wire) byte order.
fn parse_block_hash(hex: &str) -> Result<BlockHash, String> {
    let mut bytes = hex::decode(hex).map_err(|e| format!("block hash hex: {}", e))?;
    if bytes.len() != 32 {
        return Err(format!("block hash wrong length: {}", bytes.len()));
    }

    for chunk in bytes.chunks_mut(4) {
        chunk.reverse();
    }

    BlockHash::from_slice(&bytes).map_err(|e| format!("block hash parse: {}", e))
}

/// Parse a merkle node from Stratum hex string (internal byte order).
fn parse_merkle_node(hex: &str) -> Result<TxMerkleNode, String> {
    let bytes = hex::decode(hex).map_err(|e| format!("merkle node hex: {}", e))?;
    if bytes.len() != 32 {
        return Err(format!("merkle node wrong length: {}", bytes.len()));
    }
    TxMerkleNode::from_slice(&bytes).map_err(|e| format!("merkle node parse: {}", e))
}

/// Parameters for submitting a share to the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitParams {
    /// Wallet address the pool credits
    pub username: String,

    pub share: Share,
}

impl SubmitParams {
    /// Positional params: username, job id, extranonce2, ntime, nonce.
    pub fn to_stratum_json(&self) -> Vec<Value> {
        vec![
            Value::String(self.username.clone()),
            Value::String(self.share.job_id.clone()),
            Value::String(self.share.extranonce2.to_string()),
            Value::String(format!("{:08x}", self.share.ntime)),
            Value::String(format!("{:08x}", self.share.nonce)),
        ]
    }
}

/// Error codes pools put first in the `error` array.
#[derive(FromRepr, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i64)]
pub enum PoolErrorCode {
    Other = 20,
    JobNotFound = 21,
    DuplicateShare = 22,
    LowDifficulty = 23,
    Unauthorized = 24,
    NotSubscribed = 25,
}

/// Why the pool refused a share.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectReason {
    /// First element of the `error` array, if numeric
    pub code: Option<i64>,
    /// Second element of the `error` array, if a string
    pub message: Option<String>,
}

impl RejectReason {
    pub fn known_code(&self) -> Option<PoolErrorCode> {
        self.code.and_then(PoolErrorCode::from_repr)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, &self.message) {
            (Some(code), Some(message)) => write!(f, "{} ({})", message, code),
            (Some(code), None) => write!(f, "error {}", code),
            (None, Some(message)) => write!(f, "{}", message),
            (None, None) => write!(f, "unspecified"),
        }
    }
}

/// Request ids the decoder needs to tell replies apart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Correlation {
    pub authorize_id: Option<u64>,
    pub suggest_difficulty_id: Option<u64>,
}

/// A pool-to-client message, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum PoolMessage {
    /// Reply to `mining.subscribe`.
    Subscribed(Subscription),
    Notify(JobNotification),
    SetDifficulty(f64),
    /// Reply to `mining.authorize`.
    Authorized { authorized: bool },
    /// Reply to `mining.submit` with `result: true`.
    SubmitAccepted { id: Option<u64> },
    /// Reply to `mining.submit` refusing the share.
    SubmitRejected {
        id: Option<u64>,
        reason: RejectReason,
    },
    /// Anything else. The string says what it was, for the log.
    Unknown(String),
}

impl PoolMessage {
    /// Parse and classify one line from the pool.
    pub fn parse(line: &str, ids: &Correlation) -> StratumResult<Self> {
        let value: Value = serde_json::from_str(line)?;
        Self::decode(&value, ids)
    }

    /// Classify a JSON message.
    ///
    /// Rules, in order:
    /// 1. `result` is a non-empty array whose first element is a non-empty
    ///    array whose first element is a non-empty array: subscribe reply.
    ///    Any other non-empty array `result` is unknown.
    /// 2. Has `method`: notification, by method name.
    /// 3. Has `result`: reply, told apart by request id and result value.
    ///
    /// Recognized messages with the wrong params are errors; the caller logs
    /// and drops them.
    pub fn decode(value: &Value, ids: &Correlation) -> StratumResult<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| StratumError::InvalidMessage("not a JSON object".into()))?;

        if let Some(result) = obj.get("result").and_then(Value::as_array) {
            if !result.is_empty() {
                return if is_subscribe_shape(result) {
                    parse_subscribe(result).map(Self::Subscribed)
                } else {
                    Ok(Self::Unknown("array result".into()))
                };
            }
        }

        if let Some(method) = obj.get("method") {
            let method = method
                .as_str()
                .ok_or_else(|| StratumError::InvalidMessage("method not a string".into()))?;
            let params = obj
                .get("params")
                .and_then(Value::as_array)
                .ok_or_else(|| StratumError::MissingField(format!("{} params", method)))?;
            return match method {
                method::NOTIFY => JobNotification::from_stratum_params(params)
                    .map(Self::Notify)
                    .map_err(StratumError::InvalidMessage),
                method::SET_DIFFICULTY => parse_set_difficulty(params).map(Self::SetDifficulty),
                other => Ok(Self::Unknown(other.to_string())),
            };
        }

        if let Some(result) = obj.get("result") {
            let id = obj.get("id").and_then(Value::as_u64);
            let error = obj.get("error").and_then(Value::as_array);

            if id.is_some() && id == ids.authorize_id {
                return Ok(Self::Authorized {
                    authorized: result.as_bool() == Some(true),
                });
            }
            if id.is_some() && id == ids.suggest_difficulty_id {
                return Ok(Self::Unknown(format!("{} reply", method::SUGGEST_DIFFICULTY)));
            }
            if result.as_bool() == Some(true) {
                return Ok(Self::SubmitAccepted { id });
            }
            if result.as_bool() == Some(false) || error.is_some() {
                let reason = RejectReason {
                    code: error.and_then(|e| e.first()).and_then(Value::as_i64),
                    message: error
                        .and_then(|e| e.get(1))
                        .and_then(Value::as_str)
                        .map(str::to_string),
                };
                return Ok(Self::SubmitRejected { id, reason });
            }
            return Ok(Self::Unknown("empty reply".into()));
        }

        Ok(Self::Unknown("unrecognized message".into()))
    }
}

fn is_subscribe_shape(result: &[Value]) -> bool {
    result[0]
        .as_array()
        .and_then(|subscriptions| subscriptions.first())
        .and_then(Value::as_array)
        .is_some_and(|first| !first.is_empty())
}

/// `result: [[["mining.notify", <subscription id>], ...], extranonce1, extranonce2_size]`
fn parse_subscribe(result: &[Value]) -> StratumResult<Subscription> {
    let subscription_id = result[0][0][1]
        .as_str()
        .ok_or_else(|| StratumError::SubscriptionFailed("subscription id not a string".into()))?
        .to_string();
    let extranonce1 = result
        .get(1)
        .and_then(Value::as_str)
        .ok_or_else(|| StratumError::SubscriptionFailed("extranonce1 not a string".into()))?;
    let extranonce1 = hex::decode(extranonce1)
        .map_err(|e| StratumError::SubscriptionFailed(format!("extranonce1 hex: {}", e)))?;
    let extranonce2_size = result
        .get(2)
        .and_then(Value::as_u64)
        .ok_or_else(|| StratumError::SubscriptionFailed("extranonce2_size not a number".into()))?;

    Ok(Subscription {
        subscription_id,
        extranonce1,
        extranonce2_size,
    })
}

fn parse_set_difficulty(params: &[Value]) -> StratumResult<f64> {
    match params {
        [difficulty] => difficulty.as_f64().ok_or_else(|| {
            StratumError::InvalidMessage("mining.set_difficulty param not a number".into())
        }),
        _ => Err(StratumError::InvalidMessage(format!(
            "mining.set_difficulty expects 1 param, got {}",
            params.len()
        ))),
    }
}
