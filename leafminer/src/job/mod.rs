//! Mining jobs and header construction.
//!
//! A [`Job`] is a pool template (`mining.notify`) bound to the session's
//! extranonce1 and one extranonce2 value. Binding fixes the coinbase, hence
//! the merkle root, hence the whole header except the nonce. The header's first
//! block is compressed once here so searches only hash the tail.

pub mod extranonce2;
pub mod search;

#[cfg(test)]
pub(crate) mod test_blocks;

use bitcoin::block::Header as BlockHeader;
use bitcoin::hash_types::TxMerkleNode;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::pow::Target;

use crate::sha256d::{compute_midstate, Midstate};
use crate::stratum_v1::JobNotification;
use extranonce2::Extranonce2;

/// Work template bound to a concrete coinbase.
#[derive(Debug, Clone)]
pub struct Job {
    /// Template as received from the pool
    pub notification: JobNotification,

    /// Session-scoped extranonce1 from the subscribe reply
    pub extranonce1: Vec<u8>,

    /// Miner-chosen extranonce2 for this job
    pub extranonce2: Extranonce2,

    /// Serialized header with a zero nonce
    pub header: [u8; 80],

    /// Network target expanded from nbits
    pub target: Target,

    midstate: Midstate,
}

impl Job {
    pub fn new(
        notification: JobNotification,
        extranonce1: Vec<u8>,
        extranonce2: Extranonce2,
    ) -> Self {
        let (header, target) = build_header(&notification, &extranonce1, &extranonce2);

        let mut first_block = [0u8; 64];
        first_block.copy_from_slice(&header[..64]);
        let midstate = compute_midstate(&first_block);

        Self {
            notification,
            extranonce1,
            extranonce2,
            header,
            target,
            midstate,
        }
    }

    pub fn id(&self) -> &str {
        &self.notification.job_id
    }

    pub fn clean_jobs(&self) -> bool {
        self.notification.clean_jobs
    }

    pub fn midstate(&self) -> &Midstate {
        &self.midstate
    }

    /// Last 16 header bytes with `nonce` filled in.
    pub fn tail(&self, nonce: u32) -> [u8; 16] {
        let mut tail = [0u8; 16];
        tail.copy_from_slice(&self.header[64..]);
        tail[12..].copy_from_slice(&nonce.to_le_bytes());
        tail
    }

    /// Whether a digest (little-endian) is below the network target.
    pub fn is_block(&self, digest: &[u8; 32]) -> bool {
        Target::from_le_bytes(*digest) < self.target
    }

    /// Share for a nonce solving this job.
    pub fn share(&self, nonce: u32) -> Share {
        Share {
            job_id: self.notification.job_id.clone(),
            extranonce2: self.extranonce2,
            ntime: self.notification.ntime,
            nonce,
        }
    }
}

/// Solved work waiting to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub job_id: String,
    pub extranonce2: Extranonce2,
    pub ntime: u32,
    pub nonce: u32,
}

/// Assemble the header (nonce zero) and the network target for a template.
pub fn build_header(
    notification: &JobNotification,
    extranonce1: &[u8],
    extranonce2: &Extranonce2,
) -> ([u8; 80], Target) {
    let coinbase = coinbase_hash(
        &notification.coinbase1,
        extranonce1,
        extranonce2,
        &notification.coinbase2,
    );

    let header = BlockHeader {
        version: notification.version,
        prev_blockhash: notification.prev_hash,
        merkle_root: merkle_root(coinbase, &notification.merkle_branches),
        time: notification.ntime,
        bits: notification.nbits,
        nonce: 0,
    };

    (serialize_header(&header), Target::from_compact(notification.nbits))
}

/// Double hash of coinbase1 ‖ extranonce1 ‖ extranonce2 ‖ coinbase2.
pub fn coinbase_hash(
    coinbase1: &[u8],
    extranonce1: &[u8],
    extranonce2: &Extranonce2,
    coinbase2: &[u8],
) -> sha256d::Hash {
    let mut coinbase = Vec::with_capacity(
        coinbase1.len() + extranonce1.len() + extranonce2.size() as usize + coinbase2.len(),
    );
    coinbase.extend_from_slice(coinbase1);
    coinbase.extend_from_slice(extranonce1);
    extranonce2.extend_vec(&mut coinbase);
    coinbase.extend_from_slice(coinbase2);

    sha256d::Hash::hash(&coinbase)
}

/// Fold the coinbase hash up through the branch. Stratum branches are always
/// right-hand siblings.
pub fn merkle_root(coinbase: sha256d::Hash, branches: &[TxMerkleNode]) -> TxMerkleNode {
    let mut acc = coinbase.to_byte_array();
    for branch in branches {
        let mut pair = [0u8; 64];
        pair[..32].copy_from_slice(&acc);
        pair[32..].copy_from_slice(branch.as_byte_array());
        acc = sha256d::Hash::hash(&pair).to_byte_array();
    }
    TxMerkleNode::from_byte_array(acc)
}

fn serialize_header(header: &BlockHeader) -> [u8; 80] {
    let mut bytes = [0u8; 80];
    bytes[0..4].copy_from_slice(&header.version.to_consensus().to_le_bytes());
    bytes[4..36].copy_from_slice(header.prev_blockhash.as_byte_array());
    bytes[36..68].copy_from_slice(header.merkle_root.as_byte_array());
    bytes[68..72].copy_from_slice(&header.time.to_le_bytes());
    bytes[72..76].copy_from_slice(&header.bits.to_consensus().to_le_bytes());
    bytes[76..80].copy_from_slice(&header.nonce.to_le_bytes());
    bytes
}
