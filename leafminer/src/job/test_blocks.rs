//! Test data from real Bitcoin blocks.

/// Block 881,423, mined by the 256 Foundation's Telehash pool.
///
/// The Stratum pieces below are expressed the way a pool sends them: legacy
/// (non-witness) coinbase halves, word-swapped previous hash, hex fields.
pub mod block_881423 {
    use std::str::FromStr;
    use std::sync::Arc;

    use bitcoin::hash_types::BlockHash;
    use serde_json::{json, Value};

    use crate::job::extranonce2::Extranonce2;
    use crate::job::Job;
    use crate::stratum_v1::JobNotification;

    pub const VERSION: u32 = 0x2e596000;
    pub const TIME: u32 = 0x679ac169;
    pub const BITS: u32 = 0x17029a8a;
    pub const NONCE: u32 = 0xff05fb02;

    pub const MERKLE_ROOT: [u8; 32] = [
        0x76, 0xf6, 0x3a, 0x35, 0xf1, 0xb8, 0xb5, 0x01, 0x6d, 0x3e, 0xb0, 0xcc, 0xe2, 0xee, 0xbb,
        0xdf, 0x58, 0xbf, 0x8f, 0xbe, 0xa4, 0xe8, 0x70, 0xc8, 0xf7, 0x70, 0x34, 0x6b, 0xdf, 0xcf,
        0x62, 0x2d,
    ];

    /// The complete 80-byte block header.
    pub const HEADER_BYTES: [u8; 80] = [
        // Version (all fields little-endian)
        0x00, 0x60, 0x59, 0x2e, // Previous block hash
        0xe3, 0xc9, 0x6a, 0x8a, 0x70, 0xca, 0x15, 0xfe, 0x21, 0x5e, 0x99, 0xf8, 0x4a, 0xb6, 0x4c,
        0x43, 0xe1, 0xb5, 0xd2, 0xc4, 0x3b, 0x54, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, // Merkle root
        0x76, 0xf6, 0x3a, 0x35, 0xf1, 0xb8, 0xb5, 0x01, 0x6d, 0x3e, 0xb0, 0xcc, 0xe2, 0xee, 0xbb,
        0xdf, 0x58, 0xbf, 0x8f, 0xbe, 0xa4, 0xe8, 0x70, 0xc8, 0xf7, 0x70, 0x34, 0x6b, 0xdf, 0xcf,
        0x62, 0x2d, // Timestamp
        0x69, 0xc1, 0x9a, 0x67, // Bits
        0x8a, 0x9a, 0x02, 0x17, // Nonce
        0x02, 0xfb, 0x05, 0xff,
    ];

    /// Previous block hash in Stratum's word-swapped hex.
    pub const PREV_HASH_STRATUM: &str =
        "8a6ac9e3fe15ca70f8995e21434cb64ac4d2b5e10001543b0000000000000000";

    /// Legacy coinbase up to the extranonce space.
    pub const COINBASE1: &str = "01000000010000000000000000000000000000000000000000000000000000\
        000000000000ffffffff3d030f730d000469c19a67";

    /// Legacy coinbase after the extranonce space.
    pub const COINBASE2: &str = "9a67b6600000000000000a41706f6c6c6f192f6d696e65642062792032353620\
        466f756e646174696f6e2fffffffff0275aac01200000000160014c64b1b9283ba1ea86bb9e7b696b0c8f68d\
        ad04000000000000000000266a24aa21a9edb395560ab72068c2afb1d7e6c7db26b813482089d2c4d2471b90\
        36c5e826140600000000";

    pub const EXTRANONCE1: &str = "04830cee";

    /// Extranonce2 bytes as they appear in the coinbase.
    pub const EXTRANONCE2: [u8; 4] = [0x22, 0x0c, 0xf1, 0xad];

    pub const MERKLE_BRANCHES: [&str; 11] = [
        "4282357ab0a2f4e8e562c8c5eae1d63b559068f9072374b72e26b88ac841908f",
        "c2bbae90d06f8025ade3516ca2e42d79318b6e56fccb9609df85a654a8341068",
        "cbb30084acbcb5ce6d5436e853bc612466df0c00702be6f51d47072f1a5d0480",
        "bb092e533f70b79246fc9e4bdc9b81ac8332e56f2651e3b237a150d6d807b081",
        "0d32959988733447cb340326a1fe4d3c2cff5d636e32a4e08c3fc5a234f6f6bc",
        "8ba3477940924a90067cff3dd30bc46916cf4c2f73fb6229b8f8197b83b6ddb9",
        "3fe97cc5dec1cddd66c9d3780888c145c12418590cd983c4871b1bf03fabbf9e",
        "bd1c6a3bcd0ebaa0eca54d9c802540f312c7705435601d776b4f59bb52cff67d",
        "8638c10190b8f4f558bafdbb57f46226c349a83f229f431143ae75e425fb5cbd",
        "6d6f4eae41cccb21a7c97ac496d9f89b8a4f772389b76f7691519dda38264221",
        "82dad7a1e2613af0e61f77f03d6208c83e72f917dade4235cc35e37ee3ad6e3f",
    ];

    pub fn block_hash() -> BlockHash {
        BlockHash::from_str("0000000000000000000269d52c24ea451225613aab095d90d771d4e29aa96cdd")
            .unwrap()
    }

    pub fn extranonce1() -> Vec<u8> {
        hex::decode(EXTRANONCE1).unwrap()
    }

    pub fn extranonce2() -> Extranonce2 {
        Extranonce2::with_value(u32::from_le_bytes(EXTRANONCE2) as u64, 4).unwrap()
    }

    /// `mining.notify` params for this block.
    pub fn notify_params(job_id: &str, clean_jobs: bool) -> Vec<Value> {
        vec![
            json!(job_id),
            json!(PREV_HASH_STRATUM),
            json!(COINBASE1),
            json!(COINBASE2),
            json!(MERKLE_BRANCHES),
            json!(format!("{:08x}", VERSION)),
            json!(format!("{:08x}", BITS)),
            json!(format!("{:08x}", TIME)),
            json!(clean_jobs),
        ]
    }

    pub fn notification(job_id: &str, clean_jobs: bool) -> JobNotification {
        JobNotification::from_stratum_params(&notify_params(job_id, clean_jobs)).unwrap()
    }

    pub fn job(job_id: &str, clean_jobs: bool) -> Arc<Job> {
        Arc::new(Job::new(
            notification(job_id, clean_jobs),
            extranonce1(),
            extranonce2(),
        ))
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use bitcoin::hashes::Hash;

        #[test]
        fn test_block_hash_consistency() {
            assert_eq!(BlockHash::hash(&HEADER_BYTES), block_hash());
        }

        #[test]
        fn test_header_fields_consistency() {
            assert_eq!(HEADER_BYTES[0..4], VERSION.to_le_bytes());
            assert_eq!(HEADER_BYTES[36..68], MERKLE_ROOT);
            assert_eq!(HEADER_BYTES[68..72], TIME.to_le_bytes());
            assert_eq!(HEADER_BYTES[72..76], BITS.to_le_bytes());
            assert_eq!(HEADER_BYTES[76..80], NONCE.to_le_bytes());
        }

        #[test]
        fn test_notification_fields() {
            let notification = notification("a1", true);
            assert_eq!(notification.prev_hash.as_byte_array()[..], HEADER_BYTES[4..36]);
            assert_eq!(notification.coinbase1.len(), 52);
            assert_eq!(notification.merkle_branches.len(), 11);
        }
    }
}
