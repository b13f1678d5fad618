//! Double SHA-256 over 80-byte block headers.
//!
//! The first 64 bytes of a header don't change while a job's nonce space is
//! searched, so their compression is done once per job ([`compute_midstate`])
//! and each candidate only pays for the 16-byte tail plus the second hash
//! ([`hash_candidate`]).
//!
//! The second hash stops after round 60 when the digest can't have its two
//! most significant bytes (little-endian interpretation, i.e. bytes 30 and 31)
//! equal to zero. Any hash meeting a difficulty of 1 or more has those bytes
//! zero, so the filter never drops a real share.

use sha2::{
    compress256,
    digest::generic_array::{typenum::U64, GenericArray},
};

/// SHA-256 initial hash value.
const IV: [u32; 8] = [
    0x6a09e667, 0xbb67ae85, 0x3c6ef372, 0xa54ff53a, 0x510e527f, 0x9b05688c, 0x1f83d9ab, 0x5be0cd19,
];

/// SHA-256 round constants.
const K: [u32; 64] = [
    0x428a2f98, 0x71374491, 0xb5c0fbcf, 0xe9b5dba5, 0x3956c25b, 0x59f111f1, 0x923f82a4, 0xab1c5ed5,
    0xd807aa98, 0x12835b01, 0x243185be, 0x550c7dc3, 0x72be5d74, 0x80deb1fe, 0x9bdc06a7, 0xc19bf174,
    0xe49b69c1, 0xefbe4786, 0x0fc19dc6, 0x240ca1cc, 0x2de92c6f, 0x4a7484aa, 0x5cb0a9dc, 0x76f988da,
    0x983e5152, 0xa831c66d, 0xb00327c8, 0xbf597fc7, 0xc6e00bf3, 0xd5a79147, 0x06ca6351, 0x14292967,
    0x27b70a85, 0x2e1b2138, 0x4d2c6dfc, 0x53380d13, 0x650a7354, 0x766a0abb, 0x81c2c92e, 0x92722c85,
    0xa2bfe8a1, 0xa81a664b, 0xc24b8b70, 0xc76c51a3, 0xd192e819, 0xd6990624, 0xf40e3585, 0x106aa070,
    0x19a4c116, 0x1e376c08, 0x2748774c, 0x34b0bcb5, 0x391c0cb3, 0x4ed8aa4a, 0x5b9cca4f, 0x682e6ff3,
    0x748f82ee, 0x78a5636f, 0x84c87814, 0x8cc70208, 0x90befffa, 0xa4506ceb, 0xbef9a3f7, 0xc67178f2,
];

/// Rounds of the second hash after which register `e` holds the final `h`.
const EARLY_EXIT_ROUND: usize = 61;

/// Bit length of an 80-byte header, stored in the padding of the tail block.
const HEADER_BITS: u32 = 80 * 8;

/// Bit length of a 32-byte digest, stored in the padding of the second hash.
const DIGEST_BITS: u32 = 32 * 8;

/// Hash state after compressing the first 64 bytes of a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Midstate([u32; 8]);

impl Midstate {
    pub fn words(&self) -> &[u32; 8] {
        &self.0
    }
}

/// Compress the fixed first block of a header.
pub fn compute_midstate(first_block: &[u8; 64]) -> Midstate {
    let block = GenericArray::<u8, U64>::clone_from_slice(first_block);
    let mut state = IV;
    compress256(&mut state, std::slice::from_ref(&block));
    Midstate(state)
}

/// Double hash the header whose first block produced `midstate` and whose
/// last 16 bytes (merkle root tail, time, bits, nonce) are `tail`.
///
/// Returns `None` when bytes 30 and 31 of the digest aren't both zero, without
/// finishing the second compression. Otherwise returns the full digest, in the
/// same byte order as `bitcoin::hashes::sha256d`.
pub fn hash_candidate(midstate: &Midstate, tail: &[u8; 16]) -> Option<[u8; 32]> {
    // First hash: tail block with the message padding for 80 bytes.
    let mut w = [0u32; 64];
    for (i, chunk) in tail.chunks_exact(4).enumerate() {
        w[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    w[4] = 0x8000_0000;
    w[15] = HEADER_BITS;

    let mut first = midstate.0;
    let mut s = first;
    run_rounds(&mut s, &mut w, 0..64);
    for (word, add) in first.iter_mut().zip(s) {
        *word = word.wrapping_add(add);
    }

    // Second hash: the first digest padded to one block.
    let mut w = [0u32; 64];
    w[..8].copy_from_slice(&first);
    w[8] = 0x8000_0000;
    w[15] = DIGEST_BITS;

    let mut s = IV;
    run_rounds(&mut s, &mut w, 0..EARLY_EXIT_ROUND);

    // Register e now equals the h that rounds 61..63 will produce, so the
    // last digest word is already known.
    let last = IV[7].wrapping_add(s[4]);
    if last & 0xffff != 0 {
        return None;
    }

    run_rounds(&mut s, &mut w, EARLY_EXIT_ROUND..64);

    let mut digest = [0u8; 32];
    for (i, chunk) in digest.chunks_exact_mut(4).enumerate() {
        chunk.copy_from_slice(&IV[i].wrapping_add(s[i]).to_be_bytes());
    }
    Some(digest)
}

fn run_rounds(s: &mut [u32; 8], w: &mut [u32; 64], rounds: std::ops::Range<usize>) {
    for t in rounds {
        if t >= 16 {
            w[t] = small_sigma1(w[t - 2])
                .wrapping_add(w[t - 7])
                .wrapping_add(small_sigma0(w[t - 15]))
                .wrapping_add(w[t - 16]);
        }
        round(s, K[t], w[t]);
    }
}

#[inline(always)]
fn round(s: &mut [u32; 8], k: u32, w: u32) {
    let [a, b, c, d, e, f, g, h] = *s;
    let t1 = h
        .wrapping_add(big_sigma1(e))
        .wrapping_add(ch(e, f, g))
        .wrapping_add(k)
        .wrapping_add(w);
    let t2 = big_sigma0(a).wrapping_add(maj(a, b, c));
    *s = [t1.wrapping_add(t2), a, b, c, d.wrapping_add(t1), e, f, g];
}

#[inline(always)]
fn ch(x: u32, y: u32, z: u32) -> u32 {
    z ^ (x & (y ^ z))
}

#[inline(always)]
fn maj(x: u32, y: u32, z: u32) -> u32 {
    (x & y) | (z & (x | y))
}

#[inline(always)]
fn big_sigma0(x: u32) -> u32 {
    x.rotate_right(2) ^ x.rotate_right(13) ^ x.rotate_right(22)
}

#[inline(always)]
fn big_sigma1(x: u32) -> u32 {
    x.rotate_right(6) ^ x.rotate_right(11) ^ x.rotate_right(25)
}

#[inline(always)]
fn small_sigma0(x: u32) -> u32 {
    x.rotate_right(7) ^ x.rotate_right(18) ^ (x >> 3)
}

#[inline(always)]
fn small_sigma1(x: u32) -> u32 {
    x.rotate_right(17) ^ x.rotate_right(19) ^ (x >> 10)
}
