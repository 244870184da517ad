//! Key hash functions for the consistent hash rings.
//!
//! Every ring is built from one [`KeyHasher`]. Backup rings use different
//! functions so that a membership change does not move the same keys on
//! every ring at once.

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;
use std::fmt;
use std::hash::Hasher;

/// A deterministic 64-bit hash over raw bytes.
pub trait KeyHasher: Send + Sync {
    fn hash(&self, bytes: &[u8]) -> u64;
}

impl<F> KeyHasher for F
where
    F: Fn(&[u8]) -> u64 + Send + Sync,
{
    fn hash(&self, bytes: &[u8]) -> u64 {
        self(bytes)
    }
}

/// Built-in hash functions selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// FNV-1a followed by a 64-bit avalanche finalizer.
    #[default]
    Fnv1a,
    /// SipHash-1-3 with a zero key, from the `siphasher` crate so the output
    /// does not change with the toolchain.
    Sip13,
    /// MurmurHash64A.
    Murmur64,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Fnv1a => "fnv1a",
            HashAlgorithm::Sip13 => "sip13",
            HashAlgorithm::Murmur64 => "murmur64",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl KeyHasher for HashAlgorithm {
    fn hash(&self, bytes: &[u8]) -> u64 {
        match self {
            HashAlgorithm::Fnv1a => fmix64(fnv1a(bytes)),
            HashAlgorithm::Sip13 => {
                let mut hasher = SipHasher13::new_with_keys(0, 0);
                hasher.write(bytes);
                hasher.finish()
            }
            HashAlgorithm::Murmur64 => murmur64a(bytes, MURMUR_SEED),
        }
    }
}

#[inline]
fn fnv1a(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// MurmurHash3 64-bit finalizer. FNV alone mixes trailing bytes poorly into
/// the high bits, which skews ring placement of "name-0", "name-1", ...
#[inline]
fn fmix64(mut k: u64) -> u64 {
    k ^= k >> 33;
    k = k.wrapping_mul(0xff51afd7ed558ccd);
    k ^= k >> 33;
    k = k.wrapping_mul(0xc4ceb9fe1a85ec53);
    k ^= k >> 33;
    k
}

const MURMUR_SEED: u64 = 0x9747b28c;

fn murmur64a(bytes: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4a7935bd1e995;
    const R: u32 = 47;

    let mut h = seed ^ (bytes.len() as u64).wrapping_mul(M);

    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(buf);

        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, byte) in tail.iter().enumerate() {
            h ^= (*byte as u64) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}
