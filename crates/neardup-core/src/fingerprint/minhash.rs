//! MinHash signatures over character shingles.
//!
//! Each shingle is hashed once with BLAKE3 (truncated to 64 bits, reduced mod
//! the Mersenne prime 2^61 - 1). Permutation `i` is the universal hash
//! `(a_i * h + b_i) mod p`; the coefficients come from BLAKE3 in key-derivation
//! mode over `i`, so every run and every process derives the same family.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Error, Result};

const MERSENNE_PRIME: u64 = (1 << 61) - 1;

const PERMUTATION_CONTEXT: &str = "neardup 2024-06-01 minhash permutation coefficients";

/// Parameters a signature was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinHashParams {
    pub num_perm: usize,
    pub shingle_size: usize,
}

impl Default for MinHashParams {
    fn default() -> Self {
        Self {
            num_perm: 128,
            shingle_size: 5,
        }
    }
}

/// Per-permutation minimum hash values of a document's shingle set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSignature")]
pub struct Signature {
    values: Vec<u64>,
    params: MinHashParams,
}

/// Unchecked wire form; goes through `Signature::from_values` on the way in
#[derive(Deserialize)]
struct RawSignature {
    values: Vec<u64>,
    params: MinHashParams,
}

impl TryFrom<RawSignature> for Signature {
    type Error = Error;

    fn try_from(raw: RawSignature) -> Result<Self> {
        Self::from_values(raw.values, raw.params)
    }
}

impl Signature {
    /// Wrap precomputed values. The length must equal `params.num_perm`.
    pub fn from_values(values: Vec<u64>, params: MinHashParams) -> Result<Self> {
        if values.len() != params.num_perm {
            return Err(Error::Configuration(format!(
                "signature has {} values but num_perm is {}",
                values.len(),
                params.num_perm
            )));
        }
        Ok(Self { values, params })
    }

    pub fn values(&self) -> &[u64] {
        &self.values
    }

    pub fn params(&self) -> MinHashParams {
        self.params
    }

    /// Estimated Jaccard similarity: the share of positions where both signatures agree.
    ///
    /// Signatures built with different parameters cannot be compared.
    pub fn similarity(&self, other: &Signature) -> Result<f64> {
        if self.params != other.params {
            return Err(Error::Configuration(format!(
                "cannot compare signatures built with {:?} and {:?}",
                self.params, other.params
            )));
        }

        let agreeing = self
            .values
            .iter()
            .zip(other.values.iter())
            .filter(|(a, b)| a == b)
            .count();

        Ok(agreeing as f64 / self.values.len() as f64)
    }
}

/// Builds signatures for one fixed parameter set
#[derive(Debug, Clone)]
pub struct MinHasher {
    params: MinHashParams,
    permutations: Vec<(u64, u64)>,
}

impl MinHasher {
    pub fn new(params: MinHashParams) -> Result<Self> {
        if params.num_perm == 0 || params.shingle_size == 0 {
            return Err(Error::Configuration(format!(
                "num_perm and shingle_size must be positive, got {:?}",
                params
            )));
        }

        let permutations = (0..params.num_perm as u64).map(permutation).collect();
        Ok(Self {
            params,
            permutations,
        })
    }

    pub fn params(&self) -> MinHashParams {
        self.params
    }

    /// Compute the signature of `text`.
    ///
    /// Empty (after normalization) text has no shingles and gets every slot set to `u64::MAX`.
    pub fn fingerprint(&self, text: &str) -> Signature {
        let normalized = normalize(text);
        let mut values = vec![u64::MAX; self.params.num_perm];

        let hashes: HashSet<u64> = shingles(&normalized, self.params.shingle_size)
            .map(shingle_hash)
            .collect();

        for hash in hashes {
            for (slot, &(a, b)) in values.iter_mut().zip(self.permutations.iter()) {
                let value = permute(a, b, hash);
                if value < *slot {
                    *slot = value;
                }
            }
        }

        Signature {
            values,
            params: self.params,
        }
    }
}

/// Lowercase, collapse whitespace runs to a single space, trim both ends.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for word in text.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.extend(word.chars().flat_map(char::to_lowercase));
    }
    out
}

/// Overlapping windows of `size` characters.
///
/// Text shorter than `size` yields itself as the only shingle; empty text yields none.
pub fn shingles(normalized: &str, size: usize) -> impl Iterator<Item = &str> {
    let mut bounds: Vec<usize> = normalized.char_indices().map(|(i, _)| i).collect();
    let char_count = bounds.len();
    bounds.push(normalized.len());

    let window = size.min(char_count).max(1);
    let count = if char_count == 0 {
        0
    } else {
        char_count - window + 1
    };

    (0..count).map(move |i| &normalized[bounds[i]..bounds[i + window]])
}

fn shingle_hash(shingle: &str) -> u64 {
    let digest = blake3::hash(shingle.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(bytes) % MERSENNE_PRIME
}

fn permutation(index: u64) -> (u64, u64) {
    let mut hasher = blake3::Hasher::new_derive_key(PERMUTATION_CONTEXT);
    hasher.update(&index.to_le_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();

    let mut a = [0u8; 8];
    let mut b = [0u8; 8];
    a.copy_from_slice(&bytes[..8]);
    b.copy_from_slice(&bytes[8..16]);

    let a = (u64::from_le_bytes(a) % MERSENNE_PRIME).max(1);
    let b = u64::from_le_bytes(b) % MERSENNE_PRIME;
    (a, b)
}

fn permute(a: u64, b: u64, hash: u64) -> u64 {
    ((a as u128 * hash as u128 + b as u128) % MERSENNE_PRIME as u128) as u64
}
