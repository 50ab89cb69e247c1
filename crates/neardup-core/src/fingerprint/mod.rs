//! Content fingerprints: MinHash signatures, the session cache and parallel batch hashing.

mod batch;
mod cache;
mod minhash;

pub use batch::{fingerprint_all, signature_for, ProgressFn};
pub use cache::{CacheKey, CacheStats, SignatureCache};
pub use minhash::{normalize, shingles, MinHashParams, MinHasher, Signature};
