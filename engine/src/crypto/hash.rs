//! Hashing utilities shared by the epoch reshuffle, the STV tie-break, and
//! the voting-system deterministic result comparisons.
//!
//! `concat_and_hash` mirrors `utils.py::concat_and_hash` from the original
//! Sawtooth DDPoA engine bit-for-bit (stringify every argument, concatenate,
//! SHA-256, hex-encode) so that the reshuffle and tie-break orderings this
//! crate produces are the same orderings a node running the original engine
//! would produce given the same seed.

use sha2::{Digest, Sha256};

/// Concatenates the string representation of every argument and returns the
/// hex-encoded SHA-256 digest.
///
/// Used for two purposes in this crate: witness-list reshuffling
/// (`H(witness || seed || current_witness_idx)`) and STV tie-break slot
/// winners (`H(key || seed)`).
pub fn concat_and_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// BLAKE3 digest of arbitrary bytes, fixed-size output.
///
/// Not exercised by the core consensus algorithm (which hashes through
/// `concat_and_hash` for original-engine compatibility) but kept available
/// for the wire layer, which prefers BLAKE3 for its speed on the
/// `ConsensusMessage` framing checksum.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
