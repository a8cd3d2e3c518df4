//! Hashing primitives used by the consensus algorithm.
//!
//! Cryptographic identity (signing, key exchange, encryption) is out of
//! scope for this engine — the host runtime owns member authentication.
//! This module only carries what the consensus algorithm itself needs:
//! deterministic hashing for the witness reshuffle and the STV tie-break.

pub mod hash;

pub use hash::{blake3_hash, concat_and_hash};
