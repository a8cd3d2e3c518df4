//! Core identifiers shared across every module: the validator `Key`, the
//! host-supplied `BlockId`, a `Ballot`, and a STV `VoteResult`.
//!
//! `original_source/consensus/pkg/engine/types.py` models these as bare
//! `NewType` aliases over `str`/`list`/`tuple`. This crate gives each one a
//! real newtype so the compiler catches a `Ballot` passed where a
//! `VoteResult` was expected, something the Python original could not.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, hex-encoded validator identity.
///
/// Cryptographic identity (generating or verifying signatures for a `Key`)
/// is out of scope for this engine — the host runtime authenticates
/// members before notifications ever reach the driver. A `Key` here is
/// nothing more than a comparable, hashable, orderable label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A host-supplied block identifier. The host runtime's block storage is
/// out of scope, so this crate treats the id as an opaque, comparable
/// byte string rather than modeling a full block hash construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId([u8; 32]);

impl BlockId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The all-zero genesis sentinel. `GENESIS_BLOCK_ID` in `config` is
    /// only 8 bytes (matching the original engine's literal), zero-padded
    /// here to this crate's fixed 32-byte id.
    pub fn genesis() -> Self {
        Self([0u8; 32])
    }

    pub fn is_genesis(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// An ordered preference list over all known members, highest-preference
/// first. Broadcast by a member when voting on the next epoch's candidate
/// list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ballot(pub Vec<Key>);

impl Ballot {
    pub fn new(keys: Vec<Key>) -> Self {
        Self(keys)
    }

    pub fn as_slice(&self) -> &[Key] {
        &self.0
    }
}

/// The ordered candidate list produced by STV tabulation plus deterministic
/// tie-breaking. Length equals the member-set size.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct VoteResult(pub Vec<Key>);

impl VoteResult {
    pub fn new(keys: Vec<Key>) -> Self {
        Self(keys)
    }

    pub fn as_slice(&self) -> &[Key] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_equality_is_by_value() {
        let a = Key::from("abcd");
        let b = Key::new("abcd".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn block_id_genesis_is_all_zero() {
        assert!(BlockId::genesis().is_genesis());
        assert!(!BlockId::from_bytes([1u8; 32]).is_genesis());
    }

    #[test]
    fn block_id_hex_roundtrip() {
        let id = BlockId::from_bytes([0xABu8; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert!(hex.starts_with("abab"));
    }
}
