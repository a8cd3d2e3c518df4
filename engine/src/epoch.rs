//! Witness rotation for a single numbered epoch.
//!
//! Grounded on `original_source/consensus/pkg/engine/epoch.py`. An epoch
//! holds an ordered witness committee and a FIFO queue of replacement
//! candidates; it advances a slot cursor and reshuffles the witness order
//! deterministically at round boundaries.

use std::collections::VecDeque;

use crate::config::ROUNDS_PER_EPOCH;
use crate::crypto::concat_and_hash;
use crate::error::EngineError;
use crate::types::Key;

/// A numbered epoch: the witness committee currently producing blocks, the
/// queue of members waiting to replace a downgraded witness, and the slot
/// cursor counting advances since the epoch began.
///
/// Invariant: `witnesses.len() <= num_slots` and no key appears in both
/// `witnesses` and `candidates`.
#[derive(Debug, Clone)]
pub struct Epoch {
    pub number: u64,
    pub num_slots: usize,
    pub witnesses: Vec<Key>,
    pub candidates: VecDeque<Key>,
    pub current_witness_idx: u64,
}

impl Epoch {
    /// A fresh, uninitialized epoch: no witnesses, no candidates, cursor at
    /// zero. `set_candidates_and_witnesses` must be called before the epoch
    /// can produce blocks.
    pub fn new(number: u64, num_slots: usize) -> Self {
        Self {
            number,
            num_slots,
            witnesses: Vec::new(),
            candidates: VecDeque::new(),
            current_witness_idx: 0,
        }
    }

    /// Installs a fresh candidate ordering (the STV result for this epoch).
    /// The first `num_slots` entries become the witness committee in the
    /// given order; the remainder enter the candidate queue in order.
    pub fn set_candidates_and_witnesses(&mut self, ordered: &[Key]) {
        let split = self.num_slots.min(ordered.len());
        self.witnesses = ordered[..split].to_vec();
        self.candidates = ordered[split..].iter().cloned().collect();
    }

    /// Advances the slot cursor by one. `seed` is the id of the most
    /// recently pre-committed block (stringified before hashing, matching
    /// the original engine, which hashes block ids as hex strings).
    ///
    /// If, after the increment, the cursor lands on a positive multiple of
    /// `witnesses.len()` and the epoch is not yet over, the witness list is
    /// reshuffled deterministically from `seed`. Returns whether a
    /// reshuffle happened, so callers can report it as a metric.
    pub fn increment_witness(&mut self, seed: &str) -> Result<bool, EngineError> {
        if self.witnesses.is_empty() {
            return Err(EngineError::EpochNotInitialized);
        }
        self.current_witness_idx += 1;
        let reshuffled = self.current_witness_idx % self.witnesses.len() as u64 == 0 && !self.is_over();
        if reshuffled {
            self.reorder_witnesslist(seed);
        }
        Ok(reshuffled)
    }

    /// Replaces `key` at its position in the witness list with the
    /// candidate at the front of the queue, and pushes the demoted witness
    /// to the back of the queue. A no-op if `key` is not currently a
    /// witness.
    pub fn downgrade_witness(&mut self, key: &Key) {
        let Some(pos) = self.position_in_witness_list(key) else {
            return;
        };
        let Some(replacement) = self.candidates.pop_front() else {
            return;
        };
        let demoted = std::mem::replace(&mut self.witnesses[pos], replacement);
        self.candidates.push_back(demoted);
    }

    /// Deterministically reshuffles the witness list: each witness `w` is
    /// paired with `H(w || seed || current_witness_idx)`, sorted ascending
    /// by that hash, and the witness list is replaced by the sorted keys.
    fn reorder_witnesslist(&mut self, seed: &str) {
        let idx = self.current_witness_idx.to_string();
        let mut paired: Vec<(Key, String)> = self
            .witnesses
            .iter()
            .map(|w| {
                let digest = concat_and_hash(&[w.as_str(), seed, idx.as_str()]);
                (w.clone(), digest)
            })
            .collect();
        paired.sort_by(|a, b| a.1.cmp(&b.1));
        self.witnesses = paired.into_iter().map(|(w, _)| w).collect();
    }

    pub fn is_witness(&self, key: &Key) -> bool {
        self.witnesses.contains(key)
    }

    pub fn position_in_witness_list(&self, key: &Key) -> Option<usize> {
        self.witnesses.iter().position(|w| w == key)
    }

    pub fn current_witness(&self) -> Option<&Key> {
        if self.witnesses.is_empty() {
            return None;
        }
        let idx = (self.current_witness_idx as usize) % self.witnesses.len();
        self.witnesses.get(idx)
    }

    pub fn next_witness(&self) -> Option<&Key> {
        if self.witnesses.is_empty() {
            return None;
        }
        let idx = (self.current_witness_idx as usize + 1) % self.witnesses.len();
        self.witnesses.get(idx)
    }

    pub fn is_initialized(&self) -> bool {
        !(self.current_witness_idx == 0 && self.witnesses.is_empty())
    }

    pub fn is_over(&self) -> bool {
        self.current_witness_idx >= self.witnesses.len() as u64 * ROUNDS_PER_EPOCH
    }

    pub fn is_last_round(&self) -> bool {
        self.current_witness_idx >= self.witnesses.len() as u64 * (ROUNDS_PER_EPOCH - 1)
    }

    pub fn next_epoch_number(&self) -> u64 {
        self.number + 1
    }

    pub fn slots_remaining_in_epoch(&self) -> i64 {
        self.witnesses.len() as i64 * ROUNDS_PER_EPOCH as i64 - self.current_witness_idx as i64
    }

    /// Witnesses followed by queued candidates, in order. This is the
    /// exact ordering carried in `ConsensusData::candidates` and in
    /// bootstrap payloads.
    pub fn full_candidate_list(&self) -> Vec<Key> {
        let mut list = self.witnesses.clone();
        list.extend(self.candidates.iter().cloned());
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(labels: &[&str]) -> Vec<Key> {
        labels.iter().map(|l| Key::from(*l)).collect()
    }

    #[test]
    fn set_candidates_and_witnesses_splits_by_num_slots() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b", "c", "d"]));
        assert_eq!(e.witnesses, keys(&["a", "b"]));
        assert_eq!(e.candidates, keys(&["c", "d"]).into_iter().collect::<VecDeque<_>>());
    }

    #[test]
    fn witnesses_and_candidates_are_disjoint() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b", "c", "d"]));
        for w in &e.witnesses {
            assert!(!e.candidates.contains(w));
        }
    }

    #[test]
    fn increment_witness_fails_when_uninitialized() {
        let mut e = Epoch::new(0, 2);
        assert!(matches!(
            e.increment_witness("seed"),
            Err(EngineError::EpochNotInitialized)
        ));
    }

    #[test]
    fn is_over_after_rounds_per_epoch_full_passes() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b"]));
        for _ in 0..(2 * ROUNDS_PER_EPOCH) {
            e.increment_witness("seed").unwrap();
        }
        assert!(e.is_over());
    }

    #[test]
    fn is_not_over_before_final_round() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b"]));
        for _ in 0..(2 * ROUNDS_PER_EPOCH - 1) {
            e.increment_witness("seed").unwrap();
        }
        assert!(!e.is_over());
    }

    #[test]
    fn reshuffle_is_deterministic_given_same_seed_and_idx() {
        let mut e1 = Epoch::new(0, 3);
        e1.set_candidates_and_witnesses(&keys(&["a", "b", "c"]));
        let mut e2 = e1.clone();

        for _ in 0..3 {
            e1.increment_witness("seed-xyz").unwrap();
            e2.increment_witness("seed-xyz").unwrap();
        }
        assert_eq!(e1.witnesses, e2.witnesses);
    }

    #[test]
    fn reshuffle_differs_with_different_seed() {
        let mut e1 = Epoch::new(0, 3);
        e1.set_candidates_and_witnesses(&keys(&["a", "b", "c"]));
        let mut e2 = e1.clone();

        for _ in 0..3 {
            e1.increment_witness("seed-one").unwrap();
        }
        for _ in 0..3 {
            e2.increment_witness("seed-two").unwrap();
        }
        // Not guaranteed different for every seed pair, but overwhelmingly
        // likely for a SHA-256-backed ordering over 3 elements with
        // distinct seeds; this is the same style of check as the original
        // test suite's tie-break oracle vector.
        assert_ne!(e1.witnesses, e2.witnesses, "expected distinct seeds to produce distinct orderings (flaky only if SHA-256 collides on 3 elements)");
    }

    #[test]
    fn downgrade_witness_replaces_with_front_candidate() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b", "c", "d"]));
        e.downgrade_witness(&Key::from("a"));
        assert_eq!(e.witnesses, keys(&["c", "b"]));
        assert_eq!(e.candidates, keys(&["d", "a"]).into_iter().collect::<VecDeque<_>>());
    }

    #[test]
    fn downgrade_witness_is_noop_for_non_witness() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b", "c"]));
        let before = e.witnesses.clone();
        e.downgrade_witness(&Key::from("zzz"));
        assert_eq!(e.witnesses, before);
    }

    #[test]
    fn downgrade_twice_on_now_candidate_key_is_noop() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b", "c"]));
        e.downgrade_witness(&Key::from("a"));
        assert!(!e.is_witness(&Key::from("a")));
        let before = e.witnesses.clone();
        // "a" is now a candidate, not a witness; downgrading it again does
        // nothing because it is no longer in the witness list.
        e.downgrade_witness(&Key::from("a"));
        assert_eq!(e.witnesses, before);
    }

    #[test]
    fn current_witness_is_none_before_initialization() {
        let e = Epoch::new(0, 2);
        assert!(e.current_witness().is_none());
        assert!(!e.is_initialized());
    }

    #[test]
    fn full_candidate_list_is_witnesses_then_queue() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b", "c", "d"]));
        assert_eq!(e.full_candidate_list(), keys(&["a", "b", "c", "d"]));
    }

    #[test]
    fn is_last_round_holds_in_final_rotation() {
        let mut e = Epoch::new(0, 2);
        e.set_candidates_and_witnesses(&keys(&["a", "b"]));
        for _ in 0..4 {
            e.increment_witness("s").unwrap();
        }
        assert!(e.is_last_round());
        assert!(!e.is_over());
    }
}
