//! Per-epoch ballot collection, STV tabulation, and consensus over peer
//! results.
//!
//! Grounded on `original_source/consensus/pkg/engine/voting_system.py`. The
//! underlying STV tabulation is hand-rolled in the `stv` submodule since no
//! crate in this workspace's dependency pack implements it. This module
//! layers the parts the original delegates to plain Python data structures:
//! weighted ballot generation, per-signer dedup, the deterministic tie-break
//! extension, and consensus over peers' reported results.

mod stv;

use std::collections::HashMap;

use indexmap::IndexMap;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::config::{VOTING_SYSTEM_RETENTION, VOTING_SYSTEM_RETENTION_TRIGGER};
use crate::crypto::concat_and_hash;
use crate::types::{Ballot, Key, VoteResult};

/// Per-epoch voting state: the candidate list being voted on, every ballot
/// received (deduplicated by signer), this node's own computed result, and
/// every peer-reported result this node has seen.
#[derive(Debug, Clone, Default)]
struct EpochVotes {
    candidates: Vec<Key>,
    ballots: HashMap<Key, Ballot>,
    own_result: Option<VoteResult>,
    peer_results: HashMap<Key, VoteResult>,
}

/// Tracks voting state across epochs, retaining only the most recent
/// `VOTING_SYSTEM_RETENTION` once `VOTING_SYSTEM_RETENTION_TRIGGER` epochs
/// have accumulated.
#[derive(Debug, Default)]
pub struct VotingSystem {
    epochs: HashMap<u64, EpochVotes>,
}

impl VotingSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_candidates(&mut self, epoch: u64, candidates: Vec<Key>) {
        self.epochs.entry(epoch).or_default().candidates = candidates;
    }

    pub fn get_candidates(&self, epoch: u64) -> &[Key] {
        self.epochs
            .get(&epoch)
            .map(|e| e.candidates.as_slice())
            .unwrap_or(&[])
    }

    /// Builds this node's own ballot for `epoch`: a full preference order
    /// over `get_candidates(epoch)` drawn without replacement, weighted by
    /// each candidate's liveness score (online candidates default to their
    /// peer score; offline candidates get a near-zero floor weight of
    /// 0.001 so they still appear, last, rather than being excluded
    /// outright).
    pub fn fill_ballot<R: Rng + ?Sized>(
        &self,
        epoch: u64,
        scores: &HashMap<Key, f64>,
        rng: &mut R,
    ) -> Ballot {
        let mut pool: Vec<Key> = self.get_candidates(epoch).to_vec();
        let mut weights: Vec<f64> = pool
            .iter()
            .map(|k| scores.get(k).copied().filter(|w| *w > 0.0).unwrap_or(0.001))
            .collect();

        let mut order = Vec::with_capacity(pool.len());
        while !pool.is_empty() {
            let dist = match WeightedIndex::new(&weights) {
                Ok(d) => d,
                Err(_) => {
                    // All weights zero (shouldn't happen given the 0.001
                    // floor, but guards against an empty-weight panic):
                    // fall back to the remaining pool in its current order.
                    order.extend(pool.drain(..));
                    break;
                }
            };
            let idx = dist.sample(rng);
            order.push(pool.remove(idx));
            weights.remove(idx);
        }
        Ballot::new(order)
    }

    /// Records `ballot` as cast by `signer` for `epoch`. A second ballot
    /// from the same signer in the same epoch is ignored — the first one
    /// stands.
    pub fn add_ballot(&mut self, epoch: u64, signer: Key, ballot: Ballot) {
        let entry = self.epochs.entry(epoch).or_default();
        entry.ballots.entry(signer).or_insert(ballot);
    }

    pub fn has_voted(&self, epoch: u64, signer: &Key) -> bool {
        self.epochs
            .get(&epoch)
            .map(|e| e.ballots.contains_key(signer))
            .unwrap_or(false)
    }

    pub fn ballot_count(&self, epoch: u64) -> usize {
        self.epochs.get(&epoch).map(|e| e.ballots.len()).unwrap_or(0)
    }

    /// The quorum of ballots/results required to proceed, for a membership
    /// of size `n`: the larger of `num_slots` and just over two-thirds of
    /// the membership (integer division, matching the original engine's
    /// `max(num_slots, 1 + (2n) // 3)`).
    pub fn consensus_amount(num_slots: usize, n: usize) -> usize {
        num_slots.max(1 + (2 * n) / 3)
    }

    pub fn has_enough_ballots(&self, epoch: u64, num_slots: usize, member_count: usize) -> bool {
        self.ballot_count(epoch) >= Self::consensus_amount(num_slots, member_count)
    }

    pub fn has_all_ballots(&self, epoch: u64, member_count: usize) -> bool {
        self.ballot_count(epoch) >= member_count
    }

    /// Runs Scottish STV over the ballots collected so far for `epoch`,
    /// then extends any short result to the full candidate list via
    /// deterministic tie-breaking, and stores it as this node's own
    /// result.
    pub fn calculate_result(&mut self, epoch: u64) -> VoteResult {
        let (candidates, ballots): (Vec<Key>, Vec<Ballot>) = {
            let e = self.epochs.entry(epoch).or_default();
            (e.candidates.clone(), e.ballots.values().cloned().collect())
        };

        let mut winners = stv::scottish_stv(&candidates, &ballots);
        break_ties(&candidates, &ballots, &mut winners, epoch);

        let result = VoteResult::new(winners);
        self.epochs.entry(epoch).or_default().own_result = Some(result.clone());
        result
    }

    pub fn own_result(&self, epoch: u64) -> Option<&VoteResult> {
        self.epochs.get(&epoch).and_then(|e| e.own_result.as_ref())
    }

    pub fn set_peer_result(&mut self, epoch: u64, peer: Key, result: VoteResult) {
        self.epochs
            .entry(epoch)
            .or_default()
            .peer_results
            .insert(peer, result);
    }

    pub fn peer_result_count(&self, epoch: u64) -> usize {
        self.epochs
            .get(&epoch)
            .map(|e| e.peer_results.len())
            .unwrap_or(0)
    }

    /// Counts how many of the peer results recorded for `epoch` agree with
    /// this node's own result (the function's name describes its intent:
    /// *similar* results, i.e. matching ones, not differing ones).
    pub fn has_enough_similar_results(
        &self,
        epoch: u64,
        num_slots: usize,
        member_count: usize,
    ) -> bool {
        let Some(e) = self.epochs.get(&epoch) else {
            return false;
        };
        let Some(own) = &e.own_result else {
            return false;
        };
        let matching = e
            .peer_results
            .values()
            .filter(|r| *r == own)
            .count()
            // A node's own result always agrees with itself.
            + 1;
        matching >= Self::consensus_amount(num_slots, member_count)
    }

    /// The majority result among every peer result recorded for `epoch`
    /// (including this node's own, which is treated as a vote cast by
    /// itself). Ties are broken by first-insertion order, the same
    /// behaviour `IndexMap` gives CPython's plain `dict` — a deliberate,
    /// documented choice rather than an accidental byproduct.
    pub fn get_consensus_result(&self, epoch: u64) -> Option<VoteResult> {
        let e = self.epochs.get(&epoch)?;

        let mut tally: IndexMap<VoteResult, usize> = IndexMap::new();
        if let Some(own) = &e.own_result {
            *tally.entry(own.clone()).or_insert(0) += 1;
        }
        for r in e.peer_results.values() {
            *tally.entry(r.clone()).or_insert(0) += 1;
        }

        tally
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(result, _)| result)
    }

    /// Drops all but the `VOTING_SYSTEM_RETENTION` most recent epochs once
    /// more than `VOTING_SYSTEM_RETENTION_TRIGGER` are held.
    pub fn remove_old_epoch_data(&mut self) {
        if self.epochs.len() <= VOTING_SYSTEM_RETENTION_TRIGGER {
            return;
        }
        let mut nums: Vec<u64> = self.epochs.keys().copied().collect();
        nums.sort_unstable();
        let cutoff = nums.len() - VOTING_SYSTEM_RETENTION;
        for n in &nums[..cutoff] {
            self.epochs.remove(n);
        }
    }
}

/// Extends `winners` (a possibly-short STV result) to cover every candidate
/// in `candidates`, using the positional preference scores every ballot
/// carries for the not-yet-elected candidates. Positional weights start at
/// `w_0 = 0.5` for a ballot's first preference and halve at each
/// subsequent position; a ballot contributes `w_i` to its `i`-th-ranked
/// candidate's score only while that candidate is still unelected. The
/// highest-scoring remaining candidate is appended each round; draws are
/// broken by `get_slot_winner`, which maximizes `H(key || epoch)` — the
/// same hash for every draw in this result, not reseeded per slot.
fn break_ties(candidates: &[Key], ballots: &[Ballot], winners: &mut Vec<Key>, epoch: u64) {
    let mut scores: HashMap<Key, f64> = candidates
        .iter()
        .filter(|c| !winners.contains(c))
        .map(|c| (c.clone(), 0.0))
        .collect();

    for ballot in ballots {
        let mut weight = 0.5_f64;
        for key in ballot.0.iter() {
            if let Some(score) = scores.get_mut(key) {
                *score += weight;
            }
            weight /= 2.0;
        }
    }

    while winners.len() < candidates.len() {
        let max_score = scores
            .values()
            .cloned()
            .fold(f64::NEG_INFINITY, f64::max);
        let mut draws: Vec<Key> = scores
            .iter()
            .filter(|(_, s)| **s == max_score)
            .map(|(k, _)| k.clone())
            .collect();
        draws.sort();

        let winner = if draws.len() == 1 {
            draws.remove(0)
        } else {
            get_slot_winner(&draws, epoch)
        };

        winners.push(winner.clone());
        scores.remove(&winner);
    }
}

/// Returns the candidate among `draws` maximizing `H(key || epoch)`,
/// breaking a scoring tie between two or more candidates deterministically
/// (§8 S4: verified against a fixed oracle vector for `H(key || "42")`).
fn get_slot_winner(draws: &[Key], epoch: u64) -> Key {
    let epoch_str = epoch.to_string();
    draws
        .iter()
        .map(|key| (key.clone(), concat_and_hash(&[key.as_str(), epoch_str.as_str()])))
        .max_by(|a, b| a.1.cmp(&b.1))
        .map(|(key, _)| key)
        .expect("draws is non-empty")
}
