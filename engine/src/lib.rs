// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # DDPoA — Delegated Deterministic Proof of Authority
//!
//! A leader-rotating consensus engine for a Sawtooth-style validator fleet:
//! a fixed-size witness committee produces blocks in round-robin order,
//! the committee itself is re-elected every few rounds by an STV vote
//! among the full membership, and underperforming witnesses are
//! downgraded in favor of a waiting candidate queue.
//!
//! ## Architecture
//!
//! - **config** — every timing and sizing constant the algorithm depends on.
//! - **crypto** — the one hash primitive consensus needs (witness reshuffle,
//!   STV tie-break). Member signing/verification is the host runtime's job.
//! - **error** — the two error classes: fatal config errors, and retryable
//!   engine errors the driver logs and continues past.
//! - **types** — `Key`, `BlockId`, `Ballot`, `VoteResult`: the newtypes
//!   everything else is built from.
//! - **epoch** — the witness committee and candidate queue for one epoch.
//! - **voting** — ballot collection, STV tabulation, and consensus over
//!   peers' reported results.
//! - **node** — peer liveness/reputation tracking and this node's own
//!   top-level state machine.
//! - **block_cache** — the bounded, insertion-ordered cache fork
//!   resolution is computed against.
//! - **host** — the trait boundary to the host runtime (notifications in,
//!   block operations out), plus an in-memory test double.
//! - **messages** — the wire payloads exchanged with peers and embedded in
//!   finalized blocks.
//! - **metrics** — the `MetricsSink` trait the driver reports consensus
//!   events through; `ddpoa-node` supplies the real implementation.
//! - **overlay** — the peer connection table and broadcast fan-out.
//! - **driver** — the event loop tying all of the above together.
//!
//! ## Design Philosophy
//!
//! 1. Single-threaded consensus state: the driver loop is the only task
//!    that ever touches the epoch, voting system, or block cache.
//! 2. Every ordering decision (witness reshuffle, STV tie-break, peer
//!    result consensus) is deterministic given the same inputs — two
//!    nodes with the same view of the chain compute the same answer.
//! 3. A host notification or peer message that can't be handled right now
//!    is logged and the loop moves on; it does not take the node down.

pub mod block_cache;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod epoch;
pub mod error;
pub mod host;
pub mod messages;
pub mod metrics;
pub mod node;
pub mod overlay;
pub mod types;
pub mod voting;
