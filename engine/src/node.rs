//! Peer liveness tracking and the DDPoA node state machine.
//!
//! Grounded on `original_source/consensus/pkg/engine/consensus_node.py`'s
//! `PeerNode` and `ConsensusNode` classes. A `PeerNode` is this node's view
//! of one other member's liveness and trustworthiness; `DDPoANode` is the
//! top-level state this node itself cycles through as the driver observes
//! host notifications and peer messages.

use std::collections::HashMap;
use std::time::Instant;

use crate::types::Key;

/// This node's view of one peer: whether it currently looks reachable, when
/// it was last heard from, and a running reputation score in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct PeerNode {
    pub key: Key,
    pub online: bool,
    pub last_seen: Option<Instant>,
    pub score: f64,
}

impl PeerNode {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            online: false,
            last_seen: None,
            score: 1.0,
        }
    }

    pub fn mark_seen(&mut self, at: Instant) {
        self.online = true;
        self.last_seen = Some(at);
    }

    pub fn mark_offline(&mut self) {
        self.online = false;
    }

    /// Multiplies the score by 0.75, floored at 0 — applied when a peer
    /// misses a slot it was expected to produce, or fails a liveness
    /// check.
    pub fn penalize(&mut self) {
        self.score = (self.score * 0.75).max(0.0);
    }

    /// Multiplies the score by 1.075, capped at 1 — applied when a peer
    /// produces a valid block or otherwise behaves as expected.
    pub fn reward(&mut self) {
        self.score = (self.score * 1.075).min(1.0);
    }
}

/// The DDPoA engine's top-level state, driving which host notifications and
/// peer messages are meaningful at any given moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No epoch initialized yet; waiting on host settings / genesis.
    Idle,
    /// Voting gate is open: collecting ballots and peer results for the
    /// next epoch's candidate order.
    Election,
    /// Steady-state block production under the current witness rotation.
    Production,
    /// This node has fallen behind and is waiting for a `Bootstrap`
    /// response from a peer before it can resume.
    WaitingForBootstrap,
    /// This node has received enough chain information to replay missing
    /// blocks and is doing so before rejoining `Production`.
    CatchingUp,
}

/// Tracks this node's own state and its table of known peers.
#[derive(Debug)]
pub struct DdpoaNode {
    pub self_key: Key,
    pub state: NodeState,
    pub peers: HashMap<Key, PeerNode>,
    pub waiting_for_own_block: bool,
    pub waiting_for_validation: u32,
    pub waiting_for_commit: u32,
}

impl DdpoaNode {
    pub fn new(self_key: Key) -> Self {
        Self {
            self_key,
            state: NodeState::Idle,
            peers: HashMap::new(),
            waiting_for_own_block: false,
            waiting_for_validation: 0,
            waiting_for_commit: 0,
        }
    }

    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    pub fn ensure_peer(&mut self, key: &Key) -> &mut PeerNode {
        self.peers
            .entry(key.clone())
            .or_insert_with(|| PeerNode::new(key.clone()))
    }

    pub fn peer_online(&self, key: &Key) -> bool {
        self.peers.get(key).map(|p| p.online).unwrap_or(false)
    }

    pub fn peer_score(&self, key: &Key) -> f64 {
        self.peers.get(key).map(|p| p.score).unwrap_or(1.0)
    }

    pub fn scores(&self) -> HashMap<Key, f64> {
        self.peers.iter().map(|(k, p)| (k.clone(), p.score)).collect()
    }

    /// Count of peers this node considers online, plus one for itself — the
    /// convention used throughout quorum math (§9: "online_peers includes
    /// self").
    pub fn online_peers(&self) -> usize {
        self.peers.values().filter(|p| p.online).count() + 1
    }

    pub fn penalize(&mut self, key: &Key) {
        self.ensure_peer(key).penalize();
    }

    pub fn reward(&mut self, key: &Key) {
        self.ensure_peer(key).reward();
    }
}
