//! The main cooperative event loop: polls the host for notifications,
//! drains the peer overlay's inbound queue, and drives slot timing, voting,
//! and catch-up.
//!
//! Grounded on `original_source/consensus/pkg/engine/ddpoa_engine.py` (the
//! `DDPoAEngine.run` loop) and on the `tokio::select!` shutdown/poll shape of
//! `examples/alissonlinneker-nova-protocol/protocol/src/network/consensus_loop.rs`.
//! This crate runs the loop on a single Tokio task rather than spreading
//! handlers across a worker pool — consensus state (epoch, voting system,
//! block cache, node table) is only ever touched from this one task, so no
//! locking is needed around it; the peer overlay and its per-peer tasks
//! communicate in over a channel instead of sharing that state directly.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::block_cache::{BlockCache, CachedBlock};
use crate::config::{
    BLOCK_INTERVAL, BOOTSTRAP_REQUEST_INTERVAL, BOOTSTRAP_REQUEST_THROTTLE, HOST_POLL_TIMEOUT,
    PEER_CHECK_INTERVAL, REBROADCAST_BALLOT_INTERVAL, SLOT_TIMEOUT, STARTUP_GRACE_PERIOD,
    VOTE_RESULT_TIMER, VOTING_SLOTS, consensus_identifier,
};
use crate::epoch::Epoch;
use crate::error::EngineError;
use crate::host::{HostChannel, HostNotification, Settings};
use crate::messages::{ConsensusData, ConsensusMessage, Envelope};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::node::{DdpoaNode, NodeState};
use crate::overlay::PeerOverlay;
use crate::types::{BlockId, Key};
use crate::voting::VotingSystem;

/// Everything the driver loop needs to run: the host connection, the peer
/// overlay's inbound channel, and all consensus state. Owned exclusively
/// by `Driver::run` — nothing here is shared across tasks.
pub struct Driver<H: HostChannel> {
    host: H,
    overlay: PeerOverlay,
    inbound: mpsc::Receiver<Envelope>,
    node: DdpoaNode,
    /// The full membership roster from the host's settings, used as the
    /// candidate pool for an election before any epoch has ever been
    /// initialized — `epoch.full_candidate_list()` is empty at genesis,
    /// since no one has been elected into a witness or candidate slot yet.
    members: Vec<Key>,
    epoch: Epoch,
    voting: VotingSystem,
    cache: BlockCache,
    rng: StdRng,

    started_at: Instant,
    last_slot_start: Option<Instant>,
    last_ballot_broadcast: Option<Instant>,
    vote_quorum_reached_at: Option<Instant>,
    last_bootstrap_request: Option<Instant>,
    last_peer_check: Option<Instant>,
    pending_block_id: Option<BlockId>,
    own_ballot: Option<crate::types::Ballot>,
    pending_epoch_candidates: Option<Vec<Key>>,
    metrics: Arc<dyn MetricsSink>,
}

impl<H: HostChannel> Driver<H> {
    pub fn new(
        self_key: Key,
        host: H,
        overlay: PeerOverlay,
        inbound: mpsc::Receiver<Envelope>,
        settings: Settings,
    ) -> Self {
        Self {
            host,
            overlay,
            inbound,
            node: DdpoaNode::new(self_key),
            members: settings.members.clone(),
            epoch: Epoch::new(0, settings.num_slots),
            voting: VotingSystem::new(),
            cache: BlockCache::new(),
            rng: StdRng::from_entropy(),
            started_at: Instant::now(),
            last_slot_start: None,
            last_ballot_broadcast: None,
            vote_quorum_reached_at: None,
            last_bootstrap_request: None,
            last_peer_check: None,
            pending_block_id: None,
            own_ballot: None,
            pending_epoch_candidates: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Wires a metrics backend in place of the default no-op sink. Used by
    /// `ddpoa-node` to report consensus events to its `prometheus`
    /// registry; tests and anything else that doesn't care about
    /// observability can skip this call.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Overrides the state a freshly constructed driver starts in. Used at
    /// process startup (spec §4.3) when the host's chain head is already
    /// past genesis: a node rejoining a running network needs to bootstrap
    /// from peers before it can trust its own view of the chain, rather
    /// than assuming it's starting the very first epoch.
    pub fn set_initial_state(&mut self, state: NodeState) {
        self.node.set_state(state);
    }

    /// Runs until `shutdown` reports `true`. Each iteration: poll the host
    /// with a short timeout, drain any ready peer messages, then run the
    /// slot/voting/bootstrap timers — mirroring the original engine's
    /// single-threaded `while True` loop with a bounded-timeout queue read.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), EngineError> {
        info!(consensus = %consensus_identifier(), "driver loop starting");
        loop {
            if *shutdown.borrow() {
                info!("shutdown requested, exiting driver loop");
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown requested, exiting driver loop");
                        return Ok(());
                    }
                }
                notification = self.host.poll(HOST_POLL_TIMEOUT) => {
                    match notification {
                        Ok(Some(n)) => self.handle_host_notification(n).await?,
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "host poll failed"),
                    }
                }
                Some(envelope) = self.inbound.recv() => {
                    self.handle_peer_message(envelope).await?;
                }
            }

            self.drain_inbound().await?;
            self.tick().await?;
        }
    }

    /// Drains every peer message already queued, without blocking — the
    /// `select!` above only guarantees at least one is handled per
    /// iteration; this catches up the rest before the timers run.
    async fn drain_inbound(&mut self) -> Result<(), EngineError> {
        while let Ok(envelope) = self.inbound.try_recv() {
            self.handle_peer_message(envelope).await?;
        }
        Ok(())
    }

    // ---- host notification handlers (spec §4.5) ----

    async fn handle_host_notification(&mut self, n: HostNotification) -> Result<(), EngineError> {
        match n {
            HostNotification::BlockNew { id, previous_id, block_num, signer } => {
                self.on_block_new(id, previous_id, block_num, signer).await
            }
            HostNotification::BlockValid { id } => self.on_block_valid(id).await,
            HostNotification::BlockInvalid { id } => self.on_block_invalid(id).await,
            HostNotification::BlockCommit { id } => self.on_block_commit(id).await,
            HostNotification::PeerConnected { peer } => {
                self.node.ensure_peer(&peer).mark_seen(Instant::now());
                Ok(())
            }
            HostNotification::PeerDisconnected { peer } => {
                self.node.ensure_peer(&peer).mark_offline();
                Ok(())
            }
        }
    }

    /// spec §4.5 NEW block handling. A non-member signer is failed outright
    /// (the host already filters most of these, but a late settings change
    /// can leave a stale signer in flight). A block only becomes a
    /// validation candidate when it's exactly one past our own tip *and*
    /// signed by the witness we currently expect — anything else is cache
    /// material only. Once that's settled, a block whose number jumps
    /// further ahead than one past our own tip, with nothing else already
    /// outstanding, means we're either lagging or looking at a fork the
    /// shallow cache can't resolve locally (§9 Open Question) — either way
    /// the fix is the same `BOOTSTRAP_REQUEST`, throttled so a burst of
    /// such blocks doesn't flood the overlay.
    async fn on_block_new(
        &mut self,
        id: BlockId,
        previous_id: BlockId,
        block_num: u64,
        signer: Key,
    ) -> Result<(), EngineError> {
        if !self.members.contains(&signer) {
            self.host.fail_block(id).await?;
            return Ok(());
        }
        self.node.ensure_peer(&signer).mark_seen(Instant::now());
        self.cache.insert(CachedBlock { id, previous_id, block_num, signer: signer.clone() });

        let head = self.host.get_chain_head().await?;
        let expected = self.epoch.current_witness().cloned();
        if previous_id == head.id && block_num == head.block_num + 1 && Some(&signer) == expected.as_ref() {
            if self.node.waiting_for_own_block {
                self.node.waiting_for_own_block = signer != self.node.self_key;
            }
            self.node.waiting_for_validation += 1;
            self.host.check_blocks(vec![id]).await?;
        }

        if matches!(self.node.state, NodeState::WaitingForBootstrap | NodeState::CatchingUp) {
            // Bootstrap/catch-up replay is driven entirely by the
            // BOOTSTRAP/BOOTSTRAP_REQUEST exchange and the cached path it
            // resolves against; a block arriving on its own here is just
            // extra cache material, not something to validate yet.
            return Ok(());
        }

        let nothing_outstanding = !self.node.waiting_for_own_block
            && self.node.waiting_for_validation == 0
            && self.node.waiting_for_commit == 0;
        if block_num > head.block_num + 1 && nothing_outstanding {
            self.maybe_request_bootstrap(head.id).await?;
        }
        Ok(())
    }

    /// Broadcasts a throttled `BOOTSTRAP_REQUEST` (spec §4.5: "once per 6s").
    async fn maybe_request_bootstrap(&mut self, from_block: BlockId) -> Result<(), EngineError> {
        let now = Instant::now();
        let should_request = self
            .last_bootstrap_request
            .map(|t| now.duration_since(t) >= BOOTSTRAP_REQUEST_THROTTLE)
            .unwrap_or(true);
        if should_request {
            self.last_bootstrap_request = Some(now);
            let envelope = Envelope {
                signer: self.node.self_key.clone(),
                timestamp_ms: now_ms(),
                payload: ConsensusMessage::BootstrapRequest { from_block },
            };
            self.overlay.broadcast(&envelope).await;
        }
        Ok(())
    }

    /// spec §4.5 VALID block handling. A node still `CatchingUp` commits
    /// straight through as long as the block extends our current head —
    /// fork resolution already happened in `handle_bootstrap_response`, so
    /// this is just replay. Otherwise the block only commits if it's
    /// signed by the witness we expect *and* extends our head by exactly
    /// one — a strict lineage check, not a "longest chain wins" heuristic,
    /// since round-robin PoA has exactly one correct next block per slot.
    async fn on_block_valid(&mut self, id: BlockId) -> Result<(), EngineError> {
        self.node.waiting_for_validation = self.node.waiting_for_validation.saturating_sub(1);

        let head = self.host.get_chain_head().await?;
        let Some(cached) = self.cache.get(&id).cloned() else {
            self.host.fail_block(id).await?;
            return Ok(());
        };

        if matches!(self.node.state, NodeState::CatchingUp) && cached.previous_id == head.id {
            self.host.commit_block(id).await?;
            return Ok(());
        }

        let correct_signer = self.epoch.current_witness() == Some(&cached.signer);
        let correct_id = cached.previous_id == head.id;
        let correct_num = cached.block_num == head.block_num + 1;

        if correct_signer && correct_id && correct_num {
            self.node.waiting_for_commit += 1;
            self.host.commit_block(id).await?;
        } else {
            self.host.fail_block(id).await?;
        }
        Ok(())
    }

    /// spec §4.5 INVALID block handling. The host already rejected this
    /// block outright, so there's nothing further to tell it — the engine's
    /// own job is to penalize and demote the signer and move the slot
    /// cursor on, exactly as a missed slot would (`tick_production`'s own
    /// timeout path), just triggered by invalidity instead of a timeout.
    async fn on_block_invalid(&mut self, id: BlockId) -> Result<(), EngineError> {
        self.node.waiting_for_validation = self.node.waiting_for_validation.saturating_sub(1);
        if let Some(cached) = self.cache.get(&id).cloned() {
            self.node.penalize(&cached.signer);
            self.epoch.downgrade_witness(&cached.signer);
        }
        let head = self.host.get_chain_head().await?;
        self.advance_slot(head.id);
        Ok(())
    }

    /// Advances the slot cursor by one, seeded by `seed` (the current chain
    /// head id, matching `_next_slot`'s `pre_committed_block[0]` seed) and
    /// resets the slot clock. Shared by every path that ends a slot without
    /// that slot producing a new head of its own: a commit, a missed slot,
    /// an invalid block, or a peer's `EMPTY_SLOT`.
    fn advance_slot(&mut self, seed: BlockId) {
        match self.epoch.increment_witness(&seed.to_hex()) {
            Ok(true) => self.metrics.witness_reshuffled(),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "failed to advance witness rotation"),
        }
        self.last_slot_start = Some(Instant::now());
    }

    async fn on_block_commit(&mut self, id: BlockId) -> Result<(), EngineError> {
        self.node.waiting_for_commit = self.node.waiting_for_commit.saturating_sub(1);
        if self.node.waiting_for_own_block && Some(id) == self.pending_block_id {
            self.node.waiting_for_own_block = false;
            self.pending_block_id = None;
            self.metrics.block_produced();
        }
        if let Some(cached) = self.cache.get(&id).cloned() {
            self.node.reward(&cached.signer);
            self.advance_slot(cached.id);
        }

        // A safety net for the case where `tick_production`'s own
        // near-end-of-epoch transition hasn't fired yet (or, at genesis,
        // where there's no witness list to count slots against at all).
        // Once an election has already converged (`pending_epoch_candidates`
        // is set) the node is deliberately holding in IDLE for
        // `tick_idle` to finish the transition — this must not re-fire
        // ELECTION underneath it.
        let already_awaiting_epoch_init = self.pending_epoch_candidates.is_some();
        let mid_catchup =
            matches!(self.node.state, NodeState::CatchingUp | NodeState::WaitingForBootstrap);
        if self.epoch.is_over() && !already_awaiting_epoch_init && !mid_catchup {
            self.node.set_state(NodeState::Election);
        }
        Ok(())
    }

    // ---- peer message handlers (spec §4.6) ----

    async fn handle_peer_message(&mut self, envelope: Envelope) -> Result<(), EngineError> {
        self.node.ensure_peer(&envelope.signer).mark_seen(Instant::now());
        match envelope.payload {
            ConsensusMessage::Vote { epoch, ballot } => {
                // Stale or premature ballots (wrong epoch number) are
                // silently dropped rather than accumulated against the
                // wrong tally.
                if epoch == self.epoch.next_epoch_number() {
                    self.voting.add_ballot(epoch, envelope.signer, ballot);
                }
            }
            ConsensusMessage::VoteResult { epoch, result } => {
                if epoch == self.epoch.next_epoch_number() {
                    self.voting.set_peer_result(epoch, envelope.signer, result);
                }
            }
            ConsensusMessage::EmptySlot { .. } => {
                // Only the witness we're actually expecting gets to advance
                // the slot this way — an empty-slot claim from anyone else
                // is either stale or wrong and is ignored.
                if Some(&envelope.signer) == self.epoch.current_witness() {
                    let head = self.host.get_chain_head().await?;
                    self.advance_slot(head.id);
                }
            }
            ConsensusMessage::BootstrapRequest { from_block } => {
                self.respond_to_bootstrap_request(envelope.signer, from_block).await?;
            }
            ConsensusMessage::Bootstrap { chain_head_id, num_blocks, pre_id } => {
                self.handle_bootstrap_response(chain_head_id, num_blocks, pre_id).await?;
            }
        }
        Ok(())
    }

    async fn respond_to_bootstrap_request(
        &mut self,
        requester: Key,
        from_block: BlockId,
    ) -> Result<(), EngineError> {
        let head = self.host.get_chain_head().await?;
        let num_blocks = self
            .cache
            .block_path(&head.id, &from_block)
            .map(|path| path.len() as u64)
            .unwrap_or(0);
        let pre_id = self
            .cache
            .get(&head.id)
            .map(|b| b.previous_id)
            .unwrap_or(head.previous_id);

        let envelope = Envelope {
            signer: self.node.self_key.clone(),
            timestamp_ms: now_ms(),
            payload: ConsensusMessage::Bootstrap { chain_head_id: head.id, num_blocks, pre_id },
        };
        let _ = self.overlay.send_to(&requester, &envelope).await;
        Ok(())
    }

    /// Fastforward/catch-up resolution (spec §4.7), case analysis:
    /// 1. The reported chain head is already reachable from our own cache
    ///    — nothing to do, we're current.
    /// 2. It's reachable via a common ancestor further back — walk both
    ///    paths to the fork point and replay from there.
    /// 3. Neither — this is a bootstrap-only catch-up: request blocks and
    ///    wait, replaying whatever the cache eventually holds in order.
    async fn handle_bootstrap_response(
        &mut self,
        chain_head_id: BlockId,
        num_blocks: u64,
        pre_id: BlockId,
    ) -> Result<(), EngineError> {
        let head = self.host.get_chain_head().await?;

        // Try the reported head first; if our cache can't place it (the
        // responder has since moved on), fall back to its predecessor —
        // counting both the head and its predecessor as candidate targets
        // is what lets a requester catch up even when the first response
        // it sees is already one reorg stale.
        for target in [chain_head_id, pre_id] {
            if self.cache.traversable(&target, &head.id) {
                // Our head is already an ancestor of theirs (or equal); no
                // fork, nothing to replay.
                self.node.set_state(NodeState::Production);
                return Ok(());
            }

            if let Some(path) = self.cache.block_path(&target, &head.id) {
                // Common ancestor found within the cache. Replay the
                // reported chain from the fork point forward.
                self.node.set_state(NodeState::CatchingUp);
                let ids: Vec<BlockId> = path.into_iter().rev().collect();
                let blocks = self.host.get_blocks(ids).await?;
                for block in blocks {
                    self.host.check_blocks(vec![block.id]).await?;
                }
                self.node.set_state(NodeState::Production);
                return Ok(());
            }
        }

        // Neither target shares history with our cache. Best-effort
        // replay: request the num_blocks-deep history and catch up once
        // it arrives, without a priority queue (§9 Open Question: shallow
        // cache, no priority reordering — accepted as-is).
        self.node.set_state(NodeState::WaitingForBootstrap);
        self.maybe_request_bootstrap(head.id).await?;
        let _ = num_blocks;
        Ok(())
    }

    // ---- per-tick timers ----

    async fn tick(&mut self) -> Result<(), EngineError> {
        self.metrics.set_peers_online(self.node.online_peers() as i64);

        if self.started_at.elapsed() < STARTUP_GRACE_PERIOD {
            return Ok(());
        }

        if !matches!(self.node.state, NodeState::WaitingForBootstrap | NodeState::CatchingUp) {
            self.check_on_peers();
        }

        match self.node.state {
            NodeState::Idle => self.tick_idle().await?,
            NodeState::Election => self.tick_election().await?,
            NodeState::Production => self.tick_production().await?,
            NodeState::WaitingForBootstrap => self.tick_bootstrap_wait().await?,
            NodeState::CatchingUp => {}
        }
        Ok(())
    }

    /// spec §4.4 periodic peer health check, grounded on
    /// `ConsensusNode.check_on_peers`: gated to once per
    /// `PEER_CHECK_INTERVAL` and skipped while bootstrapping or catching
    /// up, same as the original's placement in its main run loop. Per §5's
    /// concurrency model, the overlay's background ping sweep is only
    /// advisory — this is the one place `DdpoaNode`'s liveness table is
    /// actually written, reconciled here against `PeerOverlay::online`.
    fn check_on_peers(&mut self) {
        let now = Instant::now();
        let due = self
            .last_peer_check
            .map(|t| now.duration_since(t) >= PEER_CHECK_INTERVAL)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_peer_check = Some(now);
        for member in self.members.clone() {
            if member == self.node.self_key {
                continue;
            }
            if self.overlay.online(&member) {
                self.node.ensure_peer(&member).mark_seen(now);
            } else {
                self.node.ensure_peer(&member).mark_offline();
            }
        }
    }

    /// IDLE holds between a converged election and the moment the current
    /// epoch's slots actually run out: results for the next epoch may well
    /// have arrived before the last block of this one is committed. Once
    /// `epoch.is_over()` is also true, `initialize_epoch` installs the
    /// waiting candidate list and returns to PRODUCTION.
    ///
    /// `epoch.is_over()` is also (trivially) true before the very first
    /// epoch is ever initialized — an empty witness list satisfies
    /// `0 >= 0`. Rather than special-casing genesis startup, IDLE treats
    /// "no converged result yet, and the current epoch has no slots left
    /// to run" as the same condition that needs an election running,
    /// whether that's because this is the very first epoch or because the
    /// current one just ran out.
    async fn tick_idle(&mut self) -> Result<(), EngineError> {
        if let Some(candidates) = self.pending_epoch_candidates.take() {
            if self.epoch.is_over() {
                self.initialize_epoch(candidates);
            } else {
                self.pending_epoch_candidates = Some(candidates);
            }
            return Ok(());
        }
        if self.epoch.is_over() {
            self.tick_election().await?;
        }
        Ok(())
    }

    /// Epoch initialization (spec §4.4): fresh `Epoch`, new witness/candidate
    /// split, old voting data purged, state returns to PRODUCTION.
    fn initialize_epoch(&mut self, candidates: Vec<Key>) {
        self.epoch = Epoch::new(self.epoch.next_epoch_number(), self.epoch.num_slots);
        self.epoch.set_candidates_and_witnesses(&candidates);
        self.voting.remove_old_epoch_data();
        self.node.set_state(NodeState::Production);
        self.metrics.epoch_completed();
        self.metrics.set_epoch_number(self.epoch.number as i64);
    }

    async fn tick_election(&mut self) -> Result<(), EngineError> {
        // Voting is always for the *next* epoch's candidate order, even
        // while the current one is still producing blocks — an epoch near
        // its end runs its own production ticks and an election tick in
        // parallel, converging before the last slot of the current epoch
        // commits.
        let epoch_num = self.epoch.next_epoch_number();
        let candidates = if self.epoch.is_initialized() {
            self.epoch.full_candidate_list()
        } else {
            self.members.clone()
        };
        self.voting.set_candidates(epoch_num, candidates);

        if !self.voting.has_voted(epoch_num, &self.node.self_key) {
            let scores = self.node.scores();
            let ballot = self.voting.fill_ballot(epoch_num, &scores, &mut self.rng);
            self.voting.add_ballot(epoch_num, self.node.self_key.clone(), ballot.clone());
            self.own_ballot = Some(ballot.clone());
            self.broadcast_vote(epoch_num, ballot).await;
        }

        let should_rebroadcast = self
            .last_ballot_broadcast
            .map(|t| t.elapsed() >= REBROADCAST_BALLOT_INTERVAL)
            .unwrap_or(true);
        if should_rebroadcast {
            if let Some(ballot) = self.own_ballot.clone() {
                self.broadcast_vote(epoch_num, ballot).await;
            }
        }

        let member_count = self.node.online_peers();

        if self.voting.has_enough_ballots(epoch_num, self.epoch.num_slots, member_count)
            && self.voting.own_result(epoch_num).is_none()
        {
            let result = self.voting.calculate_result(epoch_num);
            self.broadcast_result(epoch_num, result).await;
            self.vote_quorum_reached_at = Some(Instant::now());
        }

        if let Some(reached_at) = self.vote_quorum_reached_at {
            if reached_at.elapsed() >= VOTE_RESULT_TIMER
                && self.voting.has_enough_similar_results(epoch_num, self.epoch.num_slots, member_count)
            {
                if let Some(consensus) = self.voting.get_consensus_result(epoch_num) {
                    self.vote_quorum_reached_at = None;
                    self.own_ballot = None;
                    self.pending_epoch_candidates = Some(consensus.as_slice().to_vec());
                    self.node.set_state(NodeState::Idle);
                }
            }
        }
        Ok(())
    }

    async fn tick_production(&mut self) -> Result<(), EngineError> {
        if self.epoch.slots_remaining_in_epoch() <= VOTING_SLOTS as i64 {
            self.node.set_state(NodeState::Election);
            return Ok(());
        }

        let Some(current) = self.epoch.current_witness().cloned() else {
            self.node.set_state(NodeState::Idle);
            return Ok(());
        };

        let slot_elapsed = self
            .last_slot_start
            .map(|t| t.elapsed())
            .unwrap_or(Duration::from_secs(0));

        if current == self.node.self_key {
            if !self.node.waiting_for_own_block && slot_elapsed >= BLOCK_INTERVAL {
                self.produce_block().await?;
            }
        } else if slot_elapsed >= SLOT_TIMEOUT {
            // The expected signer missed its slot entirely.
            self.node.penalize(&current);
            self.epoch.downgrade_witness(&current);
            self.last_slot_start = Some(Instant::now());
            self.metrics.slot_missed();
        }
        Ok(())
    }

    async fn tick_bootstrap_wait(&mut self) -> Result<(), EngineError> {
        let should_request = self
            .last_bootstrap_request
            .map(|t| t.elapsed() >= BOOTSTRAP_REQUEST_INTERVAL)
            .unwrap_or(true);
        if should_request {
            let head = self.host.get_chain_head().await?;
            self.last_bootstrap_request = Some(Instant::now());
            let envelope = Envelope {
                signer: self.node.self_key.clone(),
                timestamp_ms: now_ms(),
                payload: ConsensusMessage::BootstrapRequest { from_block: head.id },
            };
            self.overlay.broadcast(&envelope).await;
        }
        Ok(())
    }

    async fn produce_block(&mut self) -> Result<(), EngineError> {
        let head = self.host.get_chain_head().await?;
        self.host.initialize_block(Some(head.id)).await?;

        let Some(block_id) = self.host.summarize_block().await? else {
            // No transactions scheduled: broadcast EmptySlot and cancel,
            // rather than waiting out the full slot timeout.
            self.host.cancel_block().await?;
            let envelope = Envelope {
                signer: self.node.self_key.clone(),
                timestamp_ms: now_ms(),
                payload: ConsensusMessage::EmptySlot {
                    epoch: self.epoch.number,
                    witness_idx: self.epoch.current_witness_idx,
                },
            };
            self.overlay.broadcast(&envelope).await;
            self.last_slot_start = Some(Instant::now());
            self.metrics.empty_slot();
            return Ok(());
        };

        let data = ConsensusData {
            timestamp_ms: now_ms(),
            epoch: self.epoch.number,
            witness_idx: self.epoch.current_witness_idx,
            candidates: self.epoch.full_candidate_list(),
            num_slots: self.epoch.num_slots,
            consensus: consensus_identifier(),
        };
        let payload = bincode::serialize(&data)
            .map_err(|e| EngineError::MalformedConsensusData(e.to_string()))?;

        let finalized = self.host.finalize_block(payload).await?;
        self.pending_block_id = Some(finalized);
        self.node.waiting_for_own_block = true;
        let _ = block_id;
        Ok(())
    }

    async fn broadcast_vote(&mut self, epoch: u64, ballot: crate::types::Ballot) {
        self.last_ballot_broadcast = Some(Instant::now());
        let envelope = Envelope {
            signer: self.node.self_key.clone(),
            timestamp_ms: now_ms(),
            payload: ConsensusMessage::Vote { epoch, ballot },
        };
        self.overlay.broadcast(&envelope).await;
    }

    async fn broadcast_result(&mut self, epoch: u64, result: crate::types::VoteResult) {
        let envelope = Envelope {
            signer: self.node.self_key.clone(),
            timestamp_ms: now_ms(),
            payload: ConsensusMessage::VoteResult { epoch, result },
        };
        self.overlay.broadcast(&envelope).await;
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::mock::InMemoryHost;
    use crate::host::Settings;

    fn genesis() -> CachedBlock {
        CachedBlock {
            id: BlockId::genesis(),
            previous_id: BlockId::genesis(),
            block_num: 0,
            signer: Key::from("genesis"),
        }
    }

    fn settings() -> Settings {
        Settings {
            members: vec![Key::from("self")],
            member_ips: vec!["127.0.0.1".into()],
            num_slots: 1,
        }
    }

    #[tokio::test]
    async fn new_driver_starts_idle() {
        let host = InMemoryHost::new(settings(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let driver = Driver::new(Key::from("self"), host, overlay, inbound, settings());
        assert!(matches!(driver.node.state, NodeState::Idle));
    }

    #[tokio::test]
    async fn tick_idle_waits_for_epoch_over_before_initializing() {
        let host = InMemoryHost::new(settings(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, settings());

        driver.node.set_state(NodeState::Idle);
        driver.pending_epoch_candidates = Some(vec![Key::from("self")]);
        // Fake a still-running epoch: one witness, one round left.
        driver.epoch.set_candidates_and_witnesses(&[Key::from("self")]);

        driver.tick_idle().await.unwrap();
        assert!(
            matches!(driver.node.state, NodeState::Idle),
            "epoch not over yet, the pending candidates must keep waiting"
        );
        assert!(driver.pending_epoch_candidates.is_some());

        // Exhaust the epoch's rounds so `is_over()` flips true.
        while !driver.epoch.is_over() {
            driver.epoch.increment_witness("seed").unwrap();
        }
        driver.tick_idle().await.unwrap();
        assert!(matches!(driver.node.state, NodeState::Production));
        assert!(driver.pending_epoch_candidates.is_none());
        assert_eq!(driver.epoch.witnesses, vec![Key::from("self")]);
    }

    /// A freshly constructed driver has no epoch at all (`witnesses` is
    /// empty, which also makes `epoch.is_over()` trivially true). IDLE must
    /// treat that the same as "an epoch just ended" and start an election
    /// rather than waiting forever for `pending_epoch_candidates`, which
    /// nothing would otherwise ever populate.
    #[tokio::test]
    async fn tick_idle_starts_an_election_at_genesis_instead_of_deadlocking() {
        let host = InMemoryHost::new(settings(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, settings());

        assert!(driver.pending_epoch_candidates.is_none());
        assert!(!driver.epoch.is_initialized());

        driver.tick_idle().await.unwrap();

        assert!(
            driver.own_ballot.is_some(),
            "genesis IDLE must cast a ballot for epoch 1 instead of deadlocking"
        );
        assert!(driver.voting.has_voted(1, &Key::from("self")));
    }

    #[tokio::test]
    async fn on_block_new_drops_non_member_signer() {
        let host = InMemoryHost::new(settings(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, settings());

        let stray = BlockId::from_bytes([7u8; 32]);
        driver
            .on_block_new(stray, BlockId::genesis(), 1, Key::from("stranger"))
            .await
            .unwrap();

        assert!(!driver.cache.contains(&stray), "non-member block must not be cached");
        assert_eq!(driver.node.waiting_for_validation, 0);
    }

    #[tokio::test]
    async fn on_block_new_requests_bootstrap_on_a_block_number_gap() {
        let mut s = settings();
        s.members = vec![Key::from("self"), Key::from("peer")];
        let host = InMemoryHost::new(s.clone(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, s);

        assert!(driver.last_bootstrap_request.is_none());
        let jump = BlockId::from_bytes([5u8; 32]);
        driver
            .on_block_new(jump, BlockId::from_bytes([4u8; 32]), 5, Key::from("peer"))
            .await
            .unwrap();

        assert_eq!(
            driver.node.waiting_for_validation, 0,
            "a block number gap is treated as a bootstrap trigger, not a validation candidate"
        );
        assert!(driver.last_bootstrap_request.is_some());
    }

    /// Election ballots must be cast for `next_epoch_number`, not the
    /// current (possibly still-running) epoch number.
    #[tokio::test]
    async fn tick_election_votes_for_next_epoch_number_not_current() {
        let host = InMemoryHost::new(settings(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, settings());
        driver.epoch.set_candidates_and_witnesses(&[Key::from("self")]);
        assert_eq!(driver.epoch.number, 0);

        driver.tick_election().await.unwrap();

        assert!(driver.voting.has_voted(1, &Key::from("self")));
        assert!(!driver.voting.has_voted(0, &Key::from("self")));
    }

    /// S2 - a missed slot: the expected witness never produces, the slot
    /// timeout elapses, and `tick_production` penalizes and downgrades it
    /// and resets the slot clock — driven through the real handler rather
    /// than the bare `PeerNode`/`Epoch` primitives.
    #[tokio::test]
    async fn tick_production_penalizes_downgrades_and_advances_slot_on_missed_slot() {
        let mut s = settings();
        s.members = vec![Key::from("self"), Key::from("b"), Key::from("x")];
        let host = InMemoryHost::new(s.clone(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, s);

        driver.epoch = Epoch::new(3, 3);
        driver.epoch.set_candidates_and_witnesses(&[
            Key::from("b"),
            Key::from("self"),
            Key::from("x"),
            Key::from("spare"),
        ]);
        driver.node.set_state(NodeState::Production);
        driver.last_slot_start = Some(Instant::now() - SLOT_TIMEOUT - Duration::from_secs(1));

        let missed = Key::from("b");
        let before_score = driver.node.peer_score(&missed);

        driver.tick_production().await.unwrap();

        assert!(
            driver.node.peer_score(&missed) < before_score,
            "the expected witness must be penalized for missing its slot"
        );
        assert!(!driver.epoch.is_witness(&missed), "a missed-slot witness is downgraded out of the committee");
        assert!(
            driver.last_slot_start.unwrap().elapsed() < SLOT_TIMEOUT,
            "the slot clock must reset once the miss is handled"
        );
    }

    /// S3 - fork detected on NEW: a block whose number jumps ahead of our
    /// tip, with a parent our cache has never seen, reads the same as a
    /// fork the shallow cache can't resolve — it's cached but a
    /// `BOOTSTRAP_REQUEST` fires rather than handing it to `check_blocks`.
    #[tokio::test]
    async fn on_block_new_requests_bootstrap_when_fork_breaks_lineage() {
        let mut s = settings();
        s.members = vec![Key::from("self"), Key::from("peer")];
        let host = InMemoryHost::new(s.clone(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, s);

        let unseen_parent = BlockId::from_bytes([0xCC; 32]);
        let forked = BlockId::from_bytes([0xDD; 32]);
        assert!(driver.last_bootstrap_request.is_none());

        driver
            .on_block_new(forked, unseen_parent, 2, Key::from("peer"))
            .await
            .unwrap();

        assert!(driver.cache.contains(&forked), "the block is cached even though it can't be validated yet");
        assert_eq!(
            driver.node.waiting_for_validation, 0,
            "a fork candidate is never handed to check_blocks directly"
        );
        assert!(driver.last_bootstrap_request.is_some());
    }

    /// A block at the *same* height as our next slot but forking off a
    /// parent we've never seen is not a number gap by the
    /// `block_num > head.block_num + 1` test, so it must not trigger a
    /// bootstrap request either — it just sits in the cache.
    #[tokio::test]
    async fn on_block_new_same_height_fork_does_not_trigger_bootstrap() {
        let mut s = settings();
        s.members = vec![Key::from("self"), Key::from("peer")];
        let host = InMemoryHost::new(s.clone(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, s);

        let unseen_parent = BlockId::from_bytes([0xEE; 32]);
        let sibling = BlockId::from_bytes([0xFF; 32]);

        driver
            .on_block_new(sibling, unseen_parent, 1, Key::from("peer"))
            .await
            .unwrap();

        assert!(driver.cache.contains(&sibling));
        assert!(driver.last_bootstrap_request.is_none());
    }

    /// S6 - an invalid block: the host already rejected it, so
    /// `on_block_invalid` penalizes and downgrades the signer and advances
    /// the slot cursor, just like a missed slot (S2) but triggered by
    /// invalidity instead of a timeout.
    #[tokio::test]
    async fn on_block_invalid_penalizes_downgrades_and_advances_slot() {
        let mut s = settings();
        s.members = vec![Key::from("self"), Key::from("c"), Key::from("p")];
        let host = InMemoryHost::new(s.clone(), genesis());
        let (overlay, inbound) = PeerOverlay::spawn(Key::from("self"), 0, &[], &[]);
        let mut driver = Driver::new(Key::from("self"), host, overlay, inbound, s);

        driver.epoch = Epoch::new(5, 3);
        driver.epoch.set_candidates_and_witnesses(&[
            Key::from("c"),
            Key::from("self"),
            Key::from("p"),
            Key::from("spare"),
        ]);

        let bad = BlockId::from_bytes([0x11; 32]);
        driver.cache.insert(CachedBlock {
            id: bad,
            previous_id: BlockId::genesis(),
            block_num: 1,
            signer: Key::from("c"),
        });
        driver.node.waiting_for_validation = 1;
        let before_idx = driver.epoch.current_witness_idx;
        let before_score = driver.node.peer_score(&Key::from("c"));

        driver.on_block_invalid(bad).await.unwrap();

        assert!(driver.node.peer_score(&Key::from("c")) < before_score);
        assert!(!driver.epoch.is_witness(&Key::from("c")));
        assert_eq!(
            driver.epoch.current_witness_idx,
            before_idx + 1,
            "the slot cursor advances past the invalid block's slot"
        );
        assert_eq!(driver.node.waiting_for_validation, 0);
        assert!(driver.last_slot_start.is_some());
    }
}
