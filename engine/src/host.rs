//! The host-runtime interface: notifications the host pushes to this
//! engine, and operations this engine calls back into the host.
//!
//! Grounded on `original_source/consensus/pkg/engine/ddpoa_engine.py`'s
//! `self._service: ZmqService` calls (`get_chain_head`, `check_blocks`,
//! `finalize_block`, `commit_block`, `fail_block`, `ignore_block`, …) and the
//! Sawtooth consensus-engine wire contract they implement. The real wire
//! format (protobuf over a ZeroMQ `DEALER` socket to the validator's
//! component endpoint) is the host runtime's concern and out of scope here
//! (§1 Non-goals) — this module only defines the shape of that contract as
//! a Rust trait, so the driver loop can be written and tested against a
//! mock long before a concrete transport exists.

use async_trait::async_trait;

use crate::error::HostError;
use crate::types::{BlockId, Key};

/// A notification pushed by the host runtime.
#[derive(Debug, Clone)]
pub enum HostNotification {
    BlockNew { id: BlockId, previous_id: BlockId, block_num: u64, signer: Key },
    BlockValid { id: BlockId },
    BlockInvalid { id: BlockId },
    BlockCommit { id: BlockId },
    PeerConnected { peer: Key },
    PeerDisconnected { peer: Key },
}

/// Settings read from the host's settings service at startup (and whenever
/// the engine re-reads them after an epoch boundary).
#[derive(Debug, Clone)]
pub struct Settings {
    pub members: Vec<Key>,
    pub member_ips: Vec<String>,
    pub num_slots: usize,
}

/// The operations this engine calls on the host runtime. The host's own
/// block storage, transaction scheduling, and settings persistence are out
/// of scope (§1 Non-goals) — this trait only exposes the handful of calls
/// the consensus algorithm itself needs to drive block production and
/// fork resolution.
#[async_trait]
pub trait HostChannel: Send + Sync {
    /// Polls for the next notification, waiting up to `timeout` before
    /// returning `Ok(None)`. A timeout with nothing to report is a normal
    /// steady-state result, not an error.
    async fn poll(&mut self, timeout: std::time::Duration) -> Result<Option<HostNotification>, HostError>;

    async fn initialize_block(&mut self, previous_id: Option<BlockId>) -> Result<(), HostError>;

    /// Summarizes the block currently being built, returning its would-be
    /// id. `Ok(None)` means the block isn't ready yet (no transactions
    /// scheduled) — again a normal result, not an error.
    async fn summarize_block(&mut self) -> Result<Option<BlockId>, HostError>;

    async fn finalize_block(&mut self, consensus_data: Vec<u8>) -> Result<BlockId, HostError>;

    async fn cancel_block(&mut self) -> Result<(), HostError>;

    async fn check_blocks(&mut self, ids: Vec<BlockId>) -> Result<(), HostError>;

    async fn commit_block(&mut self, id: BlockId) -> Result<(), HostError>;

    async fn fail_block(&mut self, id: BlockId) -> Result<(), HostError>;

    async fn ignore_block(&mut self, id: BlockId) -> Result<(), HostError>;

    async fn get_blocks(&mut self, ids: Vec<BlockId>) -> Result<Vec<crate::block_cache::CachedBlock>, HostError>;

    async fn get_chain_head(&mut self) -> Result<crate::block_cache::CachedBlock, HostError>;

    async fn get_settings(&mut self) -> Result<Settings, HostError>;

    /// This validator's own member key, as the host runtime's registration
    /// handshake reports it. Cryptographic identity itself is out of scope
    /// (§1 Non-goals) — the host already authenticated this node before the
    /// engine ever started, so this is just a label lookup, not a key
    /// derivation.
    async fn local_peer_id(&mut self) -> Result<Key, HostError>;
}

/// An in-memory `HostChannel` double for driver tests: scripted
/// notifications fed in, every block operation recorded, no real
/// transport involved.
pub mod mock {
    use std::collections::VecDeque;

    use super::*;
    use crate::block_cache::CachedBlock;

    #[derive(Debug)]
    pub struct InMemoryHost {
        pub pending: VecDeque<HostNotification>,
        pub blocks: std::collections::HashMap<BlockId, CachedBlock>,
        pub chain_head: Option<BlockId>,
        pub settings: Option<Settings>,
        pub self_key: Key,
        pub committed: Vec<BlockId>,
        pub failed: Vec<BlockId>,
        pub ignored: Vec<BlockId>,
        pub next_block_id: Option<BlockId>,
        pub building: bool,
    }

    impl InMemoryHost {
        pub fn new(settings: Settings, genesis: CachedBlock) -> Self {
            Self::with_self_key(settings, genesis, Key::from("self"))
        }

        pub fn with_self_key(settings: Settings, genesis: CachedBlock, self_key: Key) -> Self {
            let id = genesis.id;
            let mut blocks = std::collections::HashMap::new();
            blocks.insert(id, genesis);
            Self {
                pending: VecDeque::new(),
                blocks,
                chain_head: Some(id),
                settings: Some(settings),
                self_key,
                committed: Vec::new(),
                failed: Vec::new(),
                ignored: Vec::new(),
                next_block_id: None,
                building: false,
            }
        }

        pub fn push(&mut self, n: HostNotification) {
            self.pending.push_back(n);
        }
    }

    #[async_trait]
    impl HostChannel for InMemoryHost {
        async fn poll(&mut self, _timeout: std::time::Duration) -> Result<Option<HostNotification>, HostError> {
            Ok(self.pending.pop_front())
        }

        async fn initialize_block(&mut self, _previous_id: Option<BlockId>) -> Result<(), HostError> {
            self.building = true;
            Ok(())
        }

        async fn summarize_block(&mut self) -> Result<Option<BlockId>, HostError> {
            if !self.building {
                return Err(HostError::InvalidState);
            }
            Ok(self.next_block_id)
        }

        async fn finalize_block(&mut self, _consensus_data: Vec<u8>) -> Result<BlockId, HostError> {
            if !self.building {
                return Err(HostError::InvalidState);
            }
            self.building = false;
            self.next_block_id.ok_or(HostError::BlockNotReady)
        }

        async fn cancel_block(&mut self) -> Result<(), HostError> {
            self.building = false;
            Ok(())
        }

        async fn check_blocks(&mut self, ids: Vec<BlockId>) -> Result<(), HostError> {
            for id in ids {
                if !self.blocks.contains_key(&id) {
                    return Err(HostError::UnknownBlock);
                }
            }
            Ok(())
        }

        async fn commit_block(&mut self, id: BlockId) -> Result<(), HostError> {
            self.chain_head = Some(id);
            self.committed.push(id);
            Ok(())
        }

        async fn fail_block(&mut self, id: BlockId) -> Result<(), HostError> {
            self.failed.push(id);
            Ok(())
        }

        async fn ignore_block(&mut self, id: BlockId) -> Result<(), HostError> {
            self.ignored.push(id);
            Ok(())
        }

        async fn get_blocks(&mut self, ids: Vec<BlockId>) -> Result<Vec<CachedBlock>, HostError> {
            ids.into_iter()
                .map(|id| self.blocks.get(&id).cloned().ok_or(HostError::UnknownBlock))
                .collect()
        }

        async fn get_chain_head(&mut self) -> Result<CachedBlock, HostError> {
            let id = self.chain_head.ok_or(HostError::InvalidState)?;
            self.blocks.get(&id).cloned().ok_or(HostError::UnknownBlock)
        }

        async fn get_settings(&mut self) -> Result<Settings, HostError> {
            self.settings.clone().ok_or(HostError::InvalidState)
        }

        async fn local_peer_id(&mut self) -> Result<Key, HostError> {
            Ok(self.self_key.clone())
        }
    }
}
