// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # ZMQ Host Channel
//!
//! Concrete `HostChannel` adapter dialing the validator's `-C/--connect`
//! endpoint and the `--component` endpoint with `zmq` DEALER sockets,
//! grounded on the socket setup in
//! `examples/chainflip-io-chainflip-backend/engine/src/p2p/core/socket.rs`
//! (linger-free DEALER, `DONTWAIT` sends). `zmq::Socket` is a blocking,
//! `!Send` C binding, so each endpoint gets its own dedicated OS thread
//! that owns the socket exclusively; the async engine talks to that thread
//! over a `std::sync::mpsc` command channel and a `tokio::sync::oneshot`
//! reply per call, the same bridge pattern the engine crate's `overlay`
//! module uses for its own framing, just swapped for a non-async transport.
//!
//! Frames are length-prefixed `bincode`, matching
//! `ddpoa_engine::overlay`'s wire convention. A validator can push a
//! notification on the same socket at any time, so every frame is tagged
//! as either a correlated `Response` or an unsolicited `Notification`
//! rather than assuming strict request/reply alternation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use ddpoa_engine::block_cache::CachedBlock;
use ddpoa_engine::error::HostError;
use ddpoa_engine::host::{HostChannel, HostNotification, Settings};
use ddpoa_engine::types::{BlockId, Key};

const POLL_TIMEOUT: Duration = Duration::from_millis(50);
const DO_NOT_LINGER: i32 = 0;

/// The subset of `HostChannel` operations carried over the wire. Mirrors
/// the trait one-to-one; `Settings`/`CachedBlock` don't carry `serde`
/// impls in the engine crate (the host-runtime wire format is out of
/// scope there), so this module defines its own wire shapes and converts.
#[derive(Debug, Serialize, Deserialize)]
enum WireRequest {
    InitializeBlock { previous_id: Option<[u8; 32]> },
    SummarizeBlock,
    FinalizeBlock { consensus_data: Vec<u8> },
    CancelBlock,
    CheckBlocks { ids: Vec<[u8; 32]> },
    CommitBlock { id: [u8; 32] },
    FailBlock { id: [u8; 32] },
    IgnoreBlock { id: [u8; 32] },
    GetBlocks { ids: Vec<[u8; 32]> },
    GetChainHead,
    GetSettings,
    LocalPeerId,
}

#[derive(Debug, Serialize, Deserialize)]
enum WireResponse {
    Ok(WireOk),
    Err(String),
}

#[derive(Debug, Serialize, Deserialize)]
enum WireOk {
    Unit,
    MaybeBlockId(Option<[u8; 32]>),
    BlockId([u8; 32]),
    Blocks(Vec<WireBlock>),
    Block(WireBlock),
    Settings(WireSettings),
    PeerId(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireBlock {
    id: [u8; 32],
    previous_id: [u8; 32],
    block_num: u64,
    signer: String,
}

impl From<CachedBlock> for WireBlock {
    fn from(b: CachedBlock) -> Self {
        Self {
            id: *b.id.as_bytes(),
            previous_id: *b.previous_id.as_bytes(),
            block_num: b.block_num,
            signer: b.signer.as_str().to_string(),
        }
    }
}

impl From<WireBlock> for CachedBlock {
    fn from(w: WireBlock) -> Self {
        Self {
            id: BlockId::from_bytes(w.id),
            previous_id: BlockId::from_bytes(w.previous_id),
            block_num: w.block_num,
            signer: Key::from(w.signer),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireSettings {
    members: Vec<String>,
    member_ips: Vec<String>,
    num_slots: usize,
}

impl From<Settings> for WireSettings {
    fn from(s: Settings) -> Self {
        Self {
            members: s.members.iter().map(|k| k.as_str().to_string()).collect(),
            member_ips: s.member_ips,
            num_slots: s.num_slots,
        }
    }
}

impl From<WireSettings> for Settings {
    fn from(w: WireSettings) -> Self {
        Self {
            members: w.members.into_iter().map(Key::from).collect(),
            member_ips: w.member_ips,
            num_slots: w.num_slots,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
enum WireNotification {
    BlockNew { id: [u8; 32], previous_id: [u8; 32], block_num: u64, signer: String },
    BlockValid { id: [u8; 32] },
    BlockInvalid { id: [u8; 32] },
    BlockCommit { id: [u8; 32] },
    PeerConnected { peer: String },
    PeerDisconnected { peer: String },
}

impl From<WireNotification> for HostNotification {
    fn from(w: WireNotification) -> Self {
        match w {
            WireNotification::BlockNew { id, previous_id, block_num, signer } => {
                HostNotification::BlockNew {
                    id: BlockId::from_bytes(id),
                    previous_id: BlockId::from_bytes(previous_id),
                    block_num,
                    signer: Key::from(signer),
                }
            }
            WireNotification::BlockValid { id } => HostNotification::BlockValid { id: BlockId::from_bytes(id) },
            WireNotification::BlockInvalid { id } => HostNotification::BlockInvalid { id: BlockId::from_bytes(id) },
            WireNotification::BlockCommit { id } => HostNotification::BlockCommit { id: BlockId::from_bytes(id) },
            WireNotification::PeerConnected { peer } => HostNotification::PeerConnected { peer: Key::from(peer) },
            WireNotification::PeerDisconnected { peer } => HostNotification::PeerDisconnected { peer: Key::from(peer) },
        }
    }
}

/// One frame on the wire: either a correlated call/response or an
/// unprompted push from the validator.
#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Call { id: u64, request: WireRequest },
    Reply { id: u64, response: WireResponse },
    Notify(WireNotification),
}

enum Command {
    Call { request: WireRequest, reply: oneshot::Sender<WireResponse> },
}

/// A `HostChannel` backed by a DEALER socket dialed to the validator's
/// component endpoint. Block/settings operations round-trip as correlated
/// `Call`/`Reply` frames; `BlockNew`/`BlockValid`/... arrive as `Notify`
/// frames the socket thread forwards straight into `poll`'s queue.
pub struct ZmqHostChannel {
    command_tx: std_mpsc::Sender<Command>,
    notifications: mpsc::Receiver<HostNotification>,
}

impl ZmqHostChannel {
    /// Spawns the socket thread and connects it to `component_endpoint`
    /// (the settings/block-operations channel). `validator_endpoint` is
    /// accepted for parity with the upstream consensus-engine CLI contract
    /// (§6) but this engine's block/settings traffic all multiplexes over
    /// the component endpoint, matching how a real Sawtooth consensus
    /// engine treats `--component` as its primary channel.
    pub fn connect(validator_endpoint: &str, component_endpoint: &str) -> Self {
        let _ = validator_endpoint;
        let (command_tx, command_rx) = std_mpsc::channel();
        let (notify_tx, notify_rx) = mpsc::channel(256);

        let endpoint = component_endpoint.to_string();
        std::thread::Builder::new()
            .name("ddpoa-zmq-host".into())
            .spawn(move || socket_thread(endpoint, command_rx, notify_tx))
            .expect("failed to spawn zmq host thread");

        Self {
            command_tx,
            notifications: notify_rx,
        }
    }

    async fn call(&self, request: WireRequest) -> Result<WireOk, HostError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Call { request, reply: reply_tx })
            .map_err(|_| HostError::Transport("zmq host thread is gone".into()))?;
        match reply_rx.await {
            Ok(WireResponse::Ok(ok)) => Ok(ok),
            Ok(WireResponse::Err(msg)) => Err(HostError::Transport(msg)),
            Err(_) => Err(HostError::Transport("zmq host thread dropped the reply".into())),
        }
    }
}

/// Owns the DEALER socket for the lifetime of the process. Runs a tight
/// poll loop: drain one queued outbound call (if any), then poll the
/// socket for an inbound frame, repeat. A `Reply` whose `id` has no
/// pending entry is logged and dropped — the caller gave up waiting.
fn socket_thread(endpoint: String, commands: std_mpsc::Receiver<Command>, notify_tx: mpsc::Sender<HostNotification>) {
    let ctx = zmq::Context::new();
    let socket = match ctx.socket(zmq::DEALER) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create zmq socket");
            return;
        }
    };
    if let Err(e) = socket.set_linger(DO_NOT_LINGER) {
        warn!(error = %e, "failed to set zmq linger");
    }
    if let Err(e) = socket.connect(&endpoint) {
        error!(error = %e, endpoint, "failed to connect zmq host socket");
        return;
    }
    debug!(endpoint, "zmq host socket connected");

    let next_id = AtomicU64::new(1);
    let pending: Arc<parking_lot::Mutex<HashMap<u64, oneshot::Sender<WireResponse>>>> =
        Arc::new(parking_lot::Mutex::new(HashMap::new()));

    loop {
        if let Ok(Command::Call { request, reply }) = commands.try_recv() {
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            pending.lock().insert(id, reply);
            let frame = Frame::Call { id, request };
            match bincode::serialize(&frame) {
                Ok(bytes) => {
                    if let Err(e) = socket.send(bytes, zmq::DONTWAIT) {
                        warn!(error = %e, "failed to send frame to host");
                        if let Some(reply) = pending.lock().remove(&id) {
                            let _ = reply.send(WireResponse::Err(e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    if let Some(reply) = pending.lock().remove(&id) {
                        let _ = reply.send(WireResponse::Err(e.to_string()));
                    }
                }
            }
        }

        let mut items = [socket.as_poll_item(zmq::POLLIN)];
        let ready = zmq::poll(&mut items, POLL_TIMEOUT.as_millis() as i64);
        if !matches!(ready, Ok(n) if n > 0) {
            continue;
        }

        let bytes = match socket.recv_bytes(zmq::DONTWAIT) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let frame: Frame = match bincode::deserialize(&bytes) {
            Ok(f) => f,
            Err(e) => {
                debug!(error = %e, "failed to decode frame from host");
                continue;
            }
        };

        match frame {
            Frame::Reply { id, response } => {
                if let Some(reply) = pending.lock().remove(&id) {
                    let _ = reply.send(response);
                } else {
                    debug!(id, "reply for unknown or expired call id");
                }
            }
            Frame::Notify(n) => {
                if notify_tx.blocking_send(n.into()).is_err() {
                    debug!("notification channel closed, dropping frame");
                }
            }
            Frame::Call { .. } => {
                debug!("ignoring inbound Call frame on host channel");
            }
        }
    }
}

#[async_trait]
impl HostChannel for ZmqHostChannel {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<HostNotification>, HostError> {
        match tokio::time::timeout(timeout, self.notifications.recv()).await {
            Ok(Some(n)) => Ok(Some(n)),
            Ok(None) => Err(HostError::Transport("zmq host thread is gone".into())),
            Err(_) => Ok(None),
        }
    }

    async fn initialize_block(&mut self, previous_id: Option<BlockId>) -> Result<(), HostError> {
        self.call(WireRequest::InitializeBlock { previous_id: previous_id.map(|b| *b.as_bytes()) })
            .await
            .map(|_| ())
    }

    async fn summarize_block(&mut self) -> Result<Option<BlockId>, HostError> {
        match self.call(WireRequest::SummarizeBlock).await? {
            WireOk::MaybeBlockId(opt) => Ok(opt.map(BlockId::from_bytes)),
            _ => Err(HostError::Transport("unexpected response to summarize_block".into())),
        }
    }

    async fn finalize_block(&mut self, consensus_data: Vec<u8>) -> Result<BlockId, HostError> {
        match self.call(WireRequest::FinalizeBlock { consensus_data }).await? {
            WireOk::BlockId(id) => Ok(BlockId::from_bytes(id)),
            _ => Err(HostError::Transport("unexpected response to finalize_block".into())),
        }
    }

    async fn cancel_block(&mut self) -> Result<(), HostError> {
        self.call(WireRequest::CancelBlock).await.map(|_| ())
    }

    async fn check_blocks(&mut self, ids: Vec<BlockId>) -> Result<(), HostError> {
        let ids = ids.iter().map(|b| *b.as_bytes()).collect();
        self.call(WireRequest::CheckBlocks { ids }).await.map(|_| ())
    }

    async fn commit_block(&mut self, id: BlockId) -> Result<(), HostError> {
        self.call(WireRequest::CommitBlock { id: *id.as_bytes() }).await.map(|_| ())
    }

    async fn fail_block(&mut self, id: BlockId) -> Result<(), HostError> {
        self.call(WireRequest::FailBlock { id: *id.as_bytes() }).await.map(|_| ())
    }

    async fn ignore_block(&mut self, id: BlockId) -> Result<(), HostError> {
        self.call(WireRequest::IgnoreBlock { id: *id.as_bytes() }).await.map(|_| ())
    }

    async fn get_blocks(&mut self, ids: Vec<BlockId>) -> Result<Vec<CachedBlock>, HostError> {
        let wire_ids = ids.iter().map(|b| *b.as_bytes()).collect();
        match self.call(WireRequest::GetBlocks { ids: wire_ids }).await? {
            WireOk::Blocks(blocks) => Ok(blocks.into_iter().map(CachedBlock::from).collect()),
            _ => Err(HostError::Transport("unexpected response to get_blocks".into())),
        }
    }

    async fn get_chain_head(&mut self) -> Result<CachedBlock, HostError> {
        match self.call(WireRequest::GetChainHead).await? {
            WireOk::Block(block) => Ok(block.into()),
            _ => Err(HostError::Transport("unexpected response to get_chain_head".into())),
        }
    }

    async fn get_settings(&mut self) -> Result<Settings, HostError> {
        match self.call(WireRequest::GetSettings).await? {
            WireOk::Settings(settings) => Ok(settings.into()),
            _ => Err(HostError::Transport("unexpected response to get_settings".into())),
        }
    }

    async fn local_peer_id(&mut self) -> Result<Key, HostError> {
        match self.call(WireRequest::LocalPeerId).await? {
            WireOk::PeerId(id) => Ok(Key::from(id)),
            _ => Err(HostError::Transport("unexpected response to local_peer_id".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_block_round_trips_through_cached_block() {
        let cached = CachedBlock {
            id: BlockId::from_bytes([1u8; 32]),
            previous_id: BlockId::from_bytes([0u8; 32]),
            block_num: 7,
            signer: Key::from("abc"),
        };
        let wire: WireBlock = cached.clone().into();
        let back: CachedBlock = wire.into();
        assert_eq!(back, cached);
    }

    #[test]
    fn wire_settings_round_trips() {
        let settings = Settings {
            members: vec![Key::from("a"), Key::from("b")],
            member_ips: vec!["10.0.0.1".into(), "10.0.0.2".into()],
            num_slots: 3,
        };
        let wire: WireSettings = settings.clone().into();
        let back: Settings = wire.into();
        assert_eq!(back.members, settings.members);
        assert_eq!(back.num_slots, settings.num_slots);
    }

    #[test]
    fn frame_bincode_round_trip() {
        let frame = Frame::Call { id: 42, request: WireRequest::GetSettings };
        let bytes = bincode::serialize(&frame).unwrap();
        let decoded: Frame = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(decoded, Frame::Call { id: 42, request: WireRequest::GetSettings }));
    }
}
