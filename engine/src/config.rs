//! Engine-wide timing and sizing constants.
//!
//! Every magic number the consensus algorithm depends on lives here, bound
//! once at startup and treated as immutable thereafter (§9 of the design
//! notes: "global settings as constants"). Values match the original
//! Sawtooth DDPoA engine's `pkg/engine/config.py` so that a fleet mixing
//! this implementation with the original would still agree on timing.

use std::time::Duration;

/// Number of full rotations through the witness list per epoch.
pub const ROUNDS_PER_EPOCH: u64 = 3;

/// Target seconds between block production attempts for a single slot.
pub const BLOCK_INTERVAL: Duration = Duration::from_secs(6);

/// Seconds after `BLOCK_INTERVAL` elapses with no block before a slot is
/// considered missed and the expected signer is penalized/downgraded.
pub const SLOT_TIMEOUT: Duration = Duration::from_secs(90);

/// Cadence at which a node in `ELECTION` rebroadcasts its own ballot.
pub const REBROADCAST_BALLOT_INTERVAL: Duration = Duration::from_secs(5);

/// Cadence of the periodic peer liveness sweep.
pub const PEER_CHECK_INTERVAL: Duration = Duration::from_secs(3);

/// Seconds of silence from a peer before it is actively pinged.
pub const PING_THRESHOLD: Duration = Duration::from_secs(30);

/// Slots remaining in the current epoch at which the voting gate opens.
pub const VOTING_SLOTS: u64 = 5;

/// One-shot delay after reaching ballot quorum before a result is
/// broadcast, giving stragglers a chance to arrive first.
pub const VOTE_RESULT_TIMER: Duration = Duration::from_secs(15);

/// Grace period after driver startup during which the engine does not
/// attempt block production even if it would otherwise be its turn.
pub const STARTUP_GRACE_PERIOD: Duration = Duration::from_secs(70);

/// Minimum interval between BOOTSTRAP_REQUEST broadcasts while lagging or
/// forked (throttle, not the WAITING_FOR_BOOTSTRAP interval below).
pub const BOOTSTRAP_REQUEST_THROTTLE: Duration = Duration::from_secs(6);

/// Interval between BOOTSTRAP_REQUEST broadcasts while in
/// `WAITING_FOR_BOOTSTRAP`.
pub const BOOTSTRAP_REQUEST_INTERVAL: Duration = Duration::from_secs(5);

/// Host message queue poll timeout — the driver's only blocking point.
pub const HOST_POLL_TIMEOUT: Duration = Duration::from_millis(80);

/// Maximum number of blocks retained in the block cache.
pub const BLOCK_CACHE_CAPACITY: usize = 10;

/// Number of most recent epochs retained by the voting system.
pub const VOTING_SYSTEM_RETENTION: usize = 5;

/// Retention drop threshold: once this many epochs are held, collapse down
/// to `VOTING_SYSTEM_RETENTION`.
pub const VOTING_SYSTEM_RETENTION_TRIGGER: usize = 10;

/// The all-zero block id used by a genesis block's `previous_id`.
pub const GENESIS_BLOCK_ID: [u8; 8] = [0u8; 8];

/// Default TCP port for the peer overlay's unary RPC service.
pub const PEER_RPC_PORT: u16 = 50051;

/// `name:version` string stamped into every `ConsensusData` payload.
pub const CONSENSUS_NAME: &str = "ddpoa";
pub const CONSENSUS_VERSION: &str = "0.1";

/// Returns the `"name:version"` string carried in `ConsensusData::consensus`.
pub fn consensus_identifier() -> String {
    format!("{}:{}", CONSENSUS_NAME, CONSENSUS_VERSION)
}
