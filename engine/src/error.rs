//! Error types for the DDPoA engine.
//!
//! Two enums, matching the two error policies of the design (§7): a fatal
//! configuration class that aborts startup, and a retryable engine class
//! that the driver loop logs and swallows, re-observing state on the next
//! tick.

use thiserror::Error;

/// Fatal errors discovered before the driver loop starts. The binary logs
/// these and exits with status 1.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    MissingSetting(String),

    #[error("could not parse member list: {0}")]
    InvalidMemberList(String),

    #[error("member list has {members} entries but member_ips has {ips}")]
    MemberIpMismatch { members: usize, ips: usize },

    #[error("invalid slots setting: {0}")]
    InvalidSlots(String),
}

/// Errors raised during normal operation. None of these are fatal — the
/// driver logs them and continues on the next loop iteration.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("epoch is not initialized (empty witness list)")]
    EpochNotInitialized,

    #[error("host runtime returned an unexpected state transition")]
    HostInvalidState,

    #[error("malformed consensus data payload: {0}")]
    MalformedConsensusData(String),

    #[error("host channel error: {0}")]
    Host(#[from] HostError),
}

/// Errors surfaced by a `HostChannel` implementation.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("host is not ready for this operation")]
    InvalidState,

    #[error("block not ready")]
    BlockNotReady,

    #[error("unknown block id")]
    UnknownBlock,

    #[error("transport error: {0}")]
    Transport(String),
}
