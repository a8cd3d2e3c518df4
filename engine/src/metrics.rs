//! The metrics trait boundary: the driver reports consensus events through
//! this trait instead of depending on any particular metrics crate
//! directly, the same split `host.rs` draws between the driver and the
//! concrete `HostChannel` implementation. `ddpoa-node` supplies the real
//! `prometheus`-backed implementation; tests and anything that doesn't
//! care about observability use `NoopMetrics`.

/// Sink for the handful of consensus events worth exporting as metrics.
/// Every method has a no-op default so an implementor only needs to
/// override what it actually tracks.
pub trait MetricsSink: Send + Sync {
    /// This node finalized a block and the host committed it.
    fn block_produced(&self) {}
    /// This node's slot elapsed with nothing to produce.
    fn empty_slot(&self) {}
    /// The expected witness missed its slot entirely.
    fn slot_missed(&self) {}
    /// The witness list was reshuffled at a round boundary.
    fn witness_reshuffled(&self) {}
    /// An epoch finished and a new one was initialized.
    fn epoch_completed(&self) {}
    /// Updates the gauge of peers this node currently considers online.
    fn set_peers_online(&self, _count: i64) {}
    /// Updates the gauge of the current epoch number.
    fn set_epoch_number(&self, _number: i64) {}
}

/// A `MetricsSink` that discards everything. The driver's default when no
/// observability backend is wired in (e.g. in unit tests).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}
