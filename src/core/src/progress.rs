//! Progress reporting capability.
//!
//! The engine never draws spinners or bars itself; it reports milestones
//! through a [`ProgressSink`] handle supplied by the caller. A CLI can back
//! it with a real progress bar, tests with [`NoProgress`].

/// Receiver for assembly progress events.
pub trait ProgressSink: Send + Sync {
    /// A new tracked phase begins, with `total` units of work.
    fn start(&self, total: u64);

    /// `n` units of work completed since the last call.
    fn advance(&self, n: u64);

    /// The current phase finished; `msg` is human-readable.
    fn success(&self, msg: &str);

    /// The current phase failed; `msg` is human-readable.
    fn fail(&self, msg: &str);
}

/// Sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn start(&self, _total: u64) {}
    fn advance(&self, _n: u64) {}
    fn success(&self, _msg: &str) {}
    fn fail(&self, _msg: &str) {}
}

/// Sink that forwards milestone events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn start(&self, total: u64) {
        tracing::debug!(total, "progress started");
    }

    fn advance(&self, _n: u64) {}

    fn success(&self, msg: &str) {
        tracing::info!("{}", msg);
    }

    fn fail(&self, msg: &str) {
        tracing::warn!("{}", msg);
    }
}
