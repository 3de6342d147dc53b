//! Per-frame results.

use crate::backend::BuildReport;
use crate::error::RenderError;

/// What happened to ray tracing this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    /// Structure rebuilt and bound.
    Traced(BuildReport),
    /// Rebuild skipped; the view keeps its previous binding.
    Paused,
    /// Rebuild failed; the view was unbound.
    Skipped(RenderError),
}

impl TraceOutcome {
    /// True when the structure was rebuilt this frame.
    #[must_use]
    pub const fn is_traced(&self) -> bool {
        matches!(self, Self::Traced(_))
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameReport {
    /// Frame number, starting at 1.
    pub frame_number: u64,
    /// Draws issued this frame.
    pub draw_calls: u32,
    /// Ray-tracing outcome.
    pub trace: TraceOutcome,
    /// Total tick time (microseconds).
    pub frame_time_us: u32,
}
