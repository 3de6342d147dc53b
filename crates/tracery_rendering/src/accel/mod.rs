//! Ray-tracing acceleration structure management.
//!
//! One structure per manager, rebuilt every traced frame and bound to a
//! [`TraceView`]. Partial rebuilds are never attempted.

mod manager;
mod state;
mod view;

pub use manager::AccelerationStructureManager;
pub use state::FrameState;
pub use view::{TraceView, ViewBinding};
