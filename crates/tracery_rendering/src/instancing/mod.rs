//! Instance buffers and instanced draw submission.
//!
//! The instance set is uploaded once and then either repositioned from the
//! CPU or by a [`PositionPass`]. Draws read their counts from GPU memory, so
//! a pass can shrink the visible set without a CPU round trip.

mod buffer;
mod position_pass;
mod submit;

pub use buffer::{InstanceBufferManager, InstanceBuffers};
pub use position_pass::{KernelPositionPass, PositionPass};
pub use submit::IndirectDrawSubmitter;
