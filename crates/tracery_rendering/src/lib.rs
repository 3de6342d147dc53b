//! # Tracery Rendering
//!
//! Per-frame ray-tracing acceleration structures over a GPU-driven instance
//! set, plus the indirect draw of the same instances.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      FrameOrchestrator                       │
//! │   ┌───────────────────┐   ┌───────────────────────────────┐  │
//! │   │ InstanceBuffer    │──►│ AccelerationStructureManager  │  │
//! │   │ Manager           │   │ clear/cull/add/build/bind     │  │
//! │   └─────────┬─────────┘   └───────────────┬───────────────┘  │
//! │             │ draw args                   │ ViewBinding      │
//! │   ┌─────────▼─────────┐           ┌───────▼───────┐          │
//! │   │ IndirectDraw      │           │   TraceView   │          │
//! │   │ Submitter         │           └───────────────┘          │
//! │   └─────────┬─────────┘                                      │
//! └─────────────┼────────────────────────────────────────────────┘
//!               ▼
//!     GpuDevice / RayTracingDevice  (HeadlessDevice, WgpuDevice)
//! ```
//!
//! ## Invariants
//!
//! - The structure is rebuilt from scratch each traced frame.
//! - Indirect counts are read by the GPU (or the backend build), never by
//!   the CPU.
//! - Every buffer and structure is released exactly once.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod accel;
pub mod backend;
pub mod error;
pub mod instancing;
pub mod pipeline;

pub use accel::{AccelerationStructureManager, FrameState, TraceView, ViewBinding};
pub use backend::{
    BufferDesc, BufferUsage, BuildReport, GpuDevice, HeadlessBuffer, HeadlessDevice, KernelId,
    RayTracingDevice, StructureEntry, WgpuDevice,
};
pub use error::{RenderError, RenderResult};
pub use instancing::{
    IndirectDrawSubmitter, InstanceBufferManager, InstanceBuffers, KernelPositionPass,
    PositionPass,
};
pub use pipeline::{FrameOrchestrator, FrameReport, FrameStats, TraceOutcome};
