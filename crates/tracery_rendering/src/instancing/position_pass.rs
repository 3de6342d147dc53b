//! External repositioning passes.
//!
//! Positions can be driven by a compute kernel instead of CPU uploads. The
//! kernel sees the matrix buffer as `_RtxMatrices`, the record buffer as
//! `_SphereData` and the instance count as `_Count`, and is dispatched in
//! groups of [`COMPUTE_GROUP_SIZE`](crate::backend::COMPUTE_GROUP_SIZE).

use tracery_core::PropertyId;

use super::buffer::InstanceBuffers;
use crate::backend::{compute_groups, ComputeDispatch, GpuDevice, KernelId};
use crate::error::RenderResult;

/// A GPU pass that rewrites instance positions in place.
pub trait PositionPass<D: GpuDevice> {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Enqueues the pass over `instance_count` instances.
    ///
    /// # Errors
    ///
    /// Backend dispatch failures.
    fn dispatch(
        &mut self,
        device: &mut D,
        buffers: &InstanceBuffers<D::Buffer>,
        instance_count: u32,
    ) -> RenderResult<()>;
}

/// Dispatches one named kernel with the standard bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelPositionPass {
    kernel: KernelId,
}

impl KernelPositionPass {
    /// Creates a pass for `kernel`.
    #[must_use]
    pub const fn new(kernel: KernelId) -> Self {
        Self { kernel }
    }

    /// Kernel dispatched.
    #[must_use]
    pub const fn kernel(&self) -> KernelId {
        self.kernel
    }
}

impl<D: GpuDevice> PositionPass<D> for KernelPositionPass {
    fn name(&self) -> &str {
        self.kernel.0
    }

    fn dispatch(
        &mut self,
        device: &mut D,
        buffers: &InstanceBuffers<D::Buffer>,
        instance_count: u32,
    ) -> RenderResult<()> {
        let bindings = [
            (PropertyId::rtx_matrices(), &buffers.matrices),
            (PropertyId::sphere_data(), &buffers.records),
        ];
        let ints = [(PropertyId::count(), instance_count)];

        device.dispatch_compute(&ComputeDispatch {
            kernel: self.kernel,
            buffers: &bindings,
            ints: &ints,
            groups: [compute_groups(instance_count), 1, 1],
        })
    }
}
