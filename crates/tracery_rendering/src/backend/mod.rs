//! GPU backend abstraction.
//!
//! The pipeline never talks to a graphics API directly. It goes through two
//! traits:
//!
//! - [`GpuDevice`]: buffer allocation, uploads, draws and compute dispatch
//! - [`RayTracingDevice`]: acceleration-structure creation, build and release
//!
//! `HeadlessDevice` implements both with in-memory buffers and CPU-resolved
//! builds. `WgpuDevice` implements the raster/buffer half on top of `wgpu`,
//! which ships no ray-tracing primitives.

mod headless;
mod wgpu_device;

pub use headless::{
    BuiltInstance, DispatchRecord, DrawRecord, HeadlessBuffer, HeadlessDevice, HeadlessStructure,
    InstanceSource, KernelArgs,
};
pub use wgpu_device::{WgpuBuffer, WgpuDevice};

use std::fmt;

use glam::{Mat4, Vec3};
use tracery_core::{
    CulledRenderer, DrawParams, MaterialId, MeshDesc, PropertyId, SubMeshFlags,
};

/// What a buffer is bound as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Structured (storage) buffer read by shaders and builds.
    Structured,
    /// Indexed indirect draw arguments.
    IndirectArguments,
    /// Raw words read by the structure build.
    Raw,
}

/// Buffer creation request.
#[derive(Debug, Clone, Copy)]
pub struct BufferDesc<'a> {
    /// Debug label.
    pub label: &'a str,
    /// Binding usage.
    pub usage: BufferUsage,
    /// Size in bytes.
    pub size: u64,
}

/// Name of an external compute kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelId(pub &'static str);

/// One compute dispatch.
#[derive(Debug, Clone, Copy)]
pub struct ComputeDispatch<'a, B> {
    /// Kernel to run.
    pub kernel: KernelId,
    /// Buffers bound by property.
    pub buffers: &'a [(PropertyId, &'a B)],
    /// Integer uniforms bound by property.
    pub ints: &'a [(PropertyId, u32)],
    /// Workgroup counts.
    pub groups: [u32; 3],
}

/// Indirect draw: counts come from `args` when the GPU executes it.
#[derive(Debug, Clone, Copy)]
pub struct IndirectDraw<'a, B> {
    /// Raster parameters.
    pub params: &'a DrawParams,
    /// Mesh drawn per instance.
    pub mesh: &'a MeshDesc,
    /// Indexed indirect args buffer.
    pub args: &'a B,
}

/// Direct instanced draw with CPU transforms.
#[derive(Debug, Clone, Copy)]
pub struct InstancedDraw<'a> {
    /// Raster parameters.
    pub params: &'a DrawParams,
    /// Mesh drawn per instance.
    pub mesh: &'a MeshDesc,
    /// One transform per instance.
    pub transforms: &'a [Mat4],
}

/// Mesh/material pair for instanced structure geometry.
///
/// Only ever built from a validated `InstanceConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstancedGeometry {
    /// Shared mesh.
    pub mesh: MeshDesc,
    /// Hit material.
    pub material: MaterialId,
    /// Flags for every sub-mesh.
    pub sub_mesh_flags: SubMeshFlags,
    /// Geometry deforms per frame.
    pub dynamic_geometry: bool,
}

/// One entry of the structure for the current frame.
#[derive(Debug, Clone)]
pub enum StructureEntry<B> {
    /// A scene renderer that passed culling.
    Renderer(CulledRenderer),
    /// Instances with CPU-supplied transforms.
    Instances {
        /// Geometry shared by the instances.
        geometry: InstancedGeometry,
        /// One transform per instance.
        transforms: Vec<Mat4>,
    },
    /// Instances whose count is read from a GPU buffer at build time.
    IndirectInstances {
        /// Geometry shared by the instances.
        geometry: InstancedGeometry,
        /// Buffer of `Mat4` transforms.
        instance_buffer: B,
        /// Upper bound on the resolved count.
        max_count: u32,
        /// Raw 8-byte `InstanceRangeArgs` buffer.
        range_buffer: B,
    },
}

/// Result of a successful build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildReport {
    /// Backend id of the structure.
    pub structure_id: u64,
    /// Instances contributed by culled renderers.
    pub renderer_instances: u32,
    /// Instances contributed by direct transform lists.
    pub direct_instances: u32,
    /// Instances resolved from indirect ranges.
    pub indirect_instances: u32,
}

impl BuildReport {
    /// Total instances in the built structure.
    #[must_use]
    pub const fn instance_count(&self) -> u32 {
        self.renderer_instances + self.direct_instances + self.indirect_instances
    }
}

/// Buffers, draws and compute.
pub trait GpuDevice {
    /// Buffer handle. Cloning shares the same GPU allocation.
    type Buffer: Clone + fmt::Debug;

    /// Allocates a zero-initialised buffer.
    ///
    /// # Errors
    ///
    /// `RenderError::Allocation` when memory cannot be reserved.
    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> crate::RenderResult<Self::Buffer>;

    /// Uploads bytes at `offset`.
    ///
    /// # Errors
    ///
    /// `RenderError::OutOfBounds` when the write does not fit.
    fn write_buffer(
        &mut self,
        buffer: &Self::Buffer,
        offset: u64,
        data: &[u8],
    ) -> crate::RenderResult<()>;

    /// Frees a buffer. Other clones of the handle become dangling.
    fn destroy_buffer(&mut self, buffer: &Self::Buffer);

    /// Size of a buffer in bytes.
    fn buffer_size(&self, buffer: &Self::Buffer) -> u64;

    /// Enqueues one indexed indirect draw.
    ///
    /// # Errors
    ///
    /// Backend-specific; unknown mesh or material handles.
    fn draw_indexed_indirect(
        &mut self,
        draw: &IndirectDraw<'_, Self::Buffer>,
    ) -> crate::RenderResult<()>;

    /// Enqueues one direct instanced draw.
    ///
    /// # Errors
    ///
    /// Backend-specific; unknown mesh or material handles.
    fn draw_instanced(&mut self, draw: &InstancedDraw<'_>) -> crate::RenderResult<()>;

    /// Enqueues one compute dispatch.
    ///
    /// # Errors
    ///
    /// `RenderError::UnknownHandle` when the kernel is not registered.
    fn dispatch_compute(
        &mut self,
        dispatch: &ComputeDispatch<'_, Self::Buffer>,
    ) -> crate::RenderResult<()>;
}

/// Native acceleration-structure support.
pub trait RayTracingDevice: GpuDevice {
    /// Backend structure handle.
    type AccelerationStructure: fmt::Debug;

    /// Creates an empty structure.
    ///
    /// # Errors
    ///
    /// `RenderError::Allocation` when the structure cannot be created.
    fn create_acceleration_structure(
        &mut self,
    ) -> crate::RenderResult<Self::AccelerationStructure>;

    /// Rebuilds `structure` from scratch out of `entries`.
    ///
    /// Indirect entries are resolved here, from the range buffer contents at
    /// build time. `origin` only affects partitioning quality.
    ///
    /// # Errors
    ///
    /// `RenderError::BuildFailed` or `RenderError::Allocation`.
    fn build_acceleration_structure(
        &mut self,
        structure: &mut Self::AccelerationStructure,
        entries: &[StructureEntry<Self::Buffer>],
        origin: Vec3,
    ) -> crate::RenderResult<BuildReport>;

    /// Frees a structure.
    fn release_acceleration_structure(&mut self, structure: Self::AccelerationStructure);
}

/// Workgroup size assumed by the position-update kernel.
pub const COMPUTE_GROUP_SIZE: u32 = 256;

/// Number of workgroups covering `total_threads`.
#[inline]
#[must_use]
pub const fn compute_groups(total_threads: u32) -> u32 {
    total_threads.div_ceil(COMPUTE_GROUP_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_groups() {
        assert_eq!(compute_groups(0), 0);
        assert_eq!(compute_groups(1), 1);
        assert_eq!(compute_groups(256), 1);
        assert_eq!(compute_groups(257), 2);
        assert_eq!(compute_groups(32_768), 128);
    }

    #[test]
    fn test_report_total() {
        let report = BuildReport {
            structure_id: 1,
            renderer_instances: 3,
            direct_instances: 10,
            indirect_instances: 32_768,
        };
        assert_eq!(report.instance_count(), 32_781);
    }
}
