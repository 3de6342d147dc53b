//! In-memory reference backend.
//!
//! Buffers are shared byte vectors, draws and dispatches are recorded, and
//! structure builds are resolved on the CPU exactly as a native backend
//! would resolve them on the GPU: indirect counts are read from the range
//! buffer at build time, not when the entry was added.
//!
//! Tests stand in for GPU passes by writing into a `HeadlessBuffer` clone
//! directly (`write_u32`), or by registering a CPU kernel.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use glam::{Mat4, Vec3};
use parking_lot::Mutex;
use tracery_core::{
    DrawIndexedIndirectArgs, InstanceRangeArgs, MaterialId, MeshId, PropertyId,
};

use super::{
    BufferDesc, BufferUsage, BuildReport, ComputeDispatch, GpuDevice, IndirectDraw,
    InstancedDraw, KernelId, RayTracingDevice, StructureEntry,
};
use crate::error::{RenderError, RenderResult};

const MATRIX_SIZE: usize = std::mem::size_of::<[f32; 16]>();

/// Shared in-memory buffer.
#[derive(Clone)]
pub struct HeadlessBuffer {
    id: u64,
    label: Arc<str>,
    usage: BufferUsage,
    data: Arc<Mutex<Vec<u8>>>,
}

impl fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBuffer")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("usage", &self.usage)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl HeadlessBuffer {
    /// Device-unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Debug label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Binding usage.
    #[must_use]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// True for zero-sized buffers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the contents.
    #[must_use]
    pub fn read(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Reads a little-endian word at a byte offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;
        let data = self.data.lock();
        data.get(offset..end)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Writes a little-endian word in place, as a GPU pass would.
    ///
    /// Returns false when the word does not fit.
    #[must_use]
    pub fn write_u32(&self, offset: usize, value: u32) -> bool {
        let Some(end) = offset.checked_add(4) else {
            return false;
        };
        let mut data = self.data.lock();
        match data.get_mut(offset..end) {
            Some(slot) => {
                slot.copy_from_slice(&value.to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Reads the `index`-th element of a buffer of `T`.
    #[must_use]
    pub fn read_element<T: bytemuck::Pod>(&self, index: usize) -> Option<T> {
        let size = std::mem::size_of::<T>();
        let start = index.checked_mul(size)?;
        let end = start.checked_add(size)?;
        let data = self.data.lock();
        data.get(start..end)
            .map(bytemuck::pod_read_unaligned::<T>)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        let mut data = self.data.lock();
        let size = data.len() as u64;
        let end = offset + bytes.len() as u64;
        if end > size {
            return Err(RenderError::OutOfBounds {
                label: self.label.to_string(),
                offset,
                len: bytes.len() as u64,
                size,
            });
        }
        // Bounds checked above.
        #[allow(clippy::cast_possible_truncation)]
        data[offset as usize..end as usize].copy_from_slice(bytes);
        Ok(())
    }
}

/// Where a built instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceSource {
    /// A culled scene renderer.
    Renderer(u32),
    /// Instanced geometry of a mesh.
    Instanced(MeshId),
}

/// One instance inside a built structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuiltInstance {
    /// Object-to-world transform.
    pub transform: Mat4,
    /// Instance mask.
    pub mask: u8,
    /// Origin of the instance.
    pub source: InstanceSource,
}

/// CPU-side acceleration structure.
#[derive(Debug)]
pub struct HeadlessStructure {
    id: u64,
    instances: Vec<BuiltInstance>,
    origin: Vec3,
    build_count: u64,
}

impl HeadlessStructure {
    /// Device-unique id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Instances of the last successful build.
    #[must_use]
    pub fn instances(&self) -> &[BuiltInstance] {
        &self.instances
    }

    /// Origin hint of the last successful build.
    #[must_use]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Number of successful builds.
    #[must_use]
    pub fn build_count(&self) -> u64 {
        self.build_count
    }
}

/// One recorded draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRecord {
    /// True for indirect draws.
    pub indirect: bool,
    /// Mesh drawn.
    pub mesh: MeshId,
    /// Material bound.
    pub material: Option<MaterialId>,
    /// Indices per instance at execution time.
    pub index_count: u32,
    /// Instances drawn at execution time.
    pub instance_count: u32,
    /// Layer of the draw.
    pub layer: u32,
}

/// One recorded compute dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    /// Kernel name.
    pub kernel: &'static str,
    /// Workgroup counts.
    pub groups: [u32; 3],
    /// Integer uniforms.
    pub ints: Vec<(PropertyId, u32)>,
}

/// Arguments handed to a CPU kernel.
pub struct KernelArgs<'a> {
    buffers: &'a [(PropertyId, &'a HeadlessBuffer)],
    ints: &'a [(PropertyId, u32)],
    /// Workgroup counts.
    pub groups: [u32; 3],
}

impl KernelArgs<'_> {
    /// Buffer bound to a property.
    #[must_use]
    pub fn buffer(&self, property: PropertyId) -> Option<&HeadlessBuffer> {
        self.buffers
            .iter()
            .find(|(id, _)| *id == property)
            .map(|(_, buffer)| *buffer)
    }

    /// Integer bound to a property.
    #[must_use]
    pub fn int(&self, property: PropertyId) -> Option<u32> {
        self.ints
            .iter()
            .find(|(id, _)| *id == property)
            .map(|(_, value)| *value)
    }
}

type CpuKernel = Box<dyn FnMut(&KernelArgs<'_>) + Send>;

/// Reference backend with in-memory resources.
pub struct HeadlessDevice {
    next_id: u64,
    live_buffers: HashMap<u64, u64>,
    allocated_bytes: u64,
    memory_budget: Option<u64>,
    max_structure_instances: Option<usize>,
    pending_build_failure: Option<String>,
    kernels: HashMap<&'static str, CpuKernel>,
    draws: Vec<DrawRecord>,
    dispatches: Vec<DispatchRecord>,
    live_structures: usize,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Creates a device with unlimited memory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: 1,
            live_buffers: HashMap::new(),
            allocated_bytes: 0,
            memory_budget: None,
            max_structure_instances: None,
            pending_build_failure: None,
            kernels: HashMap::new(),
            draws: Vec::new(),
            dispatches: Vec::new(),
            live_structures: 0,
        }
    }

    /// Caps total buffer memory; allocations past it fail.
    pub fn set_memory_budget(&mut self, budget: Option<u64>) {
        self.memory_budget = budget;
    }

    /// Caps instances per structure; larger builds fail with an allocation error.
    pub fn set_max_structure_instances(&mut self, limit: Option<usize>) {
        self.max_structure_instances = limit;
    }

    /// Makes the next build fail with `reason`.
    pub fn fail_next_build(&mut self, reason: impl Into<String>) {
        self.pending_build_failure = Some(reason.into());
    }

    /// Registers a CPU stand-in for a compute kernel.
    pub fn register_kernel<F>(&mut self, kernel: KernelId, body: F)
    where
        F: FnMut(&KernelArgs<'_>) + Send + 'static,
    {
        self.kernels.insert(kernel.0, Box::new(body));
    }

    /// Draws recorded since the last `take_draws`.
    #[must_use]
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Drains recorded draws (end of frame).
    pub fn take_draws(&mut self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.draws)
    }

    /// Dispatches recorded since the last `take_dispatches`.
    #[must_use]
    pub fn dispatches(&self) -> &[DispatchRecord] {
        &self.dispatches
    }

    /// Drains recorded dispatches (end of frame).
    pub fn take_dispatches(&mut self) -> Vec<DispatchRecord> {
        std::mem::take(&mut self.dispatches)
    }

    /// Number of buffers not yet destroyed.
    #[must_use]
    pub fn live_buffer_count(&self) -> usize {
        self.live_buffers.len()
    }

    /// Bytes held by live buffers.
    #[must_use]
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    /// Number of structures not yet released.
    #[must_use]
    pub fn live_structure_count(&self) -> usize {
        self.live_structures
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn ensure_live(&self, buffer: &HeadlessBuffer) -> RenderResult<()> {
        if self.live_buffers.contains_key(&buffer.id) {
            Ok(())
        } else {
            Err(RenderError::Released)
        }
    }

    fn resolve_indirect(
        &self,
        instance_buffer: &HeadlessBuffer,
        range_buffer: &HeadlessBuffer,
        max_count: u32,
        out: &mut Vec<Mat4>,
    ) -> RenderResult<u32> {
        self.ensure_live(instance_buffer)?;
        self.ensure_live(range_buffer)?;

        let range = InstanceRangeArgs::from_bytes(&range_buffer.read()).ok_or_else(|| {
            RenderError::BuildFailed(format!(
                "range buffer {} holds fewer than {} bytes",
                range_buffer.label(),
                InstanceRangeArgs::SIZE
            ))
        })?;
        let count = range.resolved_count(max_count);

        let data = instance_buffer.read();
        for index in range.start_instance..range.start_instance + count {
            let offset = index as usize * MATRIX_SIZE;
            let bytes = data.get(offset..offset + MATRIX_SIZE).ok_or_else(|| {
                RenderError::BuildFailed(format!(
                    "instance {index} lies outside {} ({} bytes)",
                    instance_buffer.label(),
                    data.len()
                ))
            })?;
            let columns: [f32; 16] = bytemuck::pod_read_unaligned(bytes);
            out.push(Mat4::from_cols_array(&columns));
        }
        Ok(count)
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> RenderResult<HeadlessBuffer> {
        let over_budget = self
            .memory_budget
            .is_some_and(|budget| self.allocated_bytes + desc.size > budget);
        let Ok(len) = usize::try_from(desc.size) else {
            return Err(RenderError::Allocation {
                label: desc.label.to_string(),
                size: desc.size,
            });
        };
        if over_budget {
            return Err(RenderError::Allocation {
                label: desc.label.to_string(),
                size: desc.size,
            });
        }

        let id = self.allocate_id();
        self.live_buffers.insert(id, desc.size);
        self.allocated_bytes += desc.size;
        tracing::trace!("headless buffer {} '{}' ({} bytes)", id, desc.label, desc.size);

        Ok(HeadlessBuffer {
            id,
            label: Arc::from(desc.label),
            usage: desc.usage,
            data: Arc::new(Mutex::new(vec![0; len])),
        })
    }

    fn write_buffer(&mut self, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.ensure_live(buffer)?;
        buffer.write_at(offset, data)
    }

    fn destroy_buffer(&mut self, buffer: &HeadlessBuffer) {
        if let Some(size) = self.live_buffers.remove(&buffer.id) {
            self.allocated_bytes -= size;
        }
    }

    fn buffer_size(&self, buffer: &HeadlessBuffer) -> u64 {
        buffer.len() as u64
    }

    fn draw_indexed_indirect(&mut self, draw: &IndirectDraw<'_, HeadlessBuffer>) -> RenderResult<()> {
        self.ensure_live(draw.args)?;
        let args = DrawIndexedIndirectArgs::from_bytes(&draw.args.read()).ok_or_else(|| {
            RenderError::OutOfBounds {
                label: draw.args.label().to_string(),
                offset: 0,
                len: DrawIndexedIndirectArgs::SIZE as u64,
                size: draw.args.len() as u64,
            }
        })?;

        self.draws.push(DrawRecord {
            indirect: true,
            mesh: draw.mesh.id,
            material: draw.params.material,
            index_count: args.index_count_per_instance,
            instance_count: args.instance_count,
            layer: draw.params.layer,
        });
        Ok(())
    }

    fn draw_instanced(&mut self, draw: &InstancedDraw<'_>) -> RenderResult<()> {
        let instance_count = u32::try_from(draw.transforms.len()).map_err(|_| {
            RenderError::InvalidConfig(format!("{} instances exceed a u32 count", draw.transforms.len()))
        })?;
        self.draws.push(DrawRecord {
            indirect: false,
            mesh: draw.mesh.id,
            material: draw.params.material,
            index_count: draw.mesh.index_count,
            instance_count,
            layer: draw.params.layer,
        });
        Ok(())
    }

    fn dispatch_compute(&mut self, dispatch: &ComputeDispatch<'_, HeadlessBuffer>) -> RenderResult<()> {
        for (_, buffer) in dispatch.buffers {
            self.ensure_live(buffer)?;
        }

        self.dispatches.push(DispatchRecord {
            kernel: dispatch.kernel.0,
            groups: dispatch.groups,
            ints: dispatch.ints.to_vec(),
        });

        let kernel = self
            .kernels
            .get_mut(dispatch.kernel.0)
            .ok_or_else(|| RenderError::UnknownHandle {
                kind: "kernel",
                id: dispatch.kernel.0.to_string(),
            })?;
        kernel(&KernelArgs {
            buffers: dispatch.buffers,
            ints: dispatch.ints,
            groups: dispatch.groups,
        });
        Ok(())
    }
}

impl RayTracingDevice for HeadlessDevice {
    type AccelerationStructure = HeadlessStructure;

    fn create_acceleration_structure(&mut self) -> RenderResult<HeadlessStructure> {
        let id = self.allocate_id();
        self.live_structures += 1;
        Ok(HeadlessStructure {
            id,
            instances: Vec::new(),
            origin: Vec3::ZERO,
            build_count: 0,
        })
    }

    fn build_acceleration_structure(
        &mut self,
        structure: &mut HeadlessStructure,
        entries: &[StructureEntry<HeadlessBuffer>],
        origin: Vec3,
    ) -> RenderResult<BuildReport> {
        if let Some(reason) = self.pending_build_failure.take() {
            return Err(RenderError::BuildFailed(reason));
        }

        let mut report = BuildReport {
            structure_id: structure.id,
            ..BuildReport::default()
        };
        let mut instances = Vec::new();
        let mut resolved = Vec::new();

        for entry in entries {
            match entry {
                StructureEntry::Renderer(renderer) => {
                    instances.push(BuiltInstance {
                        transform: renderer.transform,
                        mask: renderer.instance_mask,
                        source: InstanceSource::Renderer(renderer.renderer_id),
                    });
                    report.renderer_instances += 1;
                }
                StructureEntry::Instances { geometry, transforms } => {
                    instances.extend(transforms.iter().map(|transform| BuiltInstance {
                        transform: *transform,
                        mask: 0xFF,
                        source: InstanceSource::Instanced(geometry.mesh.id),
                    }));
                    // Entries are created from u32-counted lists.
                    #[allow(clippy::cast_possible_truncation)]
                    {
                        report.direct_instances += transforms.len() as u32;
                    }
                }
                StructureEntry::IndirectInstances {
                    geometry,
                    instance_buffer,
                    max_count,
                    range_buffer,
                } => {
                    resolved.clear();
                    let count =
                        self.resolve_indirect(instance_buffer, range_buffer, *max_count, &mut resolved)?;
                    instances.extend(resolved.iter().map(|transform| BuiltInstance {
                        transform: *transform,
                        mask: 0xFF,
                        source: InstanceSource::Instanced(geometry.mesh.id),
                    }));
                    report.indirect_instances += count;
                }
            }
        }

        if let Some(limit) = self.max_structure_instances {
            if instances.len() > limit {
                return Err(RenderError::Allocation {
                    label: format!("acceleration structure {}", structure.id),
                    size: (instances.len() * MATRIX_SIZE) as u64,
                });
            }
        }

        structure.instances = instances;
        structure.origin = origin;
        structure.build_count += 1;
        Ok(report)
    }

    fn release_acceleration_structure(&mut self, structure: HeadlessStructure) {
        tracing::trace!("headless structure {} released", structure.id);
        self.live_structures = self.live_structures.saturating_sub(1);
    }
}
