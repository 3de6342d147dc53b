//! `wgpu` backend for buffers, indirect draws and compute.
//!
//! `wgpu` exposes no ray-tracing primitives, so this device implements only
//! [`GpuDevice`]. Draws and dispatches are queued and encoded by the caller
//! into its own passes; the indirect draw reads its instance count from the
//! args buffer when the GPU executes it, never from the CPU.

use std::collections::HashMap;
use std::sync::Arc;

use tracery_core::{MaterialId, MeshDesc, MeshId, PropertyId};
use wgpu::util::DeviceExt;

use super::{
    BufferDesc, BufferUsage, ComputeDispatch, GpuDevice, IndirectDraw, InstancedDraw, KernelId,
};
use crate::error::{RenderError, RenderResult};

/// Shared `wgpu` buffer handle.
pub type WgpuBuffer = Arc<wgpu::Buffer>;

/// Vertex and index buffers of a registered mesh.
#[derive(Debug)]
struct MeshBuffers {
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_format: wgpu::IndexFormat,
}

/// Registered compute kernel.
#[derive(Debug)]
struct KernelPipeline {
    pipeline: wgpu::ComputePipeline,
    /// Binding slot per buffer property.
    buffer_bindings: Vec<(u32, PropertyId)>,
    /// Binding slot of the packed integer uniforms, in dispatch order.
    uniform_binding: Option<u32>,
}

#[derive(Debug)]
enum PendingDraw {
    Indirect {
        material: MaterialId,
        mesh: MeshId,
        args: WgpuBuffer,
    },
    Instanced {
        material: MaterialId,
        mesh: MeshId,
        index_count: u32,
        instance_count: u32,
        transforms: wgpu::Buffer,
    },
}

#[derive(Debug)]
struct PendingDispatch {
    kernel: &'static str,
    bind_group: wgpu::BindGroup,
    groups: [u32; 3],
}

/// Device backed by a `wgpu` adapter.
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    meshes: HashMap<MeshId, MeshBuffers>,
    materials: HashMap<MaterialId, wgpu::RenderPipeline>,
    kernels: HashMap<&'static str, KernelPipeline>,
    draws: Vec<PendingDraw>,
    dispatches: Vec<PendingDispatch>,
}

impl WgpuDevice {
    /// Wraps an existing device and queue.
    #[must_use]
    pub fn new(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        Self {
            device,
            queue,
            meshes: HashMap::new(),
            materials: HashMap::new(),
            kernels: HashMap::new(),
            draws: Vec::new(),
            dispatches: Vec::new(),
        }
    }

    /// Creates a device without a surface.
    ///
    /// # Errors
    ///
    /// `RenderError::DeviceUnavailable` when no adapter or device is found.
    pub fn new_headless() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or_else(|| RenderError::DeviceUnavailable("no compatible adapter".into()))?;

        let info = adapter.get_info();
        tracing::info!("wgpu adapter: {} ({:?})", info.name, info.backend);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Tracery Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|err| RenderError::DeviceUnavailable(err.to_string()))?;

        Ok(Self::new(device, queue))
    }

    /// Underlying device.
    #[must_use]
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Underlying queue.
    #[must_use]
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Registers the vertex and index buffers of a mesh.
    pub fn register_mesh(
        &mut self,
        mesh: MeshId,
        vertices: wgpu::Buffer,
        indices: wgpu::Buffer,
        index_format: wgpu::IndexFormat,
    ) {
        self.meshes.insert(
            mesh,
            MeshBuffers {
                vertices,
                indices,
                index_format,
            },
        );
    }

    /// Registers the render pipeline used for a material.
    pub fn register_material(&mut self, material: MaterialId, pipeline: wgpu::RenderPipeline) {
        self.materials.insert(material, pipeline);
    }

    /// Registers a compute kernel and the binding slot of each property.
    pub fn register_kernel(
        &mut self,
        kernel: KernelId,
        pipeline: wgpu::ComputePipeline,
        buffer_bindings: Vec<(u32, PropertyId)>,
        uniform_binding: Option<u32>,
    ) {
        self.kernels.insert(
            kernel.0,
            KernelPipeline {
                pipeline,
                buffer_bindings,
                uniform_binding,
            },
        );
    }

    /// Number of queued draws.
    #[must_use]
    pub fn pending_draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Number of queued dispatches.
    #[must_use]
    pub fn pending_dispatch_count(&self) -> usize {
        self.dispatches.len()
    }

    /// Records queued dispatches into `encoder`, one compute pass each.
    pub fn encode_dispatches(&mut self, encoder: &mut wgpu::CommandEncoder) {
        for dispatch in self.dispatches.drain(..) {
            let Some(kernel) = self.kernels.get(dispatch.kernel) else {
                continue;
            };
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(dispatch.kernel),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &dispatch.bind_group, &[]);
            let [x, y, z] = dispatch.groups;
            pass.dispatch_workgroups(x, y, z);
        }
    }

    /// Records queued draws into a render pass.
    ///
    /// Pipelines, meshes and args buffers are borrowed for the pass lifetime,
    /// so call [`WgpuDevice::clear_draws`] only after the pass is dropped.
    pub fn encode_draws<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        for draw in &self.draws {
            let (material, mesh) = match draw {
                PendingDraw::Indirect { material, mesh, .. }
                | PendingDraw::Instanced { material, mesh, .. } => (material, mesh),
            };
            let (Some(pipeline), Some(buffers)) =
                (self.materials.get(material), self.meshes.get(mesh))
            else {
                continue;
            };

            pass.set_pipeline(pipeline);
            pass.set_vertex_buffer(0, buffers.vertices.slice(..));
            pass.set_index_buffer(buffers.indices.slice(..), buffers.index_format);

            match draw {
                PendingDraw::Indirect { args, .. } => {
                    pass.draw_indexed_indirect(args, 0);
                }
                PendingDraw::Instanced {
                    index_count,
                    instance_count,
                    transforms,
                    ..
                } => {
                    pass.set_vertex_buffer(1, transforms.slice(..));
                    pass.draw_indexed(0..*index_count, 0, 0..*instance_count);
                }
            }
        }
    }

    /// Drops queued draws after their pass was submitted.
    pub fn clear_draws(&mut self) {
        self.draws.clear();
    }

    fn check_draw_handles(&self, material: Option<MaterialId>, mesh: &MeshDesc) -> RenderResult<MaterialId> {
        let material = material.ok_or_else(|| {
            RenderError::InvalidConfig("draw parameters carry no material".into())
        })?;
        if !self.materials.contains_key(&material) {
            return Err(RenderError::UnknownHandle {
                kind: "material",
                id: material.0.to_string(),
            });
        }
        if !self.meshes.contains_key(&mesh.id) {
            return Err(RenderError::UnknownHandle {
                kind: "mesh",
                id: mesh.id.0.to_string(),
            });
        }
        Ok(material)
    }
}

/// Aligned allocation size for `desc`, or the limit it breaks.
///
/// Storage buffers are bound whole, so they must also fit one binding.
fn allocation_size(desc: &BufferDesc<'_>, limits: &wgpu::Limits) -> RenderResult<u64> {
    let too_large = || RenderError::Allocation {
        label: desc.label.to_string(),
        size: desc.size,
    };
    // Copies and storage bindings need 4-byte multiples.
    let size = desc
        .size
        .checked_next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
        .ok_or_else(too_large)?;
    if size > limits.max_buffer_size {
        return Err(too_large());
    }
    let storage = matches!(desc.usage, BufferUsage::Structured | BufferUsage::Raw);
    if storage && size > u64::from(limits.max_storage_buffer_binding_size) {
        return Err(too_large());
    }
    Ok(size)
}

/// True when `len` bytes at `offset` fit a buffer of `size` with copy alignment.
fn write_fits(size: u64, offset: u64, len: u64) -> bool {
    offset.checked_add(len).is_some_and(|end| end <= size)
        && offset % wgpu::COPY_BUFFER_ALIGNMENT == 0
        && len % wgpu::COPY_BUFFER_ALIGNMENT == 0
}

/// Integer uniforms in dispatch order, padded to a whole 16-byte block.
fn pack_uniforms(ints: &[(PropertyId, u32)]) -> Vec<u32> {
    let mut words: Vec<u32> = ints.iter().map(|(_, value)| *value).collect();
    words.resize(words.len().next_multiple_of(4).max(4), 0);
    words
}

fn usages_for(usage: BufferUsage) -> wgpu::BufferUsages {
    let common = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
    match usage {
        BufferUsage::Structured | BufferUsage::Raw => wgpu::BufferUsages::STORAGE | common,
        BufferUsage::IndirectArguments => {
            wgpu::BufferUsages::INDIRECT | wgpu::BufferUsages::STORAGE | common
        }
    }
}

impl GpuDevice for WgpuDevice {
    type Buffer = WgpuBuffer;

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> RenderResult<WgpuBuffer> {
        let size = match allocation_size(desc, &self.device.limits()) {
            Ok(size) => size,
            Err(err) => {
                tracing::warn!("buffer '{}' exceeds device limits: {} bytes", desc.label, desc.size);
                return Err(err);
            }
        };

        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(desc.label),
            size,
            usage: usages_for(desc.usage),
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            tracing::warn!("buffer '{}' allocation failed: {}", desc.label, err);
            buffer.destroy();
            return Err(RenderError::Allocation {
                label: desc.label.to_string(),
                size: desc.size,
            });
        }

        Ok(Arc::new(buffer))
    }

    fn write_buffer(&mut self, buffer: &WgpuBuffer, offset: u64, data: &[u8]) -> RenderResult<()> {
        let len = data.len() as u64;
        if !write_fits(buffer.size(), offset, len) {
            return Err(RenderError::OutOfBounds {
                label: format!("{:?}", buffer.global_id()),
                offset,
                len,
                size: buffer.size(),
            });
        }
        self.queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: &WgpuBuffer) {
        buffer.destroy();
    }

    fn buffer_size(&self, buffer: &WgpuBuffer) -> u64 {
        buffer.size()
    }

    fn draw_indexed_indirect(&mut self, draw: &IndirectDraw<'_, WgpuBuffer>) -> RenderResult<()> {
        let material = self.check_draw_handles(draw.params.material, draw.mesh)?;
        self.draws.push(PendingDraw::Indirect {
            material,
            mesh: draw.mesh.id,
            args: Arc::clone(draw.args),
        });
        Ok(())
    }

    fn draw_instanced(&mut self, draw: &InstancedDraw<'_>) -> RenderResult<()> {
        let material = self.check_draw_handles(draw.params.material, draw.mesh)?;
        let instance_count = u32::try_from(draw.transforms.len()).map_err(|_| {
            RenderError::InvalidConfig(format!("{} instances exceed a u32 count", draw.transforms.len()))
        })?;
        let transforms = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Instanced Transforms"),
                contents: bytemuck::cast_slice(draw.transforms),
                usage: wgpu::BufferUsages::VERTEX,
            });
        self.draws.push(PendingDraw::Instanced {
            material,
            mesh: draw.mesh.id,
            index_count: draw.mesh.index_count,
            instance_count,
            transforms,
        });
        Ok(())
    }

    fn dispatch_compute(&mut self, dispatch: &ComputeDispatch<'_, WgpuBuffer>) -> RenderResult<()> {
        let kernel = self
            .kernels
            .get(dispatch.kernel.0)
            .ok_or_else(|| RenderError::UnknownHandle {
                kind: "kernel",
                id: dispatch.kernel.0.to_string(),
            })?;

        let mut entries = Vec::with_capacity(kernel.buffer_bindings.len() + 1);
        for (binding, property) in &kernel.buffer_bindings {
            let (_, buffer) = dispatch
                .buffers
                .iter()
                .find(|(id, _)| id == property)
                .ok_or_else(|| RenderError::UnknownHandle {
                    kind: "buffer property",
                    id: property.name().unwrap_or("?").to_string(),
                })?;
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            });
        }

        // Uniform blocks are 16-byte aligned.
        let uniforms = kernel.uniform_binding.map(|binding| {
            let words = pack_uniforms(dispatch.ints);
            let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Kernel Uniforms"),
                contents: bytemuck::cast_slice(&words),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            (binding, buffer)
        });
        if let Some((binding, buffer)) = &uniforms {
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource: buffer.as_entire_binding(),
            });
        }

        let layout = kernel.pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(dispatch.kernel.0),
            layout: &layout,
            entries: &entries,
        });

        self.dispatches.push(PendingDispatch {
            kernel: dispatch.kernel.0,
            bind_group,
            groups: dispatch.groups,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instancing::{IndirectDrawSubmitter, InstanceBufferManager};
    use glam::Mat4;

    fn device() -> WgpuDevice {
        WgpuDevice::new_headless().unwrap()
    }

    fn desc(usage: BufferUsage, size: u64) -> BufferDesc<'static> {
        BufferDesc {
            label: "test",
            usage,
            size,
        }
    }

    #[test]
    fn test_usage_flags() {
        assert!(usages_for(BufferUsage::IndirectArguments).contains(wgpu::BufferUsages::INDIRECT));
        assert!(usages_for(BufferUsage::Raw).contains(wgpu::BufferUsages::STORAGE));
        assert!(!usages_for(BufferUsage::Structured).contains(wgpu::BufferUsages::INDIRECT));
    }

    #[test]
    fn test_allocation_size_aligns_and_limits() {
        let limits = wgpu::Limits::downlevel_defaults();
        assert_eq!(allocation_size(&desc(BufferUsage::Raw, 8), &limits), Ok(8));
        assert_eq!(allocation_size(&desc(BufferUsage::IndirectArguments, 18), &limits), Ok(20));

        let binding = u64::from(limits.max_storage_buffer_binding_size);
        assert!(matches!(
            allocation_size(&desc(BufferUsage::Structured, binding + 4), &limits),
            Err(RenderError::Allocation { .. })
        ));
        assert!(matches!(
            allocation_size(&desc(BufferUsage::IndirectArguments, limits.max_buffer_size + 4), &limits),
            Err(RenderError::Allocation { .. })
        ));
        assert!(matches!(
            allocation_size(&desc(BufferUsage::Raw, u64::MAX), &limits),
            Err(RenderError::Allocation { size: u64::MAX, .. })
        ));
    }

    #[test]
    fn test_write_fits_bounds_and_alignment() {
        assert!(write_fits(20, 4, 4));
        assert!(write_fits(20, 0, 20));
        assert!(!write_fits(20, 20, 4));
        assert!(!write_fits(20, 2, 4));
        assert!(!write_fits(20, 4, 3));
        assert!(!write_fits(20, u64::MAX - 3, 4));
    }

    #[test]
    fn test_uniforms_pad_to_block() {
        assert_eq!(pack_uniforms(&[]), vec![0; 4]);
        assert_eq!(pack_uniforms(&[(PropertyId::count(), 9)]), vec![9, 0, 0, 0]);
        let five: Vec<_> = (1..=5).map(|value| (PropertyId::count(), value)).collect();
        assert_eq!(pack_uniforms(&five), vec![1, 2, 3, 4, 5, 0, 0, 0]);
    }

    #[test]
    #[ignore = "needs a GPU adapter"]
    fn test_buffer_roundtrip_bounds() {
        let mut device = device();
        let buffer = device
            .create_buffer(&desc(BufferUsage::IndirectArguments, 20))
            .unwrap();
        assert_eq!(device.buffer_size(&buffer), 20);
        assert!(device.write_buffer(&buffer, 4, &7u32.to_le_bytes()).is_ok());
        assert!(matches!(
            device.write_buffer(&buffer, 20, &[0; 4]),
            Err(RenderError::OutOfBounds { .. })
        ));
        device.destroy_buffer(&buffer);
    }

    #[test]
    #[ignore = "needs a GPU adapter"]
    fn test_oversized_buffer_is_allocation_error() {
        let mut device = device();
        let size = device.device().limits().max_buffer_size + 4;
        let err = device
            .create_buffer(&desc(BufferUsage::Structured, size))
            .unwrap_err();
        assert!(matches!(err, RenderError::Allocation { .. }));
    }

    #[test]
    #[ignore = "needs a GPU adapter"]
    fn test_instance_buffers_over_wgpu() {
        let mut device = device();
        let transforms = vec![Mat4::IDENTITY; 64];
        let mut manager = InstanceBufferManager::initialize(&mut device, &transforms, 36).unwrap();
        let buffers = manager.buffers().unwrap().clone();
        assert_eq!(device.buffer_size(&buffers.records), 64 * 144);
        assert_eq!(device.buffer_size(&buffers.draw_args), 20);
        manager.set_active_count(&mut device, 10).unwrap();

        // No material registered: the draw is rejected, nothing queued.
        let mut submitter = IndirectDrawSubmitter::new();
        let params = tracery_core::DrawParams::default().with_material(MaterialId(1));
        let err = submitter
            .submit_indirect(&mut device, &params, &MeshDesc::new(MeshId(1), 36), &buffers.draw_args)
            .unwrap_err();
        assert!(matches!(err, RenderError::UnknownHandle { kind: "material", .. }));
        assert_eq!(device.pending_draw_count(), 0);
        manager.release(&mut device);
    }
}
