//! GPU buffers for the instance set.
//!
//! Four buffers are allocated once and reused every frame:
//!
//! | Buffer       | Layout                         | Read by                 |
//! |--------------|--------------------------------|-------------------------|
//! | `records`    | `InstanceRecord` x N (144 B)   | raster shaders          |
//! | `matrices`   | `Mat4` x N (64 B)              | structure build         |
//! | `draw_args`  | `DrawIndexedIndirectArgs`      | indirect draw           |
//! | `range_args` | `InstanceRangeArgs` (8 B)      | indirect structure entry|
//!
//! The instance count is fixed at initialisation. Nothing is read back.

use glam::Mat4;
use tracery_core::{
    records_from_transforms, DrawIndexedIndirectArgs, InstanceRangeArgs, InstanceRecord,
};

use super::position_pass::PositionPass;
use crate::backend::{BufferDesc, BufferUsage, GpuDevice};
use crate::error::{RenderError, RenderResult};

const MATRIX_SIZE: u64 = std::mem::size_of::<Mat4>() as u64;

/// Handles of the four instance buffers.
#[derive(Debug, Clone)]
pub struct InstanceBuffers<B> {
    /// Per-instance records.
    pub records: B,
    /// Per-instance object-to-world matrices.
    pub matrices: B,
    /// Indexed indirect draw arguments.
    pub draw_args: B,
    /// Raw instance range for the structure build.
    pub range_args: B,
}

impl<B> InstanceBuffers<B> {
    fn each(&self) -> [&B; 4] {
        [&self.records, &self.matrices, &self.draw_args, &self.range_args]
    }
}

/// Owns the instance buffers of one instance set.
pub struct InstanceBufferManager<D: GpuDevice> {
    buffers: Option<InstanceBuffers<D::Buffer>>,
    instance_count: u32,
    active_count: u32,
    index_count: u32,
}

impl<D: GpuDevice> InstanceBufferManager<D> {
    /// Allocates the buffers and uploads the initial instance set.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidConfig` for an empty set,
    /// `RenderError::Allocation` when any buffer cannot be created (buffers
    /// already created are destroyed again).
    pub fn initialize(device: &mut D, transforms: &[Mat4], mesh_index_count: u32) -> RenderResult<Self> {
        if transforms.is_empty() {
            return Err(RenderError::InvalidConfig("instance set is empty".into()));
        }
        let instance_count = u32::try_from(transforms.len()).map_err(|_| {
            RenderError::InvalidConfig(format!("{} instances exceed a u32 count", transforms.len()))
        })?;
        let count = u64::from(instance_count);

        let descs = [
            BufferDesc {
                label: "Instance Records",
                usage: BufferUsage::Structured,
                size: count * InstanceRecord::SIZE as u64,
            },
            BufferDesc {
                label: "Instance Matrices",
                usage: BufferUsage::Structured,
                size: count * MATRIX_SIZE,
            },
            BufferDesc {
                label: "Draw Args",
                usage: BufferUsage::IndirectArguments,
                size: DrawIndexedIndirectArgs::SIZE as u64,
            },
            BufferDesc {
                label: "Instance Range Args",
                usage: BufferUsage::Raw,
                size: InstanceRangeArgs::SIZE as u64,
            },
        ];

        let mut created = Vec::with_capacity(descs.len());
        for desc in &descs {
            match device.create_buffer(desc) {
                Ok(buffer) => created.push(buffer),
                Err(err) => {
                    tracing::warn!("instance buffer '{}' failed: {}", desc.label, err);
                    for buffer in &created {
                        device.destroy_buffer(buffer);
                    }
                    return Err(err);
                }
            }
        }
        let mut created = created.into_iter();
        let (Some(records), Some(matrices), Some(draw_args), Some(range_args)) =
            (created.next(), created.next(), created.next(), created.next())
        else {
            return Err(RenderError::Allocation {
                label: "instance buffers".into(),
                size: 0,
            });
        };

        let mut manager = Self {
            buffers: Some(InstanceBuffers {
                records,
                matrices,
                draw_args,
                range_args,
            }),
            instance_count,
            active_count: instance_count,
            index_count: mesh_index_count,
        };

        if let Err(err) = manager.upload_initial(device, transforms) {
            manager.release(device);
            return Err(err);
        }

        tracing::info!(
            "instance buffers ready: {} instances, {} indices each",
            instance_count,
            mesh_index_count
        );
        Ok(manager)
    }

    fn upload_initial(&self, device: &mut D, transforms: &[Mat4]) -> RenderResult<()> {
        self.upload_transforms(device, transforms)?;
        let buffers = self.buffers()?;
        let args = DrawIndexedIndirectArgs::new(self.index_count, self.instance_count);
        device.write_buffer(&buffers.draw_args, 0, bytemuck::bytes_of(&args))?;
        let range = InstanceRangeArgs::whole(self.instance_count);
        device.write_buffer(&buffers.range_args, 0, bytemuck::bytes_of(&range))
    }

    fn upload_transforms(&self, device: &mut D, transforms: &[Mat4]) -> RenderResult<()> {
        let buffers = self.buffers()?;
        let records = records_from_transforms(transforms);
        device.write_buffer(&buffers.records, 0, bytemuck::cast_slice(&records))?;
        device.write_buffer(&buffers.matrices, 0, bytemuck::cast_slice(transforms))
    }

    /// Buffer handles.
    ///
    /// # Errors
    ///
    /// `RenderError::Released` after `release`.
    pub fn buffers(&self) -> RenderResult<&InstanceBuffers<D::Buffer>> {
        self.buffers.as_ref().ok_or(RenderError::Released)
    }

    /// Fixed instance count N.
    #[must_use]
    pub const fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Count last written into both argument buffers.
    #[must_use]
    pub const fn active_count(&self) -> u32 {
        self.active_count
    }

    /// Indices per instance.
    #[must_use]
    pub const fn index_count(&self) -> u32 {
        self.index_count
    }

    /// True after `release`.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.buffers.is_none()
    }

    /// Repositions every instance, recomputing inverses and colours.
    ///
    /// # Errors
    ///
    /// `RenderError::CountMismatch` unless exactly N transforms are given.
    pub fn update_positions(&mut self, device: &mut D, transforms: &[Mat4]) -> RenderResult<()> {
        if transforms.len() != self.instance_count as usize {
            return Err(RenderError::CountMismatch {
                expected: self.instance_count,
                actual: u32::try_from(transforms.len()).unwrap_or(u32::MAX),
            });
        }
        self.upload_transforms(device, transforms)
    }

    /// Rewrites the instance count read by the draw and the structure build.
    ///
    /// # Errors
    ///
    /// `RenderError::CountMismatch` when `count` exceeds N.
    pub fn set_active_count(&mut self, device: &mut D, count: u32) -> RenderResult<()> {
        if count > self.instance_count {
            return Err(RenderError::CountMismatch {
                expected: self.instance_count,
                actual: count,
            });
        }
        let buffers = self.buffers()?;
        let bytes = count.to_le_bytes();
        device.write_buffer(&buffers.draw_args, DrawIndexedIndirectArgs::INSTANCE_COUNT_OFFSET, &bytes)?;
        device.write_buffer(&buffers.range_args, InstanceRangeArgs::INSTANCE_COUNT_OFFSET, &bytes)?;
        self.active_count = count;
        Ok(())
    }

    /// Hands repositioning to a GPU pass over all N instances.
    ///
    /// # Errors
    ///
    /// Whatever the pass reports; `RenderError::Released` after `release`.
    pub fn dispatch_update(&mut self, device: &mut D, pass: &mut dyn PositionPass<D>) -> RenderResult<()> {
        let buffers = self.buffers()?;
        pass.dispatch(device, buffers, self.instance_count)
    }

    /// Destroys every buffer. Safe to call repeatedly.
    pub fn release(&mut self, device: &mut D) {
        if let Some(buffers) = self.buffers.take() {
            for buffer in buffers.each() {
                device.destroy_buffer(buffer);
            }
            tracing::info!("instance buffers released ({} instances)", self.instance_count);
        }
    }
}

impl<D: GpuDevice> Drop for InstanceBufferManager<D> {
    fn drop(&mut self) {
        if self.buffers.is_some() {
            tracing::warn!(
                "instance buffers dropped without release ({} instances)",
                self.instance_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use glam::Vec3;
    use tracery_core::generate;

    #[test]
    fn test_initialize_writes_args() {
        let mut device = HeadlessDevice::new();
        let transforms = generate(4, 4, 4);
        let manager = InstanceBufferManager::initialize(&mut device, &transforms, 2880).unwrap();
        let buffers = manager.buffers().unwrap();

        let args = DrawIndexedIndirectArgs::from_bytes(&buffers.draw_args.read()).unwrap();
        assert_eq!(args, DrawIndexedIndirectArgs::new(2880, 64));
        let range = InstanceRangeArgs::from_bytes(&buffers.range_args.read()).unwrap();
        assert_eq!(range, InstanceRangeArgs::whole(64));
        assert_eq!(buffers.records.len(), 64 * 144);
        assert_eq!(device.live_buffer_count(), 4);
    }

    #[test]
    fn test_empty_set_rejected() {
        let mut device = HeadlessDevice::new();
        let result = InstanceBufferManager::initialize(&mut device, &[], 36);
        assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
    }

    #[test]
    fn test_allocation_failure_rolls_back() {
        let mut device = HeadlessDevice::new();
        // Records fit, matrices do not.
        device.set_memory_budget(Some(144 * 8 + 10));
        let result = InstanceBufferManager::initialize(&mut device, &[Mat4::IDENTITY; 8], 36);
        assert!(matches!(result, Err(RenderError::Allocation { .. })));
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.allocated_bytes(), 0);
    }

    #[test]
    fn test_update_positions() {
        let mut device = HeadlessDevice::new();
        let mut manager =
            InstanceBufferManager::initialize(&mut device, &[Mat4::IDENTITY; 3], 36).unwrap();

        let moved: Vec<Mat4> = (0..3)
            .map(|i| Mat4::from_translation(Vec3::new(i as f32, 2.0, 0.0)))
            .collect();
        manager.update_positions(&mut device, &moved).unwrap();

        let record: InstanceRecord = manager.buffers().unwrap().records.read_element(2).unwrap();
        assert_eq!(record.position(), Vec3::new(2.0, 2.0, 0.0));
        assert!((record.inverse_transform() * record.transform()).abs_diff_eq(Mat4::IDENTITY, 1e-5));

        let err = manager.update_positions(&mut device, &moved[..2]).unwrap_err();
        assert_eq!(err, RenderError::CountMismatch { expected: 3, actual: 2 });
    }

    #[test]
    fn test_active_count_bounded() {
        let mut device = HeadlessDevice::new();
        let mut manager =
            InstanceBufferManager::initialize(&mut device, &[Mat4::IDENTITY; 10], 36).unwrap();

        manager.set_active_count(&mut device, 4).unwrap();
        let buffers = manager.buffers().unwrap();
        assert_eq!(buffers.draw_args.read_u32(4), Some(4));
        assert_eq!(buffers.range_args.read_u32(4), Some(4));

        assert!(manager.set_active_count(&mut device, 11).is_err());
        assert_eq!(manager.active_count(), 4);
    }

    #[test]
    fn test_release_idempotent() {
        let mut device = HeadlessDevice::new();
        let mut manager =
            InstanceBufferManager::initialize(&mut device, &[Mat4::IDENTITY; 2], 36).unwrap();
        manager.release(&mut device);
        manager.release(&mut device);
        assert!(manager.is_released());
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(manager.buffers().unwrap_err(), RenderError::Released);
    }
}
