//! Instanced draw submission.

use glam::Mat4;
use tracery_core::{DrawParams, MeshDesc};

use crate::backend::{GpuDevice, IndirectDraw, InstancedDraw};
use crate::error::{RenderError, RenderResult};

/// Issues instanced draws and counts them for frame stats.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndirectDrawSubmitter {
    draw_calls: u32,
}

impl IndirectDrawSubmitter {
    /// Creates a submitter with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self { draw_calls: 0 }
    }

    /// Issues exactly one draw whose counts the GPU reads from `args_buffer`.
    ///
    /// A zero instance count in the buffer draws nothing; that is not an error.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidConfig` when `params` carries no material.
    pub fn submit_indirect<D: GpuDevice>(
        &mut self,
        device: &mut D,
        params: &DrawParams,
        mesh: &MeshDesc,
        args_buffer: &D::Buffer,
    ) -> RenderResult<()> {
        require_material(params)?;
        device.draw_indexed_indirect(&IndirectDraw {
            params,
            mesh,
            args: args_buffer,
        })?;
        self.draw_calls += 1;
        Ok(())
    }

    /// Issues one direct instanced draw with CPU transforms.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidConfig` when `params` carries no material.
    pub fn submit_instanced<D: GpuDevice>(
        &mut self,
        device: &mut D,
        params: &DrawParams,
        mesh: &MeshDesc,
        transforms: &[Mat4],
    ) -> RenderResult<()> {
        require_material(params)?;
        device.draw_instanced(&InstancedDraw {
            params,
            mesh,
            transforms,
        })?;
        self.draw_calls += 1;
        Ok(())
    }

    /// Draws issued since the last reset.
    #[must_use]
    pub const fn draw_calls(&self) -> u32 {
        self.draw_calls
    }

    /// Resets counters (start of frame).
    pub fn reset(&mut self) {
        self.draw_calls = 0;
    }
}

fn require_material(params: &DrawParams) -> RenderResult<()> {
    if params.material.is_none() {
        return Err(RenderError::InvalidConfig("draw parameters carry no material".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferDesc, BufferUsage, HeadlessDevice};
    use tracery_core::{DrawIndexedIndirectArgs, MaterialId, MeshId};

    const MESH: MeshDesc = MeshDesc::new(MeshId(3), 2880);

    #[test]
    fn test_indirect_reads_args_at_execution() {
        let mut device = HeadlessDevice::new();
        let args = device
            .create_buffer(&BufferDesc {
                label: "args",
                usage: BufferUsage::IndirectArguments,
                size: 20,
            })
            .unwrap();
        device
            .write_buffer(&args, 0, bytemuck::bytes_of(&DrawIndexedIndirectArgs::new(2880, 50)))
            .unwrap();
        // An external pass zeroes the count.
        assert!(args.write_u32(4, 0));

        let params = DrawParams::default().with_material(MaterialId(1));
        let mut submitter = IndirectDrawSubmitter::new();
        submitter
            .submit_indirect(&mut device, &params, &MESH, &args)
            .unwrap();

        assert_eq!(submitter.draw_calls(), 1);
        assert_eq!(device.draws().len(), 1);
        assert_eq!(device.draws()[0].instance_count, 0);
        assert_eq!(device.draws()[0].index_count, 2880);
    }

    #[test]
    fn test_missing_material() {
        let mut device = HeadlessDevice::new();
        let mut submitter = IndirectDrawSubmitter::new();
        let err = submitter
            .submit_instanced(&mut device, &DrawParams::default(), &MESH, &[Mat4::IDENTITY])
            .unwrap_err();
        assert!(matches!(err, RenderError::InvalidConfig(_)));
        assert!(device.draws().is_empty());
    }

    #[test]
    fn test_instanced_count() {
        let mut device = HeadlessDevice::new();
        let params = DrawParams::default().with_material(MaterialId(1));
        let mut submitter = IndirectDrawSubmitter::new();
        submitter
            .submit_instanced(&mut device, &params, &MESH, &[Mat4::IDENTITY; 10])
            .unwrap();
        let draw = device.draws()[0];
        assert!(!draw.indirect);
        assert_eq!(draw.instance_count, 10);
    }
}
