//! Per-frame orchestration.
//!
//! ```text
//! tick
//!  ├── 1. position pass (if installed)      -> instance buffers
//!  ├── 2. indirect draw                     -> raster, count read on GPU
//!  └── 3. unless paused:
//!         clear -> cull -> add indirect -> build(origin) -> bind(view)
//! ```
//!
//! A failed step 3 unbinds the view and is reported in the frame; the draw
//! of step 2 has already been issued and is unaffected.

mod frame;
mod stats;

pub use frame::{FrameReport, TraceOutcome};
pub use stats::FrameStats;

use std::time::Instant;

use glam::{Mat4, Vec3};
use tracery_core::{CullingConfig, DrawParams, InstanceConfig, MeshDesc, PipelineConfig, SceneRenderer};

use crate::accel::{AccelerationStructureManager, TraceView};
use crate::backend::{BuildReport, RayTracingDevice};
use crate::error::{RenderError, RenderResult};
use crate::instancing::{IndirectDrawSubmitter, InstanceBufferManager, PositionPass};

/// Drives the instanced draw and the structure rebuild every frame.
pub struct FrameOrchestrator<D: RayTracingDevice> {
    buffers: InstanceBufferManager<D>,
    accel: AccelerationStructureManager<D>,
    submitter: IndirectDrawSubmitter,
    position_pass: Option<Box<dyn PositionPass<D>>>,
    culling: CullingConfig,
    draw: DrawParams,
    instance: InstanceConfig,
    mesh: MeshDesc,
    origin: Vec3,
    paused: bool,
    frame_count: u64,
    stats: FrameStats,
    shut_down: bool,
}

impl<D: RayTracingDevice> FrameOrchestrator<D> {
    /// Performs the one-time setup: validates the config, uploads the
    /// instance set and creates the structure.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidConfig` for an unusable config or instance
    /// config, `RenderError::Allocation` from buffer or structure creation.
    pub fn new(
        device: &mut D,
        config: &PipelineConfig,
        instance: InstanceConfig,
        transforms: &[Mat4],
    ) -> RenderResult<Self> {
        config.validate()?;
        let (mesh, material) = instance.validate()?;

        let mut buffers = InstanceBufferManager::initialize(device, transforms, mesh.index_count)?;
        let accel = match AccelerationStructureManager::new(device) {
            Ok(accel) => accel,
            Err(err) => {
                buffers.release(device);
                return Err(err);
            }
        };

        tracing::info!(
            "frame orchestrator ready: {} instances, {} culling tests",
            buffers.instance_count(),
            config.culling.instance_tests.len()
        );

        Ok(Self {
            buffers,
            accel,
            submitter: IndirectDrawSubmitter::new(),
            position_pass: None,
            culling: config.culling.clone(),
            draw: config.draw.with_material(material),
            instance,
            mesh,
            origin: config.frame.origin,
            paused: config.frame.paused,
            frame_count: 0,
            stats: FrameStats::default(),
            shut_down: false,
        })
    }

    /// Runs one frame.
    ///
    /// # Errors
    ///
    /// `RenderError::Released` after `shutdown`; position-pass and draw
    /// failures. Ray-tracing failures are reported in the frame instead.
    pub fn tick(
        &mut self,
        device: &mut D,
        scene: &[SceneRenderer],
        view: &mut TraceView,
    ) -> RenderResult<FrameReport> {
        if self.shut_down {
            return Err(RenderError::Released);
        }
        let frame_start = Instant::now();
        self.frame_count += 1;
        self.submitter.reset();

        if let Some(pass) = self.position_pass.as_mut() {
            self.buffers.dispatch_update(device, pass.as_mut())?;
        }

        let args = &self.buffers.buffers()?.draw_args;
        self.submitter
            .submit_indirect(device, &self.draw, &self.mesh, args)?;

        let trace = if self.paused {
            tracing::debug!("frame {}: paused, keeping view binding", self.frame_count);
            TraceOutcome::Paused
        } else {
            match self.rebuild(device, scene, view) {
                Ok(report) => TraceOutcome::Traced(report),
                Err(err) => {
                    tracing::warn!("frame {}: ray tracing skipped: {}", self.frame_count, err);
                    view.unbind();
                    TraceOutcome::Skipped(err)
                }
            }
        };

        let report = FrameReport {
            frame_number: self.frame_count,
            draw_calls: self.submitter.draw_calls(),
            trace,
            frame_time_us: u32::try_from(frame_start.elapsed().as_micros()).unwrap_or(u32::MAX),
        };
        self.stats.record(&report);
        Ok(report)
    }

    fn rebuild(
        &mut self,
        device: &mut D,
        scene: &[SceneRenderer],
        view: &mut TraceView,
    ) -> RenderResult<BuildReport> {
        let buffers = self.buffers.buffers()?;

        self.accel.clear()?;
        self.accel.cull(&self.culling, scene)?;
        self.accel.add_instances_indirect(
            &self.instance,
            &buffers.matrices,
            self.buffers.instance_count(),
            &buffers.range_args,
        )?;
        let report = self.accel.build(device, self.origin)?;
        self.accel.bind(view)?;
        Ok(report)
    }

    /// Stops or resumes the per-frame rebuild.
    pub fn set_paused(&mut self, paused: bool) {
        if self.paused != paused {
            tracing::info!("structure rebuild {}", if paused { "paused" } else { "resumed" });
        }
        self.paused = paused;
    }

    /// True while rebuilds are skipped.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Moves the structure build origin.
    pub fn set_origin(&mut self, origin: Vec3) {
        self.origin = origin;
    }

    /// Installs a pass run at the start of every frame.
    pub fn install_position_pass(&mut self, pass: Box<dyn PositionPass<D>>) {
        tracing::info!("position pass '{}' installed", pass.name());
        self.position_pass = Some(pass);
    }

    /// Removes the position pass; positions then only change on upload.
    pub fn remove_position_pass(&mut self) -> Option<Box<dyn PositionPass<D>>> {
        self.position_pass.take()
    }

    /// Uploads new transforms for every instance.
    ///
    /// # Errors
    ///
    /// See [`InstanceBufferManager::update_positions`].
    pub fn update_positions(&mut self, device: &mut D, transforms: &[Mat4]) -> RenderResult<()> {
        self.buffers.update_positions(device, transforms)
    }

    /// Rewrites the drawn and traced instance count.
    ///
    /// # Errors
    ///
    /// See [`InstanceBufferManager::set_active_count`].
    pub fn set_active_count(&mut self, device: &mut D, count: u32) -> RenderResult<()> {
        self.buffers.set_active_count(device, count)
    }

    /// Instance buffers.
    #[must_use]
    pub fn buffers(&self) -> &InstanceBufferManager<D> {
        &self.buffers
    }

    /// Acceleration-structure manager.
    #[must_use]
    pub fn accel(&self) -> &AccelerationStructureManager<D> {
        &self.accel
    }

    /// Draw parameters, material included.
    #[must_use]
    pub fn draw_params(&self) -> &DrawParams {
        &self.draw
    }

    /// Running statistics.
    #[must_use]
    pub const fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Frames ticked so far.
    #[must_use]
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Releases the structure and buffers. Safe to call repeatedly.
    pub fn shutdown(&mut self, device: &mut D) {
        if self.shut_down {
            return;
        }
        self.position_pass = None;
        self.accel.release(device);
        self.buffers.release(device);
        self.shut_down = true;
        tracing::info!(
            "frame orchestrator shut down after {} frames ({} traced)",
            self.stats.frames,
            self.stats.traced_frames
        );
    }

    /// True after `shutdown`.
    #[must_use]
    pub const fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl<D: RayTracingDevice> Drop for FrameOrchestrator<D> {
    fn drop(&mut self) {
        // GPU resources need the device, which drop cannot reach.
        if !self.shut_down {
            tracing::warn!(
                "frame orchestrator dropped without shutdown after {} frames",
                self.frame_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use tracery_core::{MaterialId, MeshId};

    fn orchestrator(device: &mut HeadlessDevice) -> FrameOrchestrator<HeadlessDevice> {
        let instance = InstanceConfig::new(MeshDesc::new(MeshId(1), 36), MaterialId(7));
        FrameOrchestrator::new(device, &PipelineConfig::default(), instance, &[Mat4::IDENTITY; 16])
            .unwrap()
    }

    #[test]
    fn test_tick_draws_and_traces() {
        let mut device = HeadlessDevice::new();
        let mut frames = orchestrator(&mut device);
        let mut view = TraceView::new("main");

        let report = frames.tick(&mut device, &[], &mut view).unwrap();
        assert_eq!(report.frame_number, 1);
        assert_eq!(report.draw_calls, 1);
        assert!(report.trace.is_traced());
        assert_eq!(view.binding().unwrap().instance_count, 16);
        assert_eq!(device.draws()[0].material, Some(MaterialId(7)));
    }

    #[test]
    fn test_missing_material_aborts_setup() {
        let mut device = HeadlessDevice::new();
        let mut instance = InstanceConfig::new(MeshDesc::new(MeshId(1), 36), MaterialId(7));
        instance.material = None;
        let result =
            FrameOrchestrator::new(&mut device, &PipelineConfig::default(), instance, &[Mat4::IDENTITY]);
        assert!(matches!(result, Err(RenderError::InvalidConfig(_))));
        assert_eq!(device.live_buffer_count(), 0);
    }

    #[test]
    fn test_tick_after_shutdown() {
        let mut device = HeadlessDevice::new();
        let mut frames = orchestrator(&mut device);
        let mut view = TraceView::new("main");
        frames.shutdown(&mut device);
        frames.shutdown(&mut device);
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_structure_count(), 0);
        assert_eq!(frames.tick(&mut device, &[], &mut view), Err(RenderError::Released));
    }
}
