//! Acceleration-structure lifecycle.
//!
//! The structure is rebuilt from scratch every traced frame:
//! clear, cull scene renderers, add instanced groups, build, bind.

use glam::{Mat4, Vec3};
use tracery_core::{CullingConfig, InstanceConfig, SceneRenderer};

use super::state::FrameState;
use super::view::{TraceView, ViewBinding};
use crate::backend::{BuildReport, InstancedGeometry, RayTracingDevice, StructureEntry};
use crate::error::{RenderError, RenderResult};

/// Owns one acceleration structure and its per-frame entries.
pub struct AccelerationStructureManager<D: RayTracingDevice> {
    structure: Option<D::AccelerationStructure>,
    entries: Vec<StructureEntry<D::Buffer>>,
    state: FrameState,
    generation: u64,
    last_build: Option<BuildReport>,
}

impl<D: RayTracingDevice> AccelerationStructureManager<D> {
    /// Creates the backend structure.
    ///
    /// # Errors
    ///
    /// Propagates the backend's creation failure.
    pub fn new(device: &mut D) -> RenderResult<Self> {
        let structure = device.create_acceleration_structure()?;
        tracing::debug!("acceleration structure created: {:?}", structure);
        Ok(Self {
            structure: Some(structure),
            entries: Vec::new(),
            state: FrameState::Idle,
            generation: 0,
            last_build: None,
        })
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> FrameState {
        self.state
    }

    /// True when a build of this frame is available for tracing.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.structure.is_some() && self.state.has_build()
    }

    /// Report of the last successful build of the current frame.
    #[must_use]
    pub fn last_build(&self) -> Option<BuildReport> {
        self.last_build.filter(|_| self.state.has_build())
    }

    /// Number of successful builds so far.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Entries recorded for the current frame.
    #[must_use]
    pub fn entries(&self) -> &[StructureEntry<D::Buffer>] {
        &self.entries
    }

    /// Backend structure, until released.
    #[must_use]
    pub fn structure(&self) -> Option<&D::AccelerationStructure> {
        self.structure.as_ref()
    }

    fn require(&self, operation: &'static str, allowed: &[FrameState]) -> RenderResult<()> {
        if !self.state.is_live() {
            return Err(RenderError::Released);
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(RenderError::InvalidTransition {
                operation,
                state: self.state,
            })
        }
    }

    /// Drops last frame's entries. Valid from any live state.
    ///
    /// # Errors
    ///
    /// `RenderError::Released` after `release`.
    pub fn clear(&mut self) -> RenderResult<()> {
        if !self.state.is_live() {
            return Err(RenderError::Released);
        }
        self.entries.clear();
        self.last_build = None;
        self.state = FrameState::Cleared;
        Ok(())
    }

    /// Adds every enabled renderer that passes `config`.
    ///
    /// Returns the number of renderer entries added.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidTransition` unless cleared.
    pub fn cull(&mut self, config: &CullingConfig, renderers: &[SceneRenderer]) -> RenderResult<usize> {
        self.require("cull", &[FrameState::Cleared])?;

        let culled = config.cull(renderers);
        let added = culled.len();
        self.entries
            .extend(culled.into_iter().map(StructureEntry::Renderer));
        tracing::debug!("culled {} of {} renderers into the structure", added, renderers.len());

        self.state = FrameState::Culled;
        Ok(added)
    }

    /// Adds instances with CPU-supplied transforms.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidConfig` for an incomplete config,
    /// `RenderError::InvalidTransition` unless culled.
    pub fn add_instances(&mut self, config: &InstanceConfig, transforms: &[Mat4]) -> RenderResult<()> {
        self.require("add_instances", &[FrameState::Culled, FrameState::InstancesAdded])?;
        let geometry = geometry_for(config)?;
        if u32::try_from(transforms.len()).is_err() {
            return Err(RenderError::InvalidConfig(format!(
                "{} instances exceed a u32 count",
                transforms.len()
            )));
        }

        self.entries.push(StructureEntry::Instances {
            geometry,
            transforms: transforms.to_vec(),
        });
        self.state = FrameState::InstancesAdded;
        Ok(())
    }

    /// Adds instances whose count the backend reads from `range_buffer` at
    /// build time, bounded by `max_count`.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidConfig` for an incomplete config or a zero
    /// `max_count`, `RenderError::InvalidTransition` unless culled.
    pub fn add_instances_indirect(
        &mut self,
        config: &InstanceConfig,
        instance_buffer: &D::Buffer,
        max_count: u32,
        range_buffer: &D::Buffer,
    ) -> RenderResult<()> {
        self.require(
            "add_instances_indirect",
            &[FrameState::Culled, FrameState::InstancesAdded],
        )?;
        let geometry = geometry_for(config)?;
        if max_count == 0 {
            return Err(RenderError::InvalidConfig(
                "indirect instances need a non-zero max count".into(),
            ));
        }

        self.entries.push(StructureEntry::IndirectInstances {
            geometry,
            instance_buffer: instance_buffer.clone(),
            max_count,
            range_buffer: range_buffer.clone(),
        });
        self.state = FrameState::InstancesAdded;
        Ok(())
    }

    /// Builds the structure from this frame's entries.
    ///
    /// On failure the manager returns to `Idle` with no valid build.
    ///
    /// # Errors
    ///
    /// `RenderError::BuildFailed` or `RenderError::Allocation` from the
    /// backend, `RenderError::InvalidTransition` before culling.
    pub fn build(&mut self, device: &mut D, origin: Vec3) -> RenderResult<BuildReport> {
        self.require("build", &[FrameState::Culled, FrameState::InstancesAdded])?;
        let Some(structure) = self.structure.as_mut() else {
            return Err(RenderError::Released);
        };

        match device.build_acceleration_structure(structure, &self.entries, origin) {
            Ok(report) => {
                self.generation += 1;
                self.last_build = Some(report);
                self.state = FrameState::Built;
                tracing::debug!(
                    "structure {} built: {} instances (generation {})",
                    report.structure_id,
                    report.instance_count(),
                    self.generation
                );
                Ok(report)
            }
            Err(err) => {
                self.last_build = None;
                self.state = FrameState::Idle;
                Err(err)
            }
        }
    }

    /// Binds the built structure to `view`.
    ///
    /// # Errors
    ///
    /// `RenderError::InvalidTransition` unless built.
    pub fn bind(&mut self, view: &mut TraceView) -> RenderResult<ViewBinding> {
        self.require("bind", &[FrameState::Built])?;
        let report = self.last_build.ok_or(RenderError::InvalidTransition {
            operation: "bind",
            state: self.state,
        })?;

        let binding = ViewBinding {
            structure_id: report.structure_id,
            generation: self.generation,
            instance_count: report.instance_count(),
        };
        view.bind(binding);
        self.state = FrameState::Bound;
        Ok(binding)
    }

    /// Frees the structure. Safe to call repeatedly.
    pub fn release(&mut self, device: &mut D) {
        if let Some(structure) = self.structure.take() {
            device.release_acceleration_structure(structure);
            tracing::debug!("acceleration structure released");
        }
        self.entries.clear();
        self.last_build = None;
        self.state = FrameState::Released;
    }
}

impl<D: RayTracingDevice> Drop for AccelerationStructureManager<D> {
    fn drop(&mut self) {
        if self.structure.is_some() {
            tracing::warn!("acceleration structure dropped without release");
        }
    }
}

fn geometry_for(config: &InstanceConfig) -> RenderResult<InstancedGeometry> {
    let (mesh, material) = config.validate()?;
    Ok(InstancedGeometry {
        mesh,
        material,
        sub_mesh_flags: config.sub_mesh_flags,
        dynamic_geometry: config.dynamic_geometry,
    })
}
