//! Opaque asset handles and the configs that reference them.
//!
//! Meshes and materials are owned elsewhere; this layer only needs their
//! identities and the index count of the drawn sub-mesh.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::culling::{Aabb, ShadowCastingMode, SubMeshFlags};
use crate::error::{CoreError, CoreResult};

/// Handle to a mesh owned by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshId(pub u32);

/// Handle to a material owned by the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MaterialId(pub u32);

/// What the pipeline needs to know about a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshDesc {
    /// Backend handle.
    pub id: MeshId,
    /// Index count of sub-mesh 0.
    pub index_count: u32,
    /// Number of sub-meshes.
    pub sub_mesh_count: u32,
}

impl MeshDesc {
    /// Creates a single-sub-mesh description.
    #[must_use]
    pub const fn new(id: MeshId, index_count: u32) -> Self {
        Self {
            id,
            index_count,
            sub_mesh_count: 1,
        }
    }
}

/// How instanced geometry enters the acceleration structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Mesh shared by every instance.
    pub mesh: Option<MeshDesc>,
    /// Material used for hit shading.
    pub material: Option<MaterialId>,
    /// Ray-tracing flags applied to every sub-mesh.
    pub sub_mesh_flags: SubMeshFlags,
    /// Geometry deforms per frame (forces a full geometry rebuild).
    pub dynamic_geometry: bool,
}

impl InstanceConfig {
    /// Creates a static config with `Enabled | ClosestHitOnly` sub-meshes.
    #[must_use]
    pub const fn new(mesh: MeshDesc, material: MaterialId) -> Self {
        Self {
            mesh: Some(mesh),
            material: Some(material),
            sub_mesh_flags: SubMeshFlags::ENABLED.union(SubMeshFlags::CLOSEST_HIT_ONLY),
            dynamic_geometry: false,
        }
    }

    /// Checks that both references are set and at least one sub-mesh is enabled.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidConfig` naming the first missing piece.
    pub fn validate(&self) -> CoreResult<(MeshDesc, MaterialId)> {
        let mesh = self
            .mesh
            .ok_or_else(|| CoreError::InvalidConfig("instance config has no mesh".into()))?;
        let material = self
            .material
            .ok_or_else(|| CoreError::InvalidConfig("instance config has no material".into()))?;
        if !self.sub_mesh_flags.is_enabled() {
            return Err(CoreError::InvalidConfig(
                "instance config disables every sub-mesh".into(),
            ));
        }
        if mesh.sub_mesh_count == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "mesh {:?} has no sub-meshes",
                mesh.id
            )));
        }
        Ok((mesh, material))
    }
}

/// Rasterisation parameters for instanced draws.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrawParams {
    /// Bounds covering every instance; draws are never frustum-culled inside it.
    pub world_bounds: Aabb,
    /// Shadow casting of the instances.
    pub shadow_casting_mode: ShadowCastingMode,
    /// Instances receive shadows.
    pub receive_shadows: bool,
    /// Layer the draw is issued on.
    pub layer: u32,
    /// Material bound for the draw.
    #[serde(skip)]
    pub material: Option<MaterialId>,
}

impl Default for DrawParams {
    fn default() -> Self {
        Self {
            world_bounds: Aabb::from_center_size(Vec3::ZERO, Vec3::splat(10_000.0)),
            shadow_casting_mode: ShadowCastingMode::On,
            receive_shadows: true,
            layer: 0,
            material: None,
        }
    }
}

impl DrawParams {
    /// Returns a copy bound to a material.
    #[must_use]
    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = Some(material);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH: MeshDesc = MeshDesc::new(MeshId(1), 2880);

    #[test]
    fn test_valid_config() {
        let config = InstanceConfig::new(MESH, MaterialId(7));
        let (mesh, material) = config.validate().unwrap();
        assert_eq!(mesh.index_count, 2880);
        assert_eq!(material, MaterialId(7));
    }

    #[test]
    fn test_missing_references() {
        let mut config = InstanceConfig::new(MESH, MaterialId(7));
        config.mesh = None;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));

        let mut config = InstanceConfig::new(MESH, MaterialId(7));
        config.material = None;
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_disabled_flags_rejected() {
        let mut config = InstanceConfig::new(MESH, MaterialId(7));
        config.sub_mesh_flags = SubMeshFlags::DISABLED;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_draw_bounds() {
        let params = DrawParams::default();
        assert_eq!(params.world_bounds.size(), Vec3::splat(10_000.0));
        assert!(params.material.is_none());
    }
}
