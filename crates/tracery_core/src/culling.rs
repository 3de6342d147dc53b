//! Renderer culling policy for acceleration-structure builds.
//!
//! A `CullingConfig` decides which non-instanced scene renderers enter the
//! structure and with which per-sub-mesh flags:
//!
//! 1. Each enabled renderer is checked against the culling tests in order.
//! 2. The first passing test supplies the instance mask.
//! 3. Sub-mesh flags come from the material-class policy.
//! 4. Renderers whose sub-meshes are all disabled produce no entry.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Material class of a sub-mesh.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialClass {
    /// Fully opaque surface.
    Opaque = 0,
    /// Alpha-tested (cutout) surface.
    AlphaTested = 1,
    /// Alpha-blended surface.
    Transparent = 2,
}

/// Shadow-casting mode of a renderer.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowCastingMode {
    /// Casts no shadows.
    Off = 0,
    /// Casts shadows.
    #[default]
    On = 1,
    /// Casts shadows from both faces.
    TwoSided = 2,
    /// Only casts shadows, invisible otherwise.
    ShadowsOnly = 3,
}

impl ShadowCastingMode {
    /// Bit of this mode inside a shadow-casting-mode mask.
    #[inline]
    #[must_use]
    pub const fn bit(self) -> u32 {
        1 << self as u32
    }

    /// Builds a mask from a list of modes.
    #[must_use]
    pub fn mask_of(modes: &[Self]) -> u32 {
        modes.iter().fold(0, |mask, mode| mask | mode.bit())
    }
}

/// A single per-sub-mesh ray-tracing flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubMeshFlag {
    /// Sub-mesh is part of the structure.
    Enabled,
    /// Only the closest-hit shader runs (geometry treated as opaque).
    ClosestHitOnly,
    /// Any-hit shader runs at most once per primitive.
    UniqueAnyHitCalls,
}

/// Per-sub-mesh ray-tracing flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Vec<SubMeshFlag>", into = "Vec<SubMeshFlag>")]
pub struct SubMeshFlags(u32);

impl SubMeshFlags {
    /// Sub-mesh excluded from the structure.
    pub const DISABLED: Self = Self(0);
    /// Sub-mesh included.
    pub const ENABLED: Self = Self(1 << 0);
    /// Closest-hit only.
    pub const CLOSEST_HIT_ONLY: Self = Self(1 << 1);
    /// Unique any-hit invocations.
    pub const UNIQUE_ANY_HIT_CALLS: Self = Self(1 << 2);

    /// Combine flags.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Check if a flag is set.
    #[must_use]
    pub const fn contains(&self, flag: Self) -> bool {
        (self.0 & flag.0) == flag.0
    }

    /// True when the sub-mesh takes part in the structure.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.contains(Self::ENABLED)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.0
    }
}

impl From<SubMeshFlag> for SubMeshFlags {
    fn from(flag: SubMeshFlag) -> Self {
        match flag {
            SubMeshFlag::Enabled => Self::ENABLED,
            SubMeshFlag::ClosestHitOnly => Self::CLOSEST_HIT_ONLY,
            SubMeshFlag::UniqueAnyHitCalls => Self::UNIQUE_ANY_HIT_CALLS,
        }
    }
}

impl From<Vec<SubMeshFlag>> for SubMeshFlags {
    fn from(flags: Vec<SubMeshFlag>) -> Self {
        flags
            .into_iter()
            .fold(Self::DISABLED, |acc, flag| acc.union(flag.into()))
    }
}

impl From<SubMeshFlags> for Vec<SubMeshFlag> {
    fn from(flags: SubMeshFlags) -> Self {
        [
            (SubMeshFlags::ENABLED, SubMeshFlag::Enabled),
            (SubMeshFlags::CLOSEST_HIT_ONLY, SubMeshFlag::ClosestHitOnly),
            (SubMeshFlags::UNIQUE_ANY_HIT_CALLS, SubMeshFlag::UniqueAnyHitCalls),
        ]
        .into_iter()
        .filter(|(bits, _)| flags.contains(*bits))
        .map(|(_, flag)| flag)
        .collect()
    }
}

/// Sub-mesh flag policy per material class.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubMeshFlagsConfig {
    /// Flags for opaque sub-meshes.
    pub opaque_materials: SubMeshFlags,
    /// Flags for alpha-tested sub-meshes.
    pub alpha_tested_materials: SubMeshFlags,
    /// Flags for transparent sub-meshes.
    pub transparent_materials: SubMeshFlags,
}

impl SubMeshFlagsConfig {
    /// Flags applied to a sub-mesh of the given class.
    #[must_use]
    pub const fn flags_for(&self, class: MaterialClass) -> SubMeshFlags {
        match class {
            MaterialClass::Opaque => self.opaque_materials,
            MaterialClass::AlphaTested => self.alpha_tested_materials,
            MaterialClass::Transparent => self.transparent_materials,
        }
    }
}

impl Default for SubMeshFlagsConfig {
    fn default() -> Self {
        Self {
            opaque_materials: SubMeshFlags::ENABLED.union(SubMeshFlags::CLOSEST_HIT_ONLY),
            alpha_tested_materials: SubMeshFlags::ENABLED,
            transparent_materials: SubMeshFlags::DISABLED,
        }
    }
}

/// One filter a renderer may pass to enter the structure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingTest {
    /// Instance mask written into entries that pass this test.
    pub instance_mask: u8,
    /// Bitmask of accepted layers (bit `n` accepts layer `n`).
    pub layer_mask: u32,
    /// Bitmask of accepted shadow-casting modes (see `ShadowCastingMode::bit`).
    pub shadow_casting_mode_mask: u32,
    /// Accept renderers using opaque materials.
    pub allow_opaque_materials: bool,
    /// Accept renderers using alpha-tested materials.
    pub allow_alpha_tested_materials: bool,
    /// Accept renderers using transparent materials.
    pub allow_transparent_materials: bool,
}

impl CullingTest {
    /// Returns true when the material class is accepted.
    #[must_use]
    pub const fn allows(&self, class: MaterialClass) -> bool {
        match class {
            MaterialClass::Opaque => self.allow_opaque_materials,
            MaterialClass::AlphaTested => self.allow_alpha_tested_materials,
            MaterialClass::Transparent => self.allow_transparent_materials,
        }
    }

    /// Returns true when the renderer passes this test.
    #[must_use]
    pub fn passes(&self, renderer: &SceneRenderer) -> bool {
        let layer_ok = renderer.layer < 32 && self.layer_mask & (1 << renderer.layer) != 0;
        let shadow_ok = self.shadow_casting_mode_mask & renderer.shadow_casting_mode.bit() != 0;
        layer_ok
            && shadow_ok
            && renderer
                .sub_mesh_classes
                .iter()
                .all(|class| self.allows(*class))
    }
}

impl Default for CullingTest {
    fn default() -> Self {
        Self {
            instance_mask: 0xFF,
            layer_mask: u32::MAX,
            shadow_casting_mode_mask: ShadowCastingMode::mask_of(&[
                ShadowCastingMode::Off,
                ShadowCastingMode::On,
                ShadowCastingMode::TwoSided,
            ]),
            allow_opaque_materials: true,
            allow_alpha_tested_materials: true,
            allow_transparent_materials: false,
        }
    }
}

/// Complete culling policy for one session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingConfig {
    /// Sub-mesh flags per material class.
    pub sub_mesh_flags: SubMeshFlagsConfig,
    /// Tests tried in order; the first pass wins.
    pub instance_tests: Vec<CullingTest>,
}

impl Default for CullingConfig {
    fn default() -> Self {
        Self {
            sub_mesh_flags: SubMeshFlagsConfig::default(),
            instance_tests: vec![CullingTest::default()],
        }
    }
}

impl CullingConfig {
    /// Evaluates one renderer.
    ///
    /// Returns `None` when the renderer is disabled, fails every test or has
    /// no enabled sub-mesh under the class policy.
    #[must_use]
    pub fn evaluate(&self, renderer: &SceneRenderer) -> Option<CulledRenderer> {
        if !renderer.enabled || renderer.sub_mesh_classes.is_empty() {
            return None;
        }

        let test = self.instance_tests.iter().find(|test| test.passes(renderer))?;

        let sub_mesh_flags: Vec<SubMeshFlags> = renderer
            .sub_mesh_classes
            .iter()
            .map(|class| self.sub_mesh_flags.flags_for(*class))
            .collect();

        if !sub_mesh_flags.iter().any(SubMeshFlags::is_enabled) {
            return None;
        }

        Some(CulledRenderer {
            renderer_id: renderer.id,
            transform: renderer.transform,
            instance_mask: test.instance_mask,
            sub_mesh_flags,
        })
    }

    /// Evaluates every renderer, keeping the ones that pass.
    pub fn cull<'a, I>(&self, renderers: I) -> Vec<CulledRenderer>
    where
        I: IntoIterator<Item = &'a SceneRenderer>,
    {
        renderers
            .into_iter()
            .filter_map(|renderer| self.evaluate(renderer))
            .collect()
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Aabb {
    /// Creates a box from its center and full size.
    #[must_use]
    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Box center.
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Full size along each axis.
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}

/// Read-only record of a non-instanced scene renderer.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneRenderer {
    /// Stable renderer identifier.
    pub id: u32,
    /// World transform.
    pub transform: Mat4,
    /// World-space bounds.
    pub bounds: Aabb,
    /// Layer index (0..32).
    pub layer: u32,
    /// Shadow-casting mode.
    pub shadow_casting_mode: ShadowCastingMode,
    /// Material class of each sub-mesh.
    pub sub_mesh_classes: Vec<MaterialClass>,
    /// Disabled renderers never enter the structure.
    pub enabled: bool,
}

impl SceneRenderer {
    /// Creates an enabled, shadow-casting, single-sub-mesh renderer at a position.
    #[must_use]
    pub fn new(id: u32, position: Vec3, class: MaterialClass) -> Self {
        Self {
            id,
            transform: Mat4::from_translation(position),
            bounds: Aabb::from_center_size(position, Vec3::ONE),
            layer: 0,
            shadow_casting_mode: ShadowCastingMode::On,
            sub_mesh_classes: vec![class],
            enabled: true,
        }
    }
}

/// A renderer that passed culling, ready to become a structure entry.
#[derive(Clone, Debug, PartialEq)]
pub struct CulledRenderer {
    /// Source renderer.
    pub renderer_id: u32,
    /// World transform.
    pub transform: Mat4,
    /// Mask from the first passing test.
    pub instance_mask: u8,
    /// Flags per sub-mesh.
    pub sub_mesh_flags: Vec<SubMeshFlags>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(class: MaterialClass) -> SceneRenderer {
        SceneRenderer::new(1, Vec3::ZERO, class)
    }

    #[test]
    fn test_default_policy() {
        let config = CullingConfig::default();

        let opaque = config.evaluate(&renderer(MaterialClass::Opaque)).unwrap();
        assert_eq!(opaque.instance_mask, 0xFF);
        assert!(opaque.sub_mesh_flags[0].contains(SubMeshFlags::CLOSEST_HIT_ONLY));

        let cutout = config.evaluate(&renderer(MaterialClass::AlphaTested)).unwrap();
        assert_eq!(cutout.sub_mesh_flags[0], SubMeshFlags::ENABLED);

        assert!(config.evaluate(&renderer(MaterialClass::Transparent)).is_none());
    }

    #[test]
    fn test_shadows_only_rejected_by_default() {
        let mut r = renderer(MaterialClass::Opaque);
        r.shadow_casting_mode = ShadowCastingMode::ShadowsOnly;
        assert!(CullingConfig::default().evaluate(&r).is_none());
    }

    #[test]
    fn test_layer_mask() {
        let mut config = CullingConfig::default();
        config.instance_tests[0].layer_mask = 1 << 3;

        let mut r = renderer(MaterialClass::Opaque);
        assert!(config.evaluate(&r).is_none());
        r.layer = 3;
        assert!(config.evaluate(&r).is_some());
        r.layer = 40;
        assert!(config.evaluate(&r).is_none());
    }

    #[test]
    fn test_first_passing_test_supplies_mask() {
        let mut config = CullingConfig::default();
        config.instance_tests = vec![
            CullingTest {
                instance_mask: 0x01,
                layer_mask: 1 << 5,
                ..CullingTest::default()
            },
            CullingTest {
                instance_mask: 0x02,
                ..CullingTest::default()
            },
        ];

        let mut r = renderer(MaterialClass::Opaque);
        assert_eq!(config.evaluate(&r).unwrap().instance_mask, 0x02);
        r.layer = 5;
        assert_eq!(config.evaluate(&r).unwrap().instance_mask, 0x01);
    }

    #[test]
    fn test_mixed_sub_meshes() {
        let mut config = CullingConfig::default();
        config.instance_tests[0].allow_transparent_materials = true;

        let mut r = renderer(MaterialClass::Opaque);
        r.sub_mesh_classes = vec![MaterialClass::Opaque, MaterialClass::Transparent];
        let culled = config.evaluate(&r).unwrap();
        assert!(culled.sub_mesh_flags[0].is_enabled());
        assert!(!culled.sub_mesh_flags[1].is_enabled());

        // Transparent-only renderer has nothing enabled under the class policy.
        r.sub_mesh_classes = vec![MaterialClass::Transparent];
        assert!(config.evaluate(&r).is_none());
    }

    #[test]
    fn test_disabled_renderer_skipped() {
        let mut r = renderer(MaterialClass::Opaque);
        r.enabled = false;
        assert!(CullingConfig::default().evaluate(&r).is_none());
    }

    #[test]
    fn test_cull_filters() {
        let scene = vec![
            SceneRenderer::new(1, Vec3::ZERO, MaterialClass::Opaque),
            SceneRenderer::new(2, Vec3::X, MaterialClass::Transparent),
            SceneRenderer::new(3, Vec3::Y, MaterialClass::AlphaTested),
        ];
        let culled = CullingConfig::default().cull(&scene);
        let mut ids: Vec<u32> = culled.iter().map(|c| c.renderer_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_shadow_mask_bits() {
        assert_eq!(ShadowCastingMode::Off.bit(), 1);
        assert_eq!(ShadowCastingMode::TwoSided.bit(), 4);
        assert_eq!(CullingTest::default().shadow_casting_mode_mask, 0b0111);
    }
}
