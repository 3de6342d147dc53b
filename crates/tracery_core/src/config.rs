//! # Pipeline Configuration
//!
//! Loaded once at startup from TOML. Every section is optional; missing
//! sections and fields fall back to the defaults below.
//!
//! ```toml
//! [lattice]
//! x = 32
//! y = 32
//! z = 32
//!
//! [frame]
//! paused = false
//! origin = [0.0, 0.0, 0.0]
//! frames = 120
//!
//! [culling.sub_mesh_flags]
//! opaque_materials = ["enabled", "closest_hit_only"]
//! alpha_tested_materials = ["enabled"]
//! transparent_materials = []
//!
//! [[culling.instance_tests]]
//! instance_mask = 255
//! allow_transparent_materials = false
//! ```

use std::path::Path;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::assets::DrawParams;
use crate::culling::CullingConfig;
use crate::error::{CoreError, CoreResult};
use crate::lattice::LatticeDims;

/// Per-frame behaviour of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameSettings {
    /// Skip the structure rebuild and keep the last binding.
    pub paused: bool,
    /// Origin hint passed to every build.
    pub origin: Vec3,
    /// Frames the demo driver runs.
    pub frames: u32,
    /// Seconds advanced per frame by the demo driver.
    pub delta_time: f32,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            paused: false,
            origin: Vec3::ZERO,
            frames: 120,
            delta_time: 1.0 / 60.0,
        }
    }
}

/// Everything the pipeline reads from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Lattice dimensions.
    pub lattice: LatticeDims,
    /// Renderer culling policy.
    pub culling: CullingConfig,
    /// Rasterisation parameters.
    pub draw: DrawParams,
    /// Frame behaviour.
    pub frame: FrameSettings,
}

impl PipelineConfig {
    /// Parses a config from TOML text.
    ///
    /// # Errors
    ///
    /// `CoreError::Toml` on malformed input, `CoreError::InvalidConfig` when
    /// the parsed values cannot drive the pipeline.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// `CoreError::Io` when the file cannot be read, otherwise as
    /// `from_toml_str`.
    pub fn from_toml_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Checks values that deserialize fine but break the pipeline.
    ///
    /// # Errors
    ///
    /// `CoreError::InvalidConfig` describing the first problem.
    pub fn validate(&self) -> CoreResult<()> {
        if self.lattice.count() == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "lattice {}x{}x{} holds no instances",
                self.lattice.x, self.lattice.y, self.lattice.z
            )));
        }
        if u32::try_from(self.lattice.count()).is_err() {
            return Err(CoreError::InvalidConfig(format!(
                "lattice holds {} instances, more than a u32 count",
                self.lattice.count()
            )));
        }
        if self.culling.instance_tests.is_empty() {
            return Err(CoreError::InvalidConfig(
                "culling config has no instance tests".into(),
            ));
        }
        if !self.frame.origin.is_finite() {
            return Err(CoreError::InvalidConfig("build origin is not finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::culling::{ShadowCastingMode, SubMeshFlags};

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.lattice.count(), 32_768);
        assert!(!config.frame.paused);
    }

    #[test]
    fn test_partial_sections() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [lattice]
            x = 4
            y = 2

            [frame]
            paused = true
            origin = [1.0, 2.0, 3.0]

            [draw]
            shadow_casting_mode = "two_sided"
            "#,
        )
        .unwrap();

        assert_eq!(config.lattice, LatticeDims::new(4, 2, 32));
        assert!(config.frame.paused);
        assert_eq!(config.frame.origin, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(config.draw.shadow_casting_mode, ShadowCastingMode::TwoSided);
        assert!(config.draw.receive_shadows);
    }

    #[test]
    fn test_culling_section() {
        let config = PipelineConfig::from_toml_str(
            r#"
            [culling.sub_mesh_flags]
            transparent_materials = ["enabled", "unique_any_hit_calls"]

            [[culling.instance_tests]]
            instance_mask = 1
            layer_mask = 8
            allow_transparent_materials = true
            "#,
        )
        .unwrap();

        let flags = config.culling.sub_mesh_flags.transparent_materials;
        assert!(flags.contains(SubMeshFlags::UNIQUE_ANY_HIT_CALLS));
        // Unlisted classes keep the default policy.
        assert!(config
            .culling
            .sub_mesh_flags
            .opaque_materials
            .contains(SubMeshFlags::CLOSEST_HIT_ONLY));

        let test = config.culling.instance_tests[0];
        assert_eq!(test.instance_mask, 1);
        assert_eq!(test.layer_mask, 8);
        assert!(test.allow_opaque_materials);
        assert!(test.allow_transparent_materials);
    }

    #[test]
    fn test_rejects_empty_lattice() {
        let err = PipelineConfig::from_toml_str("[lattice]\nz = 0\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_no_tests() {
        let err = PipelineConfig::from_toml_str("[culling]\ninstance_tests = []\n").unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfig(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = PipelineConfig::from_toml_str("[lattice\n").unwrap_err();
        assert!(matches!(err, CoreError::Toml(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = PipelineConfig::from_toml_file("/nonexistent/tracery.toml").unwrap_err();
        assert!(matches!(err, CoreError::Io { .. }));
    }
}
