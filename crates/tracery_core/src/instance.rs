//! Per-instance records uploaded to the structured instance buffer.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Divisor applied to positions before they enter the colormap.
pub const COLOR_POSITION_SCALE: f32 = 10.0;

/// Per-instance data read by the instanced shader and the trace pass.
///
/// Layout matches the `_SphereData` structured buffer: two column-major
/// matrices followed by an RGBA colour, 144 bytes total.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceRecord {
    /// Object-to-world transform.
    pub object_to_world: [[f32; 4]; 4],
    /// Exact inverse of `object_to_world`.
    pub world_to_object: [[f32; 4]; 4],
    /// RGBA colour derived from the instance position.
    pub color: [f32; 4],
}

impl InstanceRecord {
    /// Size in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Builds a record from a transform, deriving the inverse and the colour.
    ///
    /// The inverse is computed here so the pair can never drift apart.
    #[must_use]
    pub fn from_transform(object_to_world: Mat4) -> Self {
        let position = object_to_world.w_axis.truncate();
        Self {
            object_to_world: object_to_world.to_cols_array_2d(),
            world_to_object: object_to_world.inverse().to_cols_array_2d(),
            color: color_from_position(position),
        }
    }

    /// Returns the forward transform.
    #[must_use]
    pub fn transform(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.object_to_world)
    }

    /// Returns the inverse transform.
    #[must_use]
    pub fn inverse_transform(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.world_to_object)
    }

    /// Returns the world-space position (translation column).
    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.transform().w_axis.truncate()
    }
}

/// Maps a world position to a cosmetic colour.
///
/// Each channel is `0.5 + 0.5 * cos(...)`, so r, g and b always land in
/// `[0, 1]`; alpha is fixed at 1. Red and blue both sample the x axis with
/// phase offsets 0 and 4, green samples y with offset 2.
#[must_use]
pub fn color_from_position(position: Vec3) -> [f32; 4] {
    let uv = position / COLOR_POSITION_SCALE;
    [
        0.5 + 0.5 * uv.x.cos(),
        0.5 + 0.5 * (uv.y + 2.0).cos(),
        0.5 + 0.5 * (uv.x + 4.0).cos(),
        1.0,
    ]
}

/// Builds the full record set for a list of transforms.
#[must_use]
pub fn records_from_transforms(transforms: &[Mat4]) -> Vec<InstanceRecord> {
    transforms.iter().copied().map(InstanceRecord::from_transform).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        // 2 mat4 (64 bytes each) + 1 vec4
        assert_eq!(InstanceRecord::SIZE, 144);
    }

    #[test]
    fn test_inverse_stays_in_sync() {
        let transform = Mat4::from_translation(Vec3::new(12.5, -3.0, 40.0));
        let record = InstanceRecord::from_transform(transform);

        let product = record.inverse_transform() * record.transform();
        assert!(product.abs_diff_eq(Mat4::IDENTITY, 1e-5));
        assert_eq!(record.position(), Vec3::new(12.5, -3.0, 40.0));
    }

    #[test]
    fn test_color_range() {
        let samples = [
            Vec3::ZERO,
            Vec3::new(1.0e4, -1.0e4, 3.3),
            Vec3::new(-57.0, 31.0, 0.25),
            Vec3::splat(f32::MAX / 4.0),
        ];
        for p in samples {
            let [r, g, b, a] = color_from_position(p);
            assert_eq!(a, 1.0);
            for channel in [r, g, b] {
                assert!((0.0..=1.0).contains(&channel), "{channel} out of range for {p}");
            }
        }
    }

    #[test]
    fn test_color_at_origin() {
        let [r, g, b, _] = color_from_position(Vec3::ZERO);
        assert!((r - 1.0).abs() < 1e-6);
        assert!((g - (0.5 + 0.5 * 2.0f32.cos())).abs() < 1e-6);
        assert!((b - (0.5 + 0.5 * 4.0f32.cos())).abs() < 1e-6);
    }
}
