//! Procedural instance placement.
//!
//! Produces a tapering spiral lattice: `x` walks outwards, `y` climbs, `z`
//! walks around the circle. Everything here is a pure function of its
//! arguments, so the same dimensions always yield the same poses in the same
//! order.

use std::f32::consts::PI;

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Angular step divisor; 31 closes the circle at `z = 31`.
const CIRCULAR_STEPS: f32 = 31.0;
/// Innermost ring radius.
const BASE_RADIUS: f32 = 5.0;
/// Twist per vertical step, applied as `(x * TWIST)^2`.
const TWIST: f32 = 0.004;
/// Vertical flare factor, applied as `(y * FLARE)^FLARE_EXPONENT`.
const FLARE: f32 = 0.02;
/// Exponent of the vertical flare.
const FLARE_EXPONENT: f32 = 1.6;

/// Lattice dimensions (radial, vertical, circular).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatticeDims {
    /// Radial steps.
    pub x: u32,
    /// Vertical steps.
    pub y: u32,
    /// Circular steps.
    pub z: u32,
}

impl LatticeDims {
    /// Creates new dimensions.
    #[must_use]
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of poses the lattice produces.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.x as usize * self.y as usize * self.z as usize
    }
}

impl Default for LatticeDims {
    fn default() -> Self {
        Self::new(32, 32, 32)
    }
}

/// Returns the lattice position for one index triple.
#[inline]
#[must_use]
#[allow(clippy::cast_precision_loss)] // lattice indices stay far below 2^24
pub fn lattice_position(x: u32, y: u32, z: u32) -> Vec3 {
    let (xf, yf, zf) = (x as f32, y as f32, z as f32);
    let angle = yf * (xf * TWIST).powi(2) + 2.0 * PI * zf / CIRCULAR_STEPS;
    let radius = BASE_RADIUS + xf * (1.0 + (yf * FLARE).powf(FLARE_EXPONENT));
    Vec3::new(radius * angle.cos(), yf, radius * angle.sin())
}

/// Generates the translation-only transforms of the spiral lattice.
///
/// Order is x-major, then y, then z.
#[must_use]
pub fn generate(count_x: u32, count_y: u32, count_z: u32) -> Vec<Mat4> {
    let dims = LatticeDims::new(count_x, count_y, count_z);
    let mut matrices = Vec::with_capacity(dims.count());

    for x in 0..count_x {
        for y in 0..count_y {
            for z in 0..count_z {
                matrices.push(Mat4::from_translation(lattice_position(x, y, z)));
            }
        }
    }

    matrices
}

/// Generates the lattice for a `LatticeDims`.
#[must_use]
pub fn generate_dims(dims: LatticeDims) -> Vec<Mat4> {
    generate(dims.x, dims.y, dims.z)
}

/// Generates an animated row of `count` instances along x.
///
/// Instance `i` sits at `(-4.5 + i, 1, sin(time + i))`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn sphere_row(count: u32, time: f32) -> Vec<Mat4> {
    (0..count)
        .map(|i| {
            let i = i as f32;
            Mat4::from_translation(Vec3::new(-4.5 + i, 1.0, (time + i).sin()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lattice_count() {
        let matrices = generate(32, 32, 32);
        assert_eq!(matrices.len(), 32 * 32 * 32);
        assert_eq!(LatticeDims::default().count(), 32_768);
    }

    #[test]
    fn test_deterministic() {
        let a = generate(8, 6, 4);
        let b = generate(8, 6, 4);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_dimension() {
        assert!(generate(0, 32, 32).is_empty());
        assert!(generate(4, 4, 0).is_empty());
    }

    #[test]
    fn test_translation_only_and_finite() {
        for m in generate(6, 6, 6) {
            assert_eq!(m.x_axis, glam::Vec4::X);
            assert_eq!(m.y_axis, glam::Vec4::Y);
            assert_eq!(m.z_axis, glam::Vec4::Z);
            assert!(m.w_axis.is_finite());
        }
    }

    #[test]
    fn test_first_ring() {
        // x = 0, y = 0: a flat ring of radius 5.
        let p = lattice_position(0, 0, 0);
        assert!((p - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);

        let full_turn = lattice_position(0, 0, 31);
        assert!((full_turn.x - 5.0).abs() < 1e-4);
        assert!(full_turn.z.abs() < 1e-4);
    }

    #[test]
    fn test_vertical_component_is_index() {
        let matrices = generate(2, 3, 2);
        // Index layout: x * (3 * 2) + y * 2 + z
        assert_eq!(matrices[6 + 2 * 2 + 1].w_axis.y, 2.0);
    }

    #[test]
    fn test_sphere_row() {
        let row = sphere_row(10, 0.0);
        assert_eq!(row.len(), 10);
        assert_eq!(row[0].w_axis.truncate(), Vec3::new(-4.5, 1.0, 0.0));
        assert!((row[9].w_axis.x - 4.5).abs() < 1e-6);
        assert!((row[3].w_axis.z - 3.0f32.sin()).abs() < 1e-6);
    }
}
