//! # Tracery Core
//!
//! GPU-free building blocks of the instanced ray-tracing pipeline:
//!
//! - Instance records (`InstanceRecord`) and the position colormap
//! - The spiral lattice generator
//! - Raw indirect argument layouts
//! - Renderer culling policy
//! - Asset handles and instance configs
//! - TOML pipeline configuration
//!
//! ## CRITICAL RULE
//!
//! This crate must NEVER depend on `wgpu` or any other GPU crate. Anything
//! that touches a device lives in `tracery_rendering`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod assets;
pub mod config;
pub mod culling;
pub mod error;
pub mod indirect;
pub mod instance;
pub mod lattice;
pub mod properties;

pub use assets::{DrawParams, InstanceConfig, MaterialId, MeshDesc, MeshId};
pub use config::{FrameSettings, PipelineConfig};
pub use culling::{
    Aabb, CulledRenderer, CullingConfig, CullingTest, MaterialClass, SceneRenderer,
    ShadowCastingMode, SubMeshFlag, SubMeshFlags, SubMeshFlagsConfig,
};
pub use error::{CoreError, CoreResult};
pub use indirect::{DrawIndexedIndirectArgs, InstanceRangeArgs};
pub use instance::{color_from_position, records_from_transforms, InstanceRecord};
pub use lattice::{generate, generate_dims, sphere_row, LatticeDims};
pub use properties::{property_id, PropertyId};

pub use glam::{Mat4, Vec3, Vec4};
