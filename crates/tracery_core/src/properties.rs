//! Shader property identifiers.
//!
//! Names are resolved to small integer ids once per process. The table is
//! read-only after the first lookup.

use std::collections::HashMap;
use std::sync::OnceLock;

/// Structured buffer holding `InstanceRecord`s.
pub const SPHERE_DATA: &str = "_SphereData";
/// Buffer holding one `Mat4` per instance for structure builds.
pub const RTX_MATRICES: &str = "_RtxMatrices";
/// Instance count uniform of the position-update kernel.
pub const COUNT: &str = "_Count";

/// Every property the pipeline binds, in id order.
const KNOWN_PROPERTIES: [&str; 3] = [SPHERE_DATA, RTX_MATRICES, COUNT];

/// Interned shader property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub u32);

impl PropertyId {
    /// `_SphereData`.
    #[must_use]
    pub fn sphere_data() -> Self {
        Self::expect_known(SPHERE_DATA)
    }

    /// `_RtxMatrices`.
    #[must_use]
    pub fn rtx_matrices() -> Self {
        Self::expect_known(RTX_MATRICES)
    }

    /// `_Count`.
    #[must_use]
    pub fn count() -> Self {
        Self::expect_known(COUNT)
    }

    /// Property name for this id.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        KNOWN_PROPERTIES.get(self.0 as usize).copied()
    }

    fn expect_known(name: &str) -> Self {
        // Only called with entries of KNOWN_PROPERTIES.
        property_id(name).unwrap_or(Self(u32::MAX))
    }
}

fn table() -> &'static HashMap<&'static str, PropertyId> {
    static TABLE: OnceLock<HashMap<&'static str, PropertyId>> = OnceLock::new();
    TABLE.get_or_init(|| {
        (0u32..)
            .zip(KNOWN_PROPERTIES.iter())
            .map(|(index, name)| (*name, PropertyId(index)))
            .collect()
    })
}

/// Looks up the id of a shader property.
#[must_use]
pub fn property_id(name: &str) -> Option<PropertyId> {
    table().get(name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_stable() {
        assert_eq!(property_id("_SphereData"), Some(PropertyId::sphere_data()));
        assert_eq!(property_id("_SphereData"), property_id("_SphereData"));
        assert_ne!(PropertyId::sphere_data(), PropertyId::rtx_matrices());
        assert_ne!(PropertyId::rtx_matrices(), PropertyId::count());
    }

    #[test]
    fn test_name_round_trip() {
        assert_eq!(PropertyId::count().name(), Some("_Count"));
        assert_eq!(property_id("_Unknown"), None);
    }
}
