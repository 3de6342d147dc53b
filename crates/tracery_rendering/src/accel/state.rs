//! Per-frame lifecycle of the acceleration structure.

use std::fmt;

/// Where the manager is in the current frame.
///
/// ```text
/// Idle -> Cleared -> Culled -> InstancesAdded -> Built -> Bound
///            ^__________________________________________|
/// ```
///
/// `clear` restarts from any live state. `Released` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrameState {
    /// Created, nothing recorded yet (also after a failed build).
    #[default]
    Idle,
    /// Last frame's entries dropped.
    Cleared,
    /// Scene renderers evaluated.
    Culled,
    /// At least one instanced group added.
    InstancesAdded,
    /// Structure built for this frame.
    Built,
    /// Structure bound to a view.
    Bound,
    /// Structure freed.
    Released,
}

impl FrameState {
    /// Returns true unless released.
    #[must_use]
    pub const fn is_live(self) -> bool {
        !matches!(self, Self::Released)
    }

    /// Returns true when a built structure is available for tracing.
    #[must_use]
    pub const fn has_build(self) -> bool {
        matches!(self, Self::Built | Self::Bound)
    }
}

impl fmt::Display for FrameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Cleared => "cleared",
            Self::Culled => "culled",
            Self::InstancesAdded => "instances-added",
            Self::Built => "built",
            Self::Bound => "bound",
            Self::Released => "released",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(FrameState::InstancesAdded.to_string(), "instances-added");
        assert_eq!(FrameState::default(), FrameState::Idle);
    }

    #[test]
    fn test_predicates() {
        assert!(FrameState::Bound.has_build());
        assert!(!FrameState::Culled.has_build());
        assert!(!FrameState::Released.is_live());
    }
}
