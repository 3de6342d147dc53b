//! The view a structure is traced from.

/// What a view traces against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewBinding {
    /// Backend id of the structure.
    pub structure_id: u64,
    /// Build generation, bumped on every successful build.
    pub generation: u64,
    /// Instances in the bound build.
    pub instance_count: u32,
}

/// Camera-side slot for the acceleration structure.
#[derive(Debug, Clone, Default)]
pub struct TraceView {
    name: String,
    binding: Option<ViewBinding>,
}

impl TraceView {
    /// Creates an unbound view.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            binding: None,
        }
    }

    /// View name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current binding, if any.
    #[must_use]
    pub const fn binding(&self) -> Option<ViewBinding> {
        self.binding
    }

    /// True when something can be traced.
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    /// Replaces the binding.
    pub fn bind(&mut self, binding: ViewBinding) {
        self.binding = Some(binding);
    }

    /// Drops the binding so no stale structure is traced.
    pub fn unbind(&mut self) {
        self.binding = None;
    }
}
