use serde::Deserialize;

/// Per-container behaviour switches.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Expose early references of singletons so that property cycles resolve.
    pub allow_circular_references: bool,
    /// Accept a singleton whose final instance differs from the raw
    /// instance already injected into a circular dependent.
    pub allow_raw_injection_despite_wrapping: bool,
    /// Let a later descriptor replace an earlier one with the same name.
    pub allow_descriptor_overriding: bool,
    /// After this many consecutive failures a singleton is no longer retried.
    /// `None` retries forever.
    pub max_creation_attempts: Option<u32>,
    pub worker_queue_capacity: usize,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_circular_references: true,
            allow_raw_injection_despite_wrapping: false,
            allow_descriptor_overriding: true,
            max_creation_attempts: None,
            worker_queue_capacity: 32,
        }
    }
}
