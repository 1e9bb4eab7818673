//! Runtime limits applied when an execution group is created.
use rquickjs::Runtime;
use serde::Deserialize;

use crate::bridge::error::BridgeError;

/// Parser and call-depth headroom. Stays well inside the 2 MiB stack Rust
/// gives spawned threads.
pub const DEFAULT_MAX_STACK_SIZE: usize = 512 * 1024;

/// Limits for one [`ExecutionGroup`](crate::ExecutionGroup).
///
/// `None` leaves the engine default in place.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Heap limit in bytes. Allocations past it raise an out-of-memory error.
    pub memory_limit: Option<usize>,
    /// Native stack the engine may use before raising a stack-overflow `RangeError`.
    pub max_stack_size: Option<usize>,
    /// Allocated bytes that trigger an automatic cycle collection.
    pub gc_threshold: Option<usize>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            max_stack_size: Some(DEFAULT_MAX_STACK_SIZE),
            gc_threshold: None,
        }
    }
}

impl GroupConfig {
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = Some(bytes);
        self
    }

    pub fn with_gc_threshold(mut self, bytes: usize) -> Self {
        self.gc_threshold = Some(bytes);
        self
    }

    pub fn from_json_str(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text)
            .map_err(|error| BridgeError::InvalidArgument(format!("group config: {}", error)))
    }

    pub(crate) fn apply(&self, runtime: &Runtime) {
        if let Some(limit) = self.memory_limit {
            runtime.set_memory_limit(limit);
        }
        if let Some(limit) = self.max_stack_size {
            runtime.set_max_stack_size(limit);
        }
        if let Some(threshold) = self.gc_threshold {
            runtime.set_gc_threshold(threshold);
        }
    }
}
