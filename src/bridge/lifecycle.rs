use std::cell::Cell;

use crate::bridge::error::BridgeError;

/// Disposal state of a wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Disposed,
}

/// Disposal gate shared by every wrapper type.
///
/// The first call to [`LifecycleCell::begin_dispose`] wins; every later call
/// reports that there is nothing left to release.
#[derive(Debug)]
pub struct LifecycleCell(Cell<Lifecycle>);

impl Default for LifecycleCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleCell {
    pub fn new() -> Self {
        Self(Cell::new(Lifecycle::Active))
    }

    pub fn get(&self) -> Lifecycle {
        self.0.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.get() == Lifecycle::Disposed
    }

    /// Moves to `Disposed`. Returns `true` only for the call that made the transition.
    pub fn begin_dispose(&self) -> bool {
        match self.0.replace(Lifecycle::Disposed) {
            Lifecycle::Active => true,
            Lifecycle::Disposed => false,
        }
    }

    pub fn ensure_active(&self, what: &'static str) -> Result<(), BridgeError> {
        match self.get() {
            Lifecycle::Active => Ok(()),
            Lifecycle::Disposed => Err(BridgeError::Disposed(what)),
        }
    }
}
