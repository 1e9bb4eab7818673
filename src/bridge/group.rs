use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use log::debug;
use rquickjs::{Object, Persistent, Runtime};

use crate::bridge::{
    config::GroupConfig, context::Scope, error::BridgeError, lifecycle::LifecycleCell,
    registry::WrapperRegistry,
};

/// One engine runtime plus the bookkeeping shared by its contexts.
///
/// Field order is drop order: engine values held here must go before the
/// runtime that owns them.
pub(crate) struct GroupShared {
    owners: RefCell<Option<Persistent<Object<'static>>>>,
    pub(crate) registry: RefCell<WrapperRegistry>,
    active: Cell<bool>,
    contexts: Cell<usize>,
    pub(crate) runtime: Runtime,
}

/// Marks the group's runtime as in use until dropped.
pub(crate) struct ActiveScope<'g>(&'g GroupShared);

impl std::fmt::Debug for ActiveScope<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveScope").finish_non_exhaustive()
    }
}

impl Drop for ActiveScope<'_> {
    fn drop(&mut self) {
        self.0.active.set(false);
    }
}

impl GroupShared {
    fn new(config: &GroupConfig) -> Result<Self, BridgeError> {
        let runtime =
            Runtime::new().map_err(|_| BridgeError::AcquisitionFailure("execution group"))?;
        config.apply(&runtime);
        Ok(Self {
            owners: RefCell::new(None),
            registry: RefCell::new(WrapperRegistry::new()),
            active: Cell::new(false),
            contexts: Cell::new(0),
            runtime,
        })
    }

    /// The runtime admits one scope at a time; a nested one is refused here
    /// rather than left to the engine lock.
    pub(crate) fn enter(&self) -> Result<ActiveScope<'_>, BridgeError> {
        self.ensure_idle()?;
        self.active.set(true);
        Ok(ActiveScope(self))
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), BridgeError> {
        if self.active.get() {
            return Err(BridgeError::InvalidArgument(
                "a scope is already open in this execution group".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn context_opened(&self) {
        self.contexts.set(self.contexts.get() + 1);
    }

    pub(crate) fn context_closed(&self) {
        self.contexts.set(self.contexts.get().saturating_sub(1));
    }

    /// Weak map from wrapped objects to their owner tokens, created on first use.
    pub(crate) fn owner_map<'js>(&self, scope: &Scope<'js>) -> Result<Object<'js>, BridgeError> {
        if let Some(owners) = self.owners.borrow().clone() {
            return scope.engine(owners.restore(scope.ctx()));
        }
        let owners: Object<'js> = scope.engine(scope.prelude()?.call("ownerMap", ()))?;
        self.owners
            .replace(Some(Persistent::save(scope.ctx(), owners.clone())));
        Ok(owners)
    }
}

/// Owns one reference to an engine runtime.
///
/// Contexts created in the group hold their own reference, so disposing the
/// wrapper only gives up this one.
pub struct ExecutionGroup {
    shared: RefCell<Option<Rc<GroupShared>>>,
    lifecycle: LifecycleCell,
}

impl ExecutionGroup {
    pub fn new() -> Result<Self, BridgeError> {
        Self::with_config(&GroupConfig::default())
    }

    pub fn with_config(config: &GroupConfig) -> Result<Self, BridgeError> {
        let shared = Rc::new(GroupShared::new(config)?);
        debug!("acquired execution group {:?}", config);
        Ok(Self::adopt(shared))
    }

    /// Wraps a reference the caller already holds.
    pub(crate) fn adopt(shared: Rc<GroupShared>) -> Self {
        Self {
            shared: RefCell::new(Some(shared)),
            lifecycle: LifecycleCell::new(),
        }
    }

    pub(crate) fn shared(&self) -> Result<Rc<GroupShared>, BridgeError> {
        self.lifecycle.ensure_active("execution group")?;
        self.shared
            .borrow()
            .clone()
            .ok_or(BridgeError::Disposed("execution group"))
    }

    /// Number of live contexts in this group.
    pub fn context_count(&self) -> Result<usize, BridgeError> {
        Ok(self.shared()?.contexts.get())
    }

    /// Whether `other` refers to the same runtime.
    pub fn same_group(&self, other: &ExecutionGroup) -> bool {
        match (&*self.shared.borrow(), &*other.shared.borrow()) {
            (Some(a), Some(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Runs a full cycle collection. Refused while a scope is open.
    pub fn collect_garbage(&self) -> Result<(), BridgeError> {
        let shared = self.shared()?;
        shared.ensure_idle()?;
        shared.runtime.run_gc();
        debug!("collected execution group");
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    /// Releases this reference. Later calls do nothing.
    pub fn dispose(&self) {
        if self.lifecycle.begin_dispose() {
            let released = self.shared.borrow_mut().take();
            drop(released);
            debug!("released execution group");
        }
    }
}

impl Drop for ExecutionGroup {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ExecutionGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGroup")
            .field("contexts", &self.shared.borrow().as_ref().map(|s| s.contexts.get()))
            .field("lifecycle", &self.lifecycle.get())
            .finish()
    }
}
