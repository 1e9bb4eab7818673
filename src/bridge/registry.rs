//! Wrapper bookkeeping for one execution group.
//!
//! Every object the bridge has wrapped is keyed in the group's owner map to a
//! token that holds its [`BackReference`]. The back-reference names a
//! registry entry by a [`WrapperId`], never by pointer, and is never
//! retargeted once installed. It lives as long as the object does.
use std::{
    any::Any,
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::{Rc, Weak},
};

use crate::bridge::{context::ContextShared, dispatch::InvokedEvent, group::GroupShared};

/// Opaque host payload attached to a bridge-owned object.
pub type Payload = Rc<dyn Any>;

pub(crate) type Listener = Rc<dyn for<'js> Fn(&InvokedEvent<'js>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WrapperId(u64);

impl WrapperId {
    /// Engine-side form carried by the owner token. Ids stay far below 2^53.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn to_f64(self) -> f64 {
        self.0 as f64
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(crate) fn from_f64(value: f64) -> Option<Self> {
        (value.is_finite() && value >= 1.0 && value.fract() == 0.0).then(|| WrapperId(value as u64))
    }
}

impl fmt::Display for WrapperId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wrapper#{}", self.0)
    }
}

/// Identifies one `invoked` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Bridge state attached to one engine object.
///
/// Owned by the engine side: the owner token and any native callback built
/// for the object hold it, so it is dropped (with its payload) when the
/// object is collected.
pub struct BackReference {
    group: Weak<GroupShared>,
    context: Weak<ContextShared>,
    wrapper: WrapperId,
    payload: RefCell<Option<Payload>>,
}

impl BackReference {
    pub(crate) fn new(
        group: Weak<GroupShared>,
        context: Weak<ContextShared>,
        wrapper: WrapperId,
        payload: Option<Payload>,
    ) -> Self {
        Self {
            group,
            context,
            wrapper,
            payload: RefCell::new(payload),
        }
    }

    pub fn wrapper(&self) -> WrapperId {
        self.wrapper
    }

    pub fn payload(&self) -> Option<Payload> {
        self.payload.borrow().clone()
    }

    pub(crate) fn set_payload(&self, payload: Option<Payload>) {
        let previous = self.payload.replace(payload);
        drop(previous);
    }

    /// The context that created the object, while it is still around.
    pub(crate) fn context(&self) -> Option<Rc<ContextShared>> {
        self.context.upgrade()
    }

    pub(crate) fn belongs_to(&self, context: &Rc<ContextShared>) -> bool {
        std::ptr::eq(self.context.as_ptr(), Rc::as_ptr(context))
    }
}

impl Drop for BackReference {
    fn drop(&mut self) {
        let Some(group) = self.group.upgrade() else {
            return;
        };
        // Skipped while the registry is borrowed; a dead entry resolves to nothing.
        if let Ok(mut registry) = group.registry.try_borrow_mut() {
            registry.forget(self.wrapper);
        }
    }
}

impl fmt::Debug for BackReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackReference")
            .field("wrapper", &self.wrapper)
            .field("has_payload", &self.payload.borrow().is_some())
            .finish()
    }
}

pub(crate) struct WrapperEntry {
    views: usize,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Live wrappers of one group, keyed by [`WrapperId`].
///
/// Several [`LiveObject`](crate::bridge::LiveObject)s may view the same entry;
/// the entry (and its listeners) goes away with the last view. The
/// back-reference index outlives views and is pruned as objects are collected.
#[derive(Default)]
pub(crate) struct WrapperRegistry {
    entries: HashMap<WrapperId, WrapperEntry>,
    backs: HashMap<WrapperId, Weak<BackReference>>,
    next_wrapper: u64,
    next_listener: u64,
}

impl WrapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> WrapperId {
        self.next_wrapper += 1;
        WrapperId(self.next_wrapper)
    }

    pub fn remember(&mut self, back: &Rc<BackReference>) {
        self.backs.insert(back.wrapper(), Rc::downgrade(back));
    }

    pub fn back(&self, id: WrapperId) -> Option<Rc<BackReference>> {
        self.backs.get(&id).and_then(Weak::upgrade)
    }

    pub fn forget(&mut self, id: WrapperId) {
        self.backs.remove(&id);
    }

    /// Adds a view, creating the entry when it is the first one.
    pub fn attach(&mut self, id: WrapperId) {
        self.entries
            .entry(id)
            .or_insert_with(|| WrapperEntry {
                views: 0,
                listeners: Vec::new(),
            })
            .views += 1;
    }

    /// Drops one view. Returns the entry once the last view is gone so the
    /// caller can drop its listeners outside any borrow.
    pub fn detach(&mut self, id: WrapperId) -> Option<WrapperEntry> {
        let entry = self.entries.get_mut(&id)?;
        entry.views = entry.views.saturating_sub(1);
        if entry.views == 0 {
            self.entries.remove(&id)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn views(&self, id: WrapperId) -> usize {
        self.entries.get(&id).map_or(0, |entry| entry.views)
    }

    pub fn add_listener(&mut self, id: WrapperId, listener: Listener) -> Option<ListenerId> {
        let entry = self.entries.get_mut(&id)?;
        self.next_listener += 1;
        let listener_id = ListenerId(self.next_listener);
        entry.listeners.push((listener_id, listener));
        Some(listener_id)
    }

    pub fn remove_listener(&mut self, id: WrapperId, listener: ListenerId) -> Option<Listener> {
        let entry = self.entries.get_mut(&id)?;
        let position = entry.listeners.iter().position(|(l, _)| *l == listener)?;
        Some(entry.listeners.remove(position).1)
    }

    /// Snapshot of the listeners of `id`, in subscription order.
    pub fn listeners(&self, id: WrapperId) -> Vec<Listener> {
        self.entries.get(&id).map_or_else(Vec::new, |entry| {
            entry.listeners.iter().map(|(_, l)| Rc::clone(l)).collect()
        })
    }
}
