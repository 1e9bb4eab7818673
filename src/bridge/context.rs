use std::{
    cell::{Cell, RefCell},
    fmt, mem,
    rc::Rc,
};

use log::{debug, warn};
use rquickjs::{Coerced, Context, Ctx, Object, Persistent, Type, Value};

use crate::bridge::{
    class::{self, ClassDefinition, ClassDescriptor},
    convert,
    error::BridgeError,
    generic::GenericValue,
    group::{ExecutionGroup, GroupShared},
    lifecycle::LifecycleCell,
    object::LiveObject,
    prelude::Prelude,
};

/// State shared by a context, its scopes and the live objects made in it.
///
/// `group` stays last so every engine value above is gone before the runtime
/// can be.
pub(crate) struct ContextShared {
    prelude: RefCell<Option<Persistent<Object<'static>>>>,
    pub(crate) classes: RefCell<Vec<(Rc<ClassDefinition>, Persistent<Object<'static>>)>>,
    context: RefCell<Option<Context>>,
    pub(crate) lifecycle: LifecycleCell,
    views: Cell<usize>,
    global_class: Option<Rc<ClassDefinition>>,
    pub(crate) group: Rc<GroupShared>,
}

impl ContextShared {
    pub(crate) fn view_opened(&self) {
        self.views.set(self.views.get() + 1);
    }

    pub(crate) fn view_closed(&self) {
        self.views.set(self.views.get().saturating_sub(1));
    }

    // The engine context goes first: the helper values still hold a reference
    // to it, so its release never has to tear the context down by itself.
    fn release(&self) {
        let context = self.context.borrow_mut().take();
        drop(context);
        let classes = mem::take(&mut *self.classes.borrow_mut());
        drop(classes);
        let prelude = self.prelude.borrow_mut().take();
        drop(prelude);
    }
}

/// Owns one engine context and its global object.
///
/// Engine values are only reachable inside [`ExecutionContext::with`]. After
/// [`ExecutionContext::dispose`] every operation on the context or on live
/// objects made in it fails with [`BridgeError::Disposed`].
pub struct ExecutionContext {
    shared: Rc<ContextShared>,
}

impl ExecutionContext {
    /// Creates a context in its own implicit group with an ordinary global object.
    pub fn new() -> Result<Self, BridgeError> {
        Self::in_group(&ExecutionGroup::new()?, None)
    }

    /// Creates a context whose global object is an instance of `class`.
    pub fn with_class(class: &ClassDescriptor) -> Result<Self, BridgeError> {
        Self::in_group(&ExecutionGroup::new()?, Some(class))
    }

    pub fn in_group(
        group: &ExecutionGroup,
        class: Option<&ClassDescriptor>,
    ) -> Result<Self, BridgeError> {
        let group = group.shared()?;
        let global_class = class.map(ClassDescriptor::raw).transpose()?;
        group.ensure_idle()?;

        let context = Context::full(&group.runtime)
            .map_err(|_| BridgeError::AcquisitionFailure("execution context"))?;
        group.context_opened();
        let execution = Self {
            shared: Rc::new(ContextShared {
                prelude: RefCell::new(None),
                classes: RefCell::new(Vec::new()),
                context: RefCell::new(Some(context)),
                lifecycle: LifecycleCell::new(),
                views: Cell::new(0),
                global_class,
                group,
            }),
        };
        execution.with(|scope| scope.install())?;
        debug!(
            "acquired execution context (global class {:?})",
            execution.shared.global_class.as_ref().map(|class| &class.name)
        );
        Ok(execution)
    }

    /// Runs `f` with this context entered.
    ///
    /// One scope per group may be open at a time; entering a second one from
    /// inside `f` fails with [`BridgeError::InvalidArgument`].
    pub fn with<R>(
        &self,
        f: impl for<'js> FnOnce(&Scope<'js>) -> Result<R, BridgeError>,
    ) -> Result<R, BridgeError> {
        self.shared.lifecycle.ensure_active("execution context")?;
        let group = Rc::clone(&self.shared.group);
        let _active = group.enter()?;
        let context = self
            .shared
            .context
            .borrow()
            .clone()
            .ok_or(BridgeError::Disposed("execution context"))?;
        context.with(|ctx| f(&Scope::new(ctx, Rc::clone(&self.shared))))
    }

    pub(crate) fn shared(&self) -> &Rc<ContextShared> {
        &self.shared
    }

    /// The group this context runs in, as a new owning reference.
    pub fn group(&self) -> Result<ExecutionGroup, BridgeError> {
        self.shared.lifecycle.ensure_active("execution context")?;
        Ok(ExecutionGroup::adopt(Rc::clone(&self.shared.group)))
    }

    pub fn global_object(&self) -> Result<LiveObject, BridgeError> {
        self.with(|scope| LiveObject::from_value(scope, &scope.ctx().globals().into_value()))
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lifecycle.is_disposed()
    }

    /// Releases the context. Later calls do nothing.
    pub fn dispose(&self) {
        if !self.shared.lifecycle.begin_dispose() {
            return;
        }
        let views = self.shared.views.get();
        if views > 0 {
            warn!(
                "execution context disposed while {} live object(s) still use it",
                views
            );
        }
        self.shared.release();
        self.shared.group.context_closed();
        debug!("released execution context");
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("views", &self.shared.views.get())
            .field("lifecycle", &self.shared.lifecycle.get())
            .finish()
    }
}

/// An entered [`ExecutionContext`]. Engine values borrowed from a scope live
/// no longer than it.
pub struct Scope<'js> {
    ctx: Ctx<'js>,
    shared: Rc<ContextShared>,
}

impl<'js> Scope<'js> {
    pub(crate) fn new(ctx: Ctx<'js>, shared: Rc<ContextShared>) -> Self {
        Self { ctx, shared }
    }

    pub fn ctx(&self) -> &Ctx<'js> {
        &self.ctx
    }

    pub(crate) fn shared(&self) -> &Rc<ContextShared> {
        &self.shared
    }

    pub(crate) fn ensure_live(&self) -> Result<(), BridgeError> {
        self.shared.lifecycle.ensure_active("execution context")
    }

    pub(crate) fn engine<T>(&self, result: rquickjs::Result<T>) -> Result<T, BridgeError> {
        convert::engine(&self.ctx, result)
    }

    pub(crate) fn prelude(&self) -> Result<Prelude<'js>, BridgeError> {
        self.ensure_live()?;
        let prelude = self
            .shared
            .prelude
            .borrow()
            .clone()
            .ok_or(BridgeError::Disposed("execution context"))?;
        Ok(Prelude::new(self.engine(prelude.restore(&self.ctx))?))
    }

    fn install(&self) -> Result<(), BridgeError> {
        let prelude = self.engine(Prelude::install(&self.ctx))?;
        self.shared
            .prelude
            .replace(Some(Persistent::save(&self.ctx, prelude)));
        if let Some(class) = &self.shared.global_class {
            let prototype = class::prototype(self, class)?;
            self.engine(self.ctx.globals().set_prototype(Some(&prototype)))?;
        }
        Ok(())
    }

    /// Whether this scope was entered through `context`.
    pub fn belongs_to(&self, context: &ExecutionContext) -> bool {
        Rc::ptr_eq(&self.shared, &context.shared)
    }

    /// Keeps `value` alive past this scope until the guard is dropped.
    pub fn protect(&self, value: &Value<'js>) -> Result<ProtectedValue, BridgeError> {
        self.ensure_live()?;
        Ok(ProtectedValue {
            value: Persistent::save(&self.ctx, value.clone()),
            context: Rc::clone(&self.shared),
        })
    }

    /// Brings a protected value into this scope. Any context of the group
    /// that protected it may restore it.
    pub fn restore(&self, protected: &ProtectedValue) -> Result<Value<'js>, BridgeError> {
        self.ensure_live()?;
        if !Rc::ptr_eq(&protected.context.group, &self.shared.group) {
            return Err(BridgeError::InvalidArgument(
                "protected value belongs to another execution group".into(),
            ));
        }
        self.engine(protected.value.clone().restore(&self.ctx))
    }

    pub fn value_kind(&self, value: &Value<'js>) -> Type {
        value.type_of()
    }

    /// Loose (`==`) equality.
    pub fn is_equal(&self, a: &Value<'js>, b: &Value<'js>) -> Result<bool, BridgeError> {
        self.engine(self.prelude()?.call("looseEquals", (a, b)))
    }

    pub fn strict_equals(&self, a: &Value<'js>, b: &Value<'js>) -> Result<bool, BridgeError> {
        self.engine(self.prelude()?.call("strictEquals", (a, b)))
    }

    pub fn is_object_of_class(
        &self,
        value: &Value<'js>,
        class: &ClassDescriptor,
    ) -> Result<bool, BridgeError> {
        let prototype = self.class_prototype(&class.raw()?)?;
        self.engine(self.prelude()?.call("inherits", (prototype, value)))
    }

    pub(crate) fn class_prototype(
        &self,
        definition: &Rc<ClassDefinition>,
    ) -> Result<Object<'js>, BridgeError> {
        class::prototype(self, definition)
    }

    /// `String(value)`. A throwing `toString` comes back as a script exception.
    pub fn to_display_string(&self, value: &Value<'js>) -> Result<String, BridgeError> {
        self.ensure_live()?;
        let Coerced(text) = self.engine(value.get::<Coerced<String>>())?;
        Ok(text)
    }

    pub fn value_from_json(&self, text: &str) -> Result<Value<'js>, BridgeError> {
        let prelude = self.prelude()?;
        prelude
            .call("parseJson", (text,))
            .map_err(|error| match convert::engine_error(&self.ctx, error) {
                BridgeError::ScriptException { message, .. } => {
                    BridgeError::InvalidArgument(format!("malformed JSON: {}", message))
                }
                other => other,
            })
    }

    /// `Ok(None)` for values without a JSON form. `indent` is clamped to 10.
    pub fn value_to_json(
        &self,
        value: &Value<'js>,
        indent: usize,
    ) -> Result<Option<String>, BridgeError> {
        let json: Option<String> =
            self.engine(self.prelude()?.call("toJson", (value, indent.min(10))))?;
        Ok(json)
    }

    pub fn to_engine(&self, value: &GenericValue) -> Result<Value<'js>, BridgeError> {
        self.ensure_live()?;
        convert::to_engine(&self.ctx, value)
    }

    pub fn from_engine(&self, value: &Value<'js>) -> Result<GenericValue, BridgeError> {
        self.ensure_live()?;
        convert::from_engine(&self.ctx, value)
    }

    /// Runs a cycle collection over the whole group.
    pub fn collect_garbage(&self) {
        self.ctx.run_gc();
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("lifecycle", &self.shared.lifecycle.get())
            .finish()
    }
}

/// An engine value kept alive outside any scope, released on drop.
pub struct ProtectedValue {
    value: Persistent<Value<'static>>,
    context: Rc<ContextShared>,
}

impl fmt::Debug for ProtectedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtectedValue")
            .field("lifecycle", &self.context.lifecycle.get())
            .finish()
    }
}
