use std::{cell::RefCell, fmt, rc::Rc};

use log::debug;
use rquickjs::{
    Ctx, Function, Object, Persistent, Value,
    function::{Rest, This},
    object::Property,
};

use crate::bridge::{context::Scope, error::BridgeError, lifecycle::LifecycleCell};

/// Host implementation of a class method. Receives the receiver and the
/// arguments as engine values; an `Err` is thrown into the script.
pub type NativeMethod =
    Rc<dyn for<'js> Fn(Ctx<'js>, Value<'js>, Vec<Value<'js>>) -> rquickjs::Result<Value<'js>>>;

/// Template for a family of objects: a name plus the methods every instance
/// inherits. Immutable once handed to a [`ClassDescriptor`].
#[derive(Clone)]
pub struct ClassDefinition {
    pub name: String,
    pub methods: Vec<(String, NativeMethod)>,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: for<'js> Fn(Ctx<'js>, Value<'js>, Vec<Value<'js>>) -> rquickjs::Result<Value<'js>>
            + 'static,
    {
        self.methods.push((name.into(), Rc::new(method)));
        self
    }
}

impl fmt::Debug for ClassDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDefinition")
            .field("name", &self.name)
            .field(
                "methods",
                &self.methods.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Owns one class template.
///
/// Contexts and objects built from a descriptor hold the template
/// themselves, so a descriptor may be disposed while they are still in use.
pub struct ClassDescriptor {
    definition: RefCell<Option<Rc<ClassDefinition>>>,
    lifecycle: LifecycleCell,
}

impl ClassDescriptor {
    pub fn new(definition: ClassDefinition) -> Result<Self, BridgeError> {
        if definition.name.is_empty() {
            return Err(BridgeError::InvalidArgument(
                "class name must not be empty".into(),
            ));
        }
        debug!("acquired class {:?}", definition.name);
        Ok(Self {
            definition: RefCell::new(Some(Rc::new(definition))),
            lifecycle: LifecycleCell::new(),
        })
    }

    pub(crate) fn raw(&self) -> Result<Rc<ClassDefinition>, BridgeError> {
        self.lifecycle.ensure_active("class descriptor")?;
        self.definition
            .borrow()
            .clone()
            .ok_or(BridgeError::Disposed("class descriptor"))
    }

    pub fn name(&self) -> Result<String, BridgeError> {
        Ok(self.raw()?.name.clone())
    }

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    /// Releases the template. Later calls do nothing.
    pub fn dispose(&self) {
        if self.lifecycle.begin_dispose() {
            if let Some(definition) = self.definition.borrow_mut().take() {
                debug!("released class {:?}", definition.name);
            }
        }
    }
}

impl Drop for ClassDescriptor {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("definition", &self.definition.borrow())
            .field("lifecycle", &self.lifecycle.get())
            .finish()
    }
}

/// The prototype instances of `definition` share in the scope's context,
/// built on first use and cached for the life of the context.
pub(crate) fn prototype<'js>(
    scope: &Scope<'js>,
    definition: &Rc<ClassDefinition>,
) -> Result<Object<'js>, BridgeError> {
    let cached = scope
        .shared()
        .classes
        .borrow()
        .iter()
        .find(|(known, _)| Rc::ptr_eq(known, definition))
        .map(|(_, prototype)| prototype.clone());
    if let Some(prototype) = cached {
        return scope.engine(prototype.restore(scope.ctx()));
    }

    let prototype: Object<'js> =
        scope.engine(scope.prelude()?.call("classPrototype", (definition.name.as_str(),)))?;
    for (name, method) in &definition.methods {
        let method = Rc::clone(method);
        let function = Function::new(
            scope.ctx().clone(),
            move |ctx: Ctx<'js>, this: This<Value<'js>>, arguments: Rest<Value<'js>>| {
                method(ctx, this.0, arguments.0)
            },
        )
        .and_then(|function| function.with_name(name));
        let function = scope.engine(function)?;
        scope.engine(prototype.prop(
            name.as_str(),
            Property::from(function).writable().configurable(),
        ))?;
    }

    scope.shared().classes.borrow_mut().push((
        Rc::clone(definition),
        Persistent::save(scope.ctx(), prototype.clone()),
    ));
    debug!(
        "built prototype for class {:?} with {} method(s)",
        definition.name,
        definition.methods.len()
    );
    Ok(prototype)
}
