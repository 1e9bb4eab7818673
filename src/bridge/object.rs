//! Script-visible objects held by the host.
use std::{cell::RefCell, fmt, rc::Rc};

use bitflags::bitflags;
use log::{debug, trace};
use rquickjs::{Array, Function, Object, Persistent, Value};

use crate::bridge::{
    class::ClassDescriptor,
    context::{ContextShared, ExecutionContext, Scope},
    convert,
    dispatch::{self, InvocationKind, InvokedEvent},
    error::BridgeError,
    generic::GenericValue,
    lifecycle::LifecycleCell,
    registry::{BackReference, ListenerId, Payload, WrapperId},
};

bitflags! {
    /// Attributes for [`LiveObject::set`]. The empty set is a plain assignment.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PropertyAttributes: u8 {
        const READ_ONLY = 1 << 1;
        const DONT_ENUM = 1 << 2;
        const DONT_DELETE = 1 << 3;
    }
}

/// An engine object kept alive by the host, plus its wrapper registration.
///
/// The object stays reachable until the wrapper is disposed or dropped,
/// which releases it exactly once. Values returned by the accessors are
/// scoped; keep one past its scope with [`Scope::protect`].
pub struct LiveObject {
    object: RefCell<Option<Persistent<Object<'static>>>>,
    back: Rc<BackReference>,
    context: Rc<ContextShared>,
    lifecycle: LifecycleCell,
}

impl LiveObject {
    /// Allocates an object, optionally of `class`, carrying `payload`.
    pub fn new(
        scope: &Scope<'_>,
        class: Option<&ClassDescriptor>,
        payload: Option<Payload>,
    ) -> Result<Self, BridgeError> {
        scope.ensure_live()?;
        let object = scope.engine(Object::new(scope.ctx().clone()))?;
        if let Some(class) = class {
            let prototype = scope.class_prototype(&class.raw()?)?;
            scope.engine(object.set_prototype(Some(&prototype)))?;
        }
        let back = new_back(scope, payload);
        Self::adopt(scope, object, Some(back))
    }

    /// Compiles a function. Syntax errors come back as script exceptions; with
    /// a `source_url` their message ends in ` (<url>:<line>)`.
    pub fn from_source(
        scope: &Scope<'_>,
        name: Option<&str>,
        parameters: &[&str],
        body: &str,
        source_url: Option<&str>,
        starting_line: usize,
    ) -> Result<Self, BridgeError> {
        if let Some(parameter) = parameters.iter().find(|p| !is_identifier(p)) {
            return Err(BridgeError::InvalidArgument(format!(
                "{:?} is not a parameter name",
                parameter
            )));
        }
        let prelude = scope.prelude()?;
        let function: Object<'_> = prelude
            .call("compile", (name, parameters.to_vec(), body))
            .map_err(|error| match convert::engine_error(scope.ctx(), error) {
                BridgeError::ScriptException { name, message } => match source_url {
                    Some(url) => BridgeError::ScriptException {
                        name,
                        message: format!("{} ({}:{})", message, url, starting_line),
                    },
                    None => BridgeError::ScriptException { name, message },
                },
                other => other,
            })?;
        trace!(
            "compiled {:?} with {} parameter(s)",
            name.unwrap_or("anonymous"),
            parameters.len()
        );
        Self::adopt(scope, function, None)
    }

    /// Creates a function whose calls fire `invoked` events on this wrapper.
    pub fn from_callback(scope: &Scope<'_>, name: &str) -> Result<Self, BridgeError> {
        scope.ensure_live()?;
        let back = new_back(scope, None);
        let function = dispatch::callback(scope.ctx(), Rc::clone(&back), InvocationKind::Function)
            .and_then(|function| function.with_name(name));
        let function = scope.engine(function)?;
        Self::adopt(scope, function.into_inner(), Some(back))
    }

    /// Creates a constructor for instances of `class` whose `new` fires
    /// `invoked` events on this wrapper. The event's `this` is the new instance.
    pub fn from_constructor(
        scope: &Scope<'_>,
        class: Option<&ClassDescriptor>,
    ) -> Result<Self, BridgeError> {
        let definition = class.map(ClassDescriptor::raw).transpose()?;
        let prototype = definition
            .as_ref()
            .map(|definition| scope.class_prototype(definition))
            .transpose()?;
        let name = definition
            .as_ref()
            .map_or("Object", |definition| definition.name.as_str());

        let back = new_back(scope, None);
        let intercept = scope.engine(dispatch::callback(
            scope.ctx(),
            Rc::clone(&back),
            InvocationKind::Constructor,
        ))?;
        let constructor: Object<'_> =
            scope.engine(scope.prelude()?.call("makeConstructor", (name, intercept, prototype)))?;
        Self::adopt(scope, constructor, Some(back))
    }

    pub fn from_array<'js>(scope: &Scope<'js>, elements: &[Value<'js>]) -> Result<Self, BridgeError> {
        scope.ensure_live()?;
        let array = scope.engine(Array::new(scope.ctx().clone()))?;
        for (index, element) in elements.iter().enumerate() {
            scope.engine(array.set(index, element.clone()))?;
        }
        Self::adopt(scope, array.into_object(), None)
    }

    /// Wraps an existing object value, such as the result of a property read.
    /// Wrapping the same object twice yields two views of one registration.
    pub fn from_value<'js>(scope: &Scope<'js>, value: &Value<'js>) -> Result<Self, BridgeError> {
        scope.ensure_live()?;
        let Some(object) = value.as_object() else {
            return Err(BridgeError::InvalidArgument(format!(
                "expected an object, got {}",
                value.type_name()
            )));
        };
        Self::adopt(scope, object.clone(), None)
    }

    /// Registers a view of `object`. A fresh `back` is bound to the object;
    /// otherwise the binding it already has is reused, or a new one made.
    fn adopt<'js>(
        scope: &Scope<'js>,
        object: Object<'js>,
        back: Option<Rc<BackReference>>,
    ) -> Result<Self, BridgeError> {
        let shared = scope.shared();
        let owners = shared.group.owner_map(scope)?;
        let back = match back {
            Some(back) => {
                bind(scope, &owners, &object, &back)?;
                back
            }
            None => match owner_of(scope, &owners, &object)? {
                Some(back) => back,
                None => {
                    let back = new_back(scope, None);
                    bind(scope, &owners, &object, &back)?;
                    back
                }
            },
        };

        shared.group.registry.borrow_mut().attach(back.wrapper());
        shared.view_opened();
        debug!("wrapped {} as a {} view", back.wrapper(), object.as_value().type_name());

        Ok(Self {
            object: RefCell::new(Some(Persistent::save(scope.ctx(), object))),
            back,
            context: Rc::clone(shared),
            lifecycle: LifecycleCell::new(),
        })
    }

    /// The object in `scope`, which must belong to this wrapper's context.
    fn live<'js>(&self, scope: &Scope<'js>) -> Result<Object<'js>, BridgeError> {
        self.lifecycle.ensure_active("live object")?;
        scope.ensure_live()?;
        if !Rc::ptr_eq(scope.shared(), &self.context) {
            return Err(BridgeError::InvalidArgument(format!(
                "{} used in a scope of another execution context",
                self.back.wrapper()
            )));
        }
        let object = self
            .object
            .borrow()
            .clone()
            .ok_or(BridgeError::Disposed("live object"))?;
        scope.engine(object.restore(scope.ctx()))
    }

    fn ensure_usable(&self) -> Result<(), BridgeError> {
        self.lifecycle.ensure_active("live object")?;
        self.context.lifecycle.ensure_active("execution context")
    }

    pub fn wrapper_id(&self) -> WrapperId {
        self.back.wrapper()
    }

    /// Whether this wrapper was made in `context`.
    pub fn belongs_to(&self, context: &ExecutionContext) -> bool {
        Rc::ptr_eq(&self.context, context.shared())
    }

    /// The wrapped object as an engine value.
    pub fn value<'js>(&self, scope: &Scope<'js>) -> Result<Value<'js>, BridgeError> {
        Ok(self.live(scope)?.into_value())
    }

    // Properties

    pub fn has(&self, scope: &Scope<'_>, name: &str) -> Result<bool, BridgeError> {
        let object = self.live(scope)?;
        scope.engine(object.contains_key(name))
    }

    pub fn get<'js>(&self, scope: &Scope<'js>, name: &str) -> Result<Value<'js>, BridgeError> {
        let object = self.live(scope)?;
        scope.engine(object.get(name))
    }

    pub fn set<'js>(
        &self,
        scope: &Scope<'js>,
        name: &str,
        value: &Value<'js>,
        attributes: PropertyAttributes,
    ) -> Result<(), BridgeError> {
        let object = self.live(scope)?;
        if attributes.is_empty() {
            return scope.engine(object.set(name, value.clone()));
        }
        let define = scope.prelude()?.call::<_, ()>(
            "define",
            (
                object,
                name,
                value,
                !attributes.contains(PropertyAttributes::READ_ONLY),
                !attributes.contains(PropertyAttributes::DONT_ENUM),
                !attributes.contains(PropertyAttributes::DONT_DELETE),
            ),
        );
        scope.engine(define)
    }

    /// Returns `false` when the property exists but cannot be deleted.
    pub fn delete(&self, scope: &Scope<'_>, name: &str) -> Result<bool, BridgeError> {
        let object = self.live(scope)?;
        scope.engine(scope.prelude()?.call("remove", (object, name)))
    }

    pub fn get_at<'js>(&self, scope: &Scope<'js>, index: u32) -> Result<Value<'js>, BridgeError> {
        let object = self.live(scope)?;
        scope.engine(object.get(index))
    }

    pub fn set_at<'js>(
        &self,
        scope: &Scope<'js>,
        index: u32,
        value: &Value<'js>,
    ) -> Result<(), BridgeError> {
        let object = self.live(scope)?;
        scope.engine(object.set(index, value.clone()))
    }

    /// Enumerable own property names in insertion order.
    pub fn property_names(&self, scope: &Scope<'_>) -> Result<Vec<String>, BridgeError> {
        let object = self.live(scope)?;
        scope.engine(object.keys::<String>().collect())
    }

    /// The prototype, or `null`.
    pub fn prototype<'js>(&self, scope: &Scope<'js>) -> Result<Value<'js>, BridgeError> {
        let object = self.live(scope)?;
        Ok(match object.get_prototype() {
            Some(prototype) => prototype.into_value(),
            None => Value::new_null(scope.ctx().clone()),
        })
    }

    /// Fails for non-object prototypes and for prototype cycles.
    pub fn set_prototype<'js>(
        &self,
        scope: &Scope<'js>,
        prototype: &Value<'js>,
    ) -> Result<(), BridgeError> {
        let object = self.live(scope)?;
        let prototype = if prototype.is_null() {
            None
        } else if let Some(prototype) = prototype.as_object() {
            Some(prototype)
        } else {
            return Err(BridgeError::InvalidArgument(format!(
                "{} is not a valid prototype",
                prototype.type_name()
            )));
        };
        object
            .set_prototype(prototype)
            .map_err(|error| match convert::engine_error(scope.ctx(), error) {
                BridgeError::ScriptException { message, .. } => {
                    BridgeError::InvalidArgument(message)
                }
                other => other,
            })
    }

    // Calls

    /// Calls the object with `arguments` (a container). `this` defaults to
    /// the object itself.
    pub fn call_as_function<'js>(
        &self,
        scope: &Scope<'js>,
        this: Option<&LiveObject>,
        arguments: &GenericValue,
    ) -> Result<Value<'js>, BridgeError> {
        let object = self.live(scope)?;
        let this = match this {
            Some(this) => this.live(scope)?,
            None => object.clone(),
        };
        let arguments = convert::arguments_to_engine(scope.ctx(), arguments)?;
        trace!(
            "calling {} with {} argument(s)",
            self.back.wrapper(),
            arguments.len()
        );
        scope.engine(scope.prelude()?.call("apply", (object, this, arguments)))
    }

    /// Runs `new` on the object. The instance is wrapped in the same context.
    pub fn call_as_constructor(
        &self,
        scope: &Scope<'_>,
        arguments: &GenericValue,
    ) -> Result<LiveObject, BridgeError> {
        let object = self.live(scope)?;
        let arguments = convert::arguments_to_engine(scope.ctx(), arguments)?;
        trace!(
            "constructing {} with {} argument(s)",
            self.back.wrapper(),
            arguments.len()
        );
        let instance: Object<'_> =
            scope.engine(scope.prelude()?.call("construct", (object, arguments)))?;
        Self::adopt(scope, instance, None)
    }

    pub fn is_function(&self, scope: &Scope<'_>) -> Result<bool, BridgeError> {
        Ok(self.live(scope)?.as_value().is_function())
    }

    pub fn is_constructor(&self, scope: &Scope<'_>) -> Result<bool, BridgeError> {
        Ok(self.live(scope)?.as_value().is_constructor())
    }

    // Payload

    pub fn private_payload(&self) -> Result<Option<Payload>, BridgeError> {
        self.ensure_usable()?;
        Ok(self.back.payload())
    }

    /// Only the context that created the object may replace its payload.
    pub fn set_private_payload(&self, payload: Option<Payload>) -> Result<(), BridgeError> {
        self.ensure_usable()?;
        if !self.back.belongs_to(&self.context) {
            return Err(BridgeError::InvalidArgument(format!(
                "{} was created in another execution context",
                self.back.wrapper()
            )));
        }
        self.back.set_payload(payload);
        Ok(())
    }

    // Events

    /// Subscribes to `invoked` events. Only objects made with
    /// [`LiveObject::from_callback`] or [`LiveObject::from_constructor`] fire them.
    pub fn connect_invoked<F>(&self, listener: F) -> Result<ListenerId, BridgeError>
    where
        F: for<'js> Fn(&InvokedEvent<'js>) + 'static,
    {
        self.ensure_usable()?;
        self.context
            .group
            .registry
            .borrow_mut()
            .add_listener(self.back.wrapper(), Rc::new(listener))
            .ok_or(BridgeError::Disposed("live object"))
    }

    /// Returns `false` if `listener` was not subscribed.
    pub fn disconnect(&self, listener: ListenerId) -> Result<bool, BridgeError> {
        self.ensure_usable()?;
        let removed = self
            .context
            .group
            .registry
            .borrow_mut()
            .remove_listener(self.back.wrapper(), listener);
        Ok(removed.is_some())
    }

    // Lifetime

    pub fn is_disposed(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    /// Releases the object and drops this view's registration. Later calls
    /// do nothing.
    pub fn dispose(&self) {
        if !self.lifecycle.begin_dispose() {
            return;
        }
        let object = self.object.borrow_mut().take();
        drop(object);
        let removed = self
            .context
            .group
            .registry
            .borrow_mut()
            .detach(self.back.wrapper());
        drop(removed);
        self.context.view_closed();
        debug!("released {}", self.back.wrapper());
    }
}

impl Drop for LiveObject {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for LiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveObject")
            .field("wrapper", &self.back.wrapper())
            .field("lifecycle", &self.lifecycle.get())
            .finish()
    }
}

fn new_back(scope: &Scope<'_>, payload: Option<Payload>) -> Rc<BackReference> {
    let shared = scope.shared();
    let wrapper = shared.group.registry.borrow_mut().allocate();
    Rc::new(BackReference::new(
        Rc::downgrade(&shared.group),
        Rc::downgrade(shared),
        wrapper,
        payload,
    ))
}

/// Keys `object` to a token that holds `back`, so the binding lives exactly
/// as long as the object.
fn bind<'js>(
    scope: &Scope<'js>,
    owners: &Object<'js>,
    object: &Object<'js>,
    back: &Rc<BackReference>,
) -> Result<(), BridgeError> {
    scope.shared().group.registry.borrow_mut().remember(back);
    let held = Rc::clone(back);
    let token = scope.engine(Function::new(scope.ctx().clone(), move || {
        held.wrapper().to_f64()
    }))?;
    scope.engine(scope.prelude()?.call("own", (owners.clone(), object.clone(), token)))
}

fn owner_of<'js>(
    scope: &Scope<'js>,
    owners: &Object<'js>,
    object: &Object<'js>,
) -> Result<Option<Rc<BackReference>>, BridgeError> {
    let token: Option<Function<'js>> =
        scope.engine(scope.prelude()?.call("ownerOf", (owners.clone(), object.clone())))?;
    let Some(token) = token else {
        return Ok(None);
    };
    let id: f64 = scope.engine(token.call(()))?;
    Ok(WrapperId::from_f64(id).and_then(|id| scope.shared().group.registry.borrow().back(id)))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
