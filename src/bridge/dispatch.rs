//! Native callbacks that turn engine calls into host `invoked` events.
use std::rc::Rc;

use log::trace;
use rquickjs::{
    Ctx, Function, Value,
    function::{Rest, This},
};

use crate::bridge::{
    context::Scope, convert, generic::GenericValue, registry::BackReference,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationKind {
    Function,
    Constructor,
}

/// Payload of the `invoked` event.
#[derive(Debug)]
pub struct InvokedEvent<'js> {
    pub kind: InvocationKind,
    /// Always a [`GenericValue::Container`]. Arguments without a generic form
    /// arrive as their display string.
    pub arguments: GenericValue,
    /// Receiver of the call, or the fresh instance for a constructor.
    pub this: Value<'js>,
    /// The context the callback was made in, entered for the listener.
    pub scope: Scope<'js>,
}

/// Builds the engine function behind a callback or constructor wrapper. It
/// always completes with `undefined`; listeners cannot make it throw.
pub(crate) fn callback<'js>(
    ctx: &Ctx<'js>,
    back: Rc<BackReference>,
    kind: InvocationKind,
) -> rquickjs::Result<Function<'js>> {
    Function::new(
        ctx.clone(),
        move |ctx: Ctx<'js>, this: This<Value<'js>>, arguments: Rest<Value<'js>>| {
            let completion = Value::new_undefined(ctx.clone());
            dispatch(ctx, &back, kind, this.0, &arguments.0);
            completion
        },
    )
}

fn dispatch<'js>(
    ctx: Ctx<'js>,
    back: &BackReference,
    kind: InvocationKind,
    this: Value<'js>,
    arguments: &[Value<'js>],
) {
    let Some(shared) = back.context() else {
        trace!("{} invoked after its context went away", back.wrapper());
        return;
    };
    if shared.lifecycle.is_disposed() {
        trace!("{} invoked after its context was disposed", back.wrapper());
        return;
    }

    let listeners = shared.group.registry.borrow().listeners(back.wrapper());
    trace!(
        "dispatching {:?} on {} with {} argument(s) to {} listener(s)",
        kind,
        back.wrapper(),
        arguments.len(),
        listeners.len()
    );
    if listeners.is_empty() {
        return;
    }

    let event = InvokedEvent {
        kind,
        arguments: convert::arguments_from_engine(&ctx, arguments),
        this,
        scope: Scope::new(ctx, shared),
    };
    for listener in listeners {
        listener(&event);
    }
}
