#[path = "../common/mod.rs"]
mod common;

use std::{cell::RefCell, rc::Rc};

use corebridge::{
    ClassDefinition, ClassDescriptor, ExecutionContext, ExecutionGroup, GenericValue,
    InvocationKind, LiveObject, bridge::Payload,
};

type Events = Rc<RefCell<Vec<(InvocationKind, GenericValue)>>>;

fn setup() -> ExecutionContext {
    common::context()
}

fn record(object: &LiveObject) -> Events {
    let events: Events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    object
        .connect_invoked(move |event| {
            sink.borrow_mut().push((event.kind, event.arguments.clone()))
        })
        .unwrap();
    events
}

fn mixed_arguments() -> GenericValue {
    GenericValue::container([
        GenericValue::Number(1.0),
        GenericValue::String("a".into()),
        GenericValue::Boolean(true),
    ])
}

#[test]
fn test_host_call_fires_one_event_with_converted_arguments() {
    let context = setup();
    let events = context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let events = record(&callback);
            let result = callback.call_as_function(scope, None, &mixed_arguments())?;
            assert!(result.is_undefined());
            Ok(events)
        })
        .unwrap();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], (InvocationKind::Function, mixed_arguments()));
}

#[test]
fn test_script_call_fires_one_event() {
    let context = setup();
    let (events, result) = context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let events = record(&callback);
            common::install_global(scope, "notify", &callback)?;
            let result = common::run_generic(scope, "return notify(1, 'a', true);")?;
            Ok((events, result))
        })
        .unwrap();

    assert_eq!(result, GenericValue::Undefined);
    assert_eq!(*events.borrow(), vec![(InvocationKind::Function, mixed_arguments())]);
}

#[test]
fn test_arguments_without_generic_form_arrive_as_strings() {
    let context = setup();
    let events = context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let events = record(&callback);
            common::install_global(scope, "notify", &callback)?;
            common::run(scope, "notify({ a: 1 }, function named() {}, [1, [2]], undefined);")?;
            Ok(events)
        })
        .unwrap();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    let (kind, arguments) = &events[0];
    assert_eq!(*kind, InvocationKind::Function);
    let arguments = arguments.as_container().unwrap();
    assert_eq!(arguments.len(), 4);
    assert_eq!(arguments[0], GenericValue::String("[object Object]".into()));
    assert!(
        arguments[1].as_str().is_some_and(|text| text.contains("named")),
        "function argument was {:?}",
        arguments[1]
    );
    assert_eq!(
        arguments[2],
        GenericValue::container([
            GenericValue::Number(1.0),
            GenericValue::container([GenericValue::Number(2.0)]),
        ])
    );
    assert_eq!(arguments[3], GenericValue::Undefined);
}

#[test]
fn test_throwing_to_string_does_not_stop_dispatch() {
    let context = setup();
    let events = context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let events = record(&callback);
            common::install_global(scope, "notify", &callback)?;
            common::run(
                scope,
                "notify({ toString() { throw new Error('no'); } }, Symbol('s')); return 1;",
            )?;
            Ok(events)
        })
        .unwrap();

    let events = events.borrow();
    assert_eq!(events.len(), 1);
    let arguments = events[0].1.as_container().unwrap();
    assert_eq!(arguments.len(), 2);
    assert!(arguments.iter().all(|argument| argument.as_str().is_some()));
}

#[test]
fn test_every_listener_sees_each_call_once() {
    let context = setup();
    let (first, second) = context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let first = record(&callback);
            let second = record(&callback);
            let empty = GenericValue::Container(Vec::new());
            callback.call_as_function(scope, None, &empty)?;
            callback.call_as_function(scope, None, &empty)?;
            Ok((first, second))
        })
        .unwrap();

    assert_eq!(first.borrow().len(), 2);
    assert_eq!(second.borrow().len(), 2);
}

#[test]
fn test_disconnected_listener_is_not_called() {
    let context = setup();
    context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let events: Events = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&events);
            let listener = callback.connect_invoked(move |event| {
                sink.borrow_mut().push((event.kind, event.arguments.clone()))
            })?;

            assert!(callback.disconnect(listener)?);
            assert!(!callback.disconnect(listener)?);
            let result = callback.call_as_function(scope, None, &mixed_arguments())?;
            assert!(result.is_undefined());
            assert!(events.borrow().is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_listeners_outlive_the_view_that_added_them() {
    let context = setup();
    let events = context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let other_view = LiveObject::from_value(scope, &callback.value(scope)?)?;
            assert_eq!(other_view.wrapper_id(), callback.wrapper_id());
            let events = record(&callback);
            common::install_global(scope, "notify", &callback)?;
            callback.dispose();

            common::run(scope, "notify('once');")?;
            assert!(!other_view.is_disposed());
            Ok(events)
        })
        .unwrap();

    assert_eq!(
        *events.borrow(),
        vec![(
            InvocationKind::Function,
            GenericValue::container([GenericValue::String("once".into())])
        )]
    );
}

#[test]
fn test_listener_sees_the_receiver() {
    let context = setup();
    let receivers = context
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let receivers = Rc::new(RefCell::new(Vec::new()));
            let sink = Rc::clone(&receivers);
            callback.connect_invoked(move |event| {
                let receiver = LiveObject::from_value(&event.scope, &event.this)
                    .and_then(|receiver| receiver.get(&event.scope, "tag"))
                    .and_then(|tag| event.scope.from_engine(&tag));
                sink.borrow_mut().push(receiver);
            })?;
            common::install_global(scope, "notify", &callback)?;
            common::run(scope, "const holder = { tag: 'holder', notify }; holder.notify();")?;
            Ok(receivers)
        })
        .unwrap();

    assert_eq!(
        *receivers.borrow(),
        vec![Ok(GenericValue::String("holder".into()))]
    );
}

#[test]
fn test_constructor_fires_event_for_new_instance() {
    common::init_logging();
    let class = ClassDescriptor::new(ClassDefinition::new("Widget")).unwrap();
    let context = ExecutionContext::with_class(&class).unwrap();
    let events = context
        .with(|scope| {
            let constructor = LiveObject::from_constructor(scope, Some(&class))?;
            assert!(constructor.is_constructor(scope)?);
            let events = record(&constructor);
            constructor.connect_invoked(|event| {
                let _ = LiveObject::from_value(&event.scope, &event.this)
                    .and_then(|instance| instance.set_private_payload(Some(Rc::new(99u32) as Payload)));
            })?;
            common::install_global(scope, "Widget", &constructor)?;

            let made = common::run(scope, "return new Widget(3);")?;
            assert!(scope.is_object_of_class(&made, &class)?);
            let instance = LiveObject::from_value(scope, &made)?;
            let payload = instance.private_payload()?.unwrap();
            assert_eq!(payload.downcast_ref::<u32>(), Some(&99));

            let name = common::run_generic(scope, "return Widget.name;")?;
            assert_eq!(name, GenericValue::String("Widget".into()));
            Ok(events)
        })
        .unwrap();

    assert_eq!(
        *events.borrow(),
        vec![(
            InvocationKind::Constructor,
            GenericValue::container([GenericValue::Number(3.0)])
        )]
    );
}

#[test]
fn test_constructor_requires_new() {
    let context = setup();
    let (error, events) = context
        .with(|scope| {
            let constructor = LiveObject::from_constructor(scope, None)?;
            let events = record(&constructor);
            common::install_global(scope, "Plain", &constructor)?;
            let error = common::run(scope, "return Plain();").map(|_| ()).unwrap_err();
            Ok((error, events))
        })
        .unwrap();

    let corebridge::BridgeError::ScriptException { name, .. } = &error else {
        panic!("expected a script exception, got {:?}", error);
    };
    assert_eq!(name, "TypeError");
    assert!(events.borrow().is_empty());
}

#[test]
fn test_call_from_another_context_of_the_group() {
    common::init_logging();
    let group = ExecutionGroup::new().unwrap();
    let owner = ExecutionContext::in_group(&group, None).unwrap();
    let caller = ExecutionContext::in_group(&group, None).unwrap();

    let (callback, events, protected) = owner
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let events = record(&callback);
            let protected = scope.protect(&callback.value(scope)?)?;
            Ok((callback, events, protected))
        })
        .unwrap();

    caller
        .with(|scope| {
            let notify = LiveObject::from_value(scope, &scope.restore(&protected)?)?;
            assert_eq!(notify.wrapper_id(), callback.wrapper_id());
            notify.call_as_function(scope, None, &mixed_arguments())?;
            Ok(())
        })
        .unwrap();

    assert_eq!(*events.borrow(), vec![(InvocationKind::Function, mixed_arguments())]);
}

#[test]
fn test_callback_is_silent_after_its_context_is_disposed() {
    common::init_logging();
    let group = ExecutionGroup::new().unwrap();
    let owner = ExecutionContext::in_group(&group, None).unwrap();
    let caller = ExecutionContext::in_group(&group, None).unwrap();

    let (callback, events, protected) = owner
        .with(|scope| {
            let callback = LiveObject::from_callback(scope, "notify")?;
            let events = record(&callback);
            let protected = scope.protect(&callback.value(scope)?)?;
            Ok((callback, events, protected))
        })
        .unwrap();
    owner.dispose();

    let result = caller
        .with(|scope| {
            let notify = LiveObject::from_value(scope, &scope.restore(&protected)?)?;
            let result = notify.call_as_function(
                scope,
                None,
                &GenericValue::container([GenericValue::String("late".into())]),
            )?;
            scope.from_engine(&result)
        })
        .unwrap();

    assert_eq!(result, GenericValue::Undefined);
    assert!(events.borrow().is_empty());
    assert_eq!(
        callback.private_payload().unwrap_err(),
        corebridge::BridgeError::Disposed("execution context")
    );
}
