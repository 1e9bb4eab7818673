//! Conversions between engine values and [`GenericValue`].
//!
//! Policy for the cases the two type systems disagree on:
//! - `null` and `undefined` stay distinct in both directions.
//! - Engine arrays are read element by element. A cyclic array, or arrays
//!   nested deeper than [`MAX_CONTAINER_DEPTH`], is an
//!   [`BridgeError::UnsupportedConversion`]. The same depth bounds host
//!   containers on the way in.
//! - Any other engine object (plain objects, functions) has no generic form.
//! - Arguments of a bridge callback are converted leniently instead: whatever
//!   has no generic form arrives as its display string.
//! - A thrown non-object becomes a `ScriptException` named `Exception`.
use rquickjs::{Array, Coerced, Ctx, Error, Value};

use crate::bridge::{error::BridgeError, generic::GenericValue};

pub const MAX_CONTAINER_DEPTH: usize = 64;

/// Realizes `value` in the engine. Containers become new arrays.
pub fn to_engine<'js>(ctx: &Ctx<'js>, value: &GenericValue) -> Result<Value<'js>, BridgeError> {
    to_engine_at(ctx, value, 0)
}

/// Reads `value` back into host form.
pub fn from_engine<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Result<GenericValue, BridgeError> {
    from_engine_in(ctx, value, &mut Vec::new())
}

/// Unpacks a call-argument container into an engine array.
pub fn arguments_to_engine<'js>(
    ctx: &Ctx<'js>,
    arguments: &GenericValue,
) -> Result<Array<'js>, BridgeError> {
    let GenericValue::Container(items) = arguments else {
        return Err(BridgeError::InvalidArgument(format!(
            "call arguments must be a container, got {}",
            arguments.kind_name()
        )));
    };
    let array = engine(ctx, Array::new(ctx.clone()))?;
    for (index, item) in items.iter().enumerate() {
        let element = to_engine_at(ctx, item, 0)?;
        engine(ctx, array.set(index, element))?;
    }
    Ok(array)
}

/// Converts callback arguments. Never fails: values without a generic form
/// fall back to their display string.
pub fn arguments_from_engine<'js>(ctx: &Ctx<'js>, arguments: &[Value<'js>]) -> GenericValue {
    let mut path = Vec::new();
    GenericValue::Container(
        arguments
            .iter()
            .map(|argument| lenient(ctx, argument, &mut path))
            .collect(),
    )
}

/// `ToString` of `value`. A throwing conversion is swallowed and replaced by
/// `[object <type>]`.
pub fn display_string<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    match value.get::<Coerced<String>>() {
        Ok(Coerced(text)) => text,
        Err(_) => {
            ctx.catch();
            format!("[object {}]", value.type_name())
        }
    }
}

/// Turns a thrown engine value into a host error.
pub fn translate_exception<'js>(ctx: &Ctx<'js>, exception: &Value<'js>) -> BridgeError {
    let Some(object) = exception.as_object() else {
        return BridgeError::script_exception("Exception", display_string(ctx, exception));
    };

    let field = |key: &str| match object.get::<_, Value>(key) {
        Ok(value) if value.is_undefined() => None,
        Ok(value) => Some(display_string(ctx, &value)),
        Err(_) => {
            ctx.catch();
            None
        }
    };
    let name = field("name")
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Error".to_string());
    let message = field("message").unwrap_or_default();
    BridgeError::script_exception(name, message)
}

/// Maps an engine failure. A pending exception is taken off the context.
pub(crate) fn engine_error(ctx: &Ctx<'_>, error: Error) -> BridgeError {
    match &error {
        Error::Exception => translate_exception(ctx, &ctx.catch()),
        Error::Allocation => BridgeError::AcquisitionFailure("engine memory"),
        Error::FromJs { .. } => BridgeError::UnsupportedConversion(error.to_string()),
        Error::UnrelatedRuntime => {
            BridgeError::InvalidArgument("value belongs to another execution group".into())
        }
        _ => BridgeError::script_exception("InternalError", error.to_string()),
    }
}

pub(crate) fn engine<T>(ctx: &Ctx<'_>, result: rquickjs::Result<T>) -> Result<T, BridgeError> {
    result.map_err(|error| engine_error(ctx, error))
}

fn to_engine_at<'js>(
    ctx: &Ctx<'js>,
    value: &GenericValue,
    depth: usize,
) -> Result<Value<'js>, BridgeError> {
    Ok(match value {
        GenericValue::Null => Value::new_null(ctx.clone()),
        GenericValue::Undefined => Value::new_undefined(ctx.clone()),
        GenericValue::Boolean(b) => Value::new_bool(ctx.clone(), *b),
        GenericValue::Number(n) => Value::new_number(ctx.clone(), *n),
        GenericValue::String(s) => {
            engine(ctx, rquickjs::String::from_str(ctx.clone(), s))?.into_value()
        }
        GenericValue::Container(items) => {
            if depth >= MAX_CONTAINER_DEPTH {
                return Err(too_deep());
            }
            let array = engine(ctx, Array::new(ctx.clone()))?;
            for (index, item) in items.iter().enumerate() {
                let element = to_engine_at(ctx, item, depth + 1)?;
                engine(ctx, array.set(index, element))?;
            }
            array.into_value()
        }
    })
}

fn from_engine_in<'js>(
    ctx: &Ctx<'js>,
    value: &Value<'js>,
    path: &mut Vec<Array<'js>>,
) -> Result<GenericValue, BridgeError> {
    if let Some(scalar) = engine(ctx, scalar(value))? {
        return Ok(scalar);
    }
    let Some(array) = value.as_array() else {
        return Err(BridgeError::UnsupportedConversion(format!(
            "{} has no generic representation",
            kind_of(value)
        )));
    };
    if path.contains(array) {
        return Err(BridgeError::UnsupportedConversion(
            "array contains itself".into(),
        ));
    }
    if path.len() >= MAX_CONTAINER_DEPTH {
        return Err(too_deep());
    }

    path.push(array.clone());
    let items = (0..array.len())
        .map(|index| {
            let element: Value<'js> = engine(ctx, array.get(index))?;
            from_engine_in(ctx, &element, path)
        })
        .collect::<Result<Vec<_>, _>>();
    path.pop();
    Ok(GenericValue::Container(items?))
}

fn lenient<'js>(ctx: &Ctx<'js>, value: &Value<'js>, path: &mut Vec<Array<'js>>) -> GenericValue {
    match scalar(value) {
        Ok(Some(scalar)) => return scalar,
        Ok(None) => {}
        Err(_) => {
            ctx.catch();
        }
    }
    match value.as_array() {
        Some(array) if !path.contains(array) && path.len() < MAX_CONTAINER_DEPTH => {
            path.push(array.clone());
            let items = (0..array.len())
                .map(|index| match array.get::<Value>(index) {
                    Ok(element) => lenient(ctx, &element, path),
                    Err(_) => {
                        ctx.catch();
                        GenericValue::Undefined
                    }
                })
                .collect();
            path.pop();
            GenericValue::Container(items)
        }
        _ => GenericValue::String(display_string(ctx, value)),
    }
}

/// `Some` for the engine types with a direct generic counterpart.
fn scalar(value: &Value<'_>) -> rquickjs::Result<Option<GenericValue>> {
    if value.is_undefined() {
        return Ok(Some(GenericValue::Undefined));
    }
    if value.is_null() {
        return Ok(Some(GenericValue::Null));
    }
    if let Some(b) = value.as_bool() {
        return Ok(Some(GenericValue::Boolean(b)));
    }
    if let Some(n) = value.as_number() {
        return Ok(Some(GenericValue::Number(n)));
    }
    match value.as_string() {
        Some(s) => Ok(Some(GenericValue::String(s.to_string()?))),
        None => Ok(None),
    }
}

fn kind_of(value: &Value<'_>) -> &'static str {
    if value.is_function() {
        "function"
    } else {
        value.type_name()
    }
}

fn too_deep() -> BridgeError {
    BridgeError::UnsupportedConversion(format!(
        "containers nested deeper than {}",
        MAX_CONTAINER_DEPTH
    ))
}
