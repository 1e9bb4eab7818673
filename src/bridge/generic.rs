//! Host-side tagged value.
use serde::{Deserialize, Serialize};

/// Dynamic value as seen by the host.
///
/// Numbers are always `f64`. Every integer conversion funnels through it, so
/// integers beyond 2^53 in magnitude lose precision on the way in.
///
/// Serializes to plain JSON. Both `Null` and `Undefined` serialize as `null`,
/// which deserializes back as `Null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenericValue {
    #[default]
    Null,
    Undefined,
    Boolean(bool),
    Number(f64),
    String(String),
    Container(Vec<GenericValue>),
}

impl GenericValue {
    /// Builds a container from anything convertible.
    pub fn container<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<GenericValue>,
    {
        GenericValue::Container(items.into_iter().map(Into::into).collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            GenericValue::Null => "null",
            GenericValue::Undefined => "undefined",
            GenericValue::Boolean(_) => "boolean",
            GenericValue::Number(_) => "number",
            GenericValue::String(_) => "string",
            GenericValue::Container(_) => "container",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, GenericValue::Null | GenericValue::Undefined)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            GenericValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            GenericValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            GenericValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_container(&self) -> Option<&[GenericValue]> {
        match self {
            GenericValue::Container(items) => Some(items),
            _ => None,
        }
    }
}

impl From<bool> for GenericValue {
    fn from(value: bool) -> Self {
        GenericValue::Boolean(value)
    }
}

macro_rules! from_number {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for GenericValue {
                #[allow(clippy::cast_lossless, clippy::cast_precision_loss, clippy::unnecessary_cast)]
                fn from(value: $ty) -> Self {
                    GenericValue::Number(value as f64)
                }
            }
        )*
    };
}

from_number!(f64, f32, i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<&str> for GenericValue {
    fn from(value: &str) -> Self {
        GenericValue::String(value.to_string())
    }
}

impl From<String> for GenericValue {
    fn from(value: String) -> Self {
        GenericValue::String(value)
    }
}

impl From<Vec<GenericValue>> for GenericValue {
    fn from(items: Vec<GenericValue>) -> Self {
        GenericValue::Container(items)
    }
}

impl<T: Into<GenericValue>> From<Option<T>> for GenericValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(GenericValue::Null, Into::into)
    }
}
