//! Host-facing wrappers over a QuickJS runtime.
//!
//! Each wrapper owns exactly one engine reference and gives it back exactly
//! once, on `dispose` or on drop, whichever comes first. Engine values are
//! only reachable inside [`ExecutionContext::with`], which hands out a
//! [`Scope`]; values leave a scope as [`GenericValue`]s, as
//! [`ProtectedValue`]s or wrapped in a [`LiveObject`]. Engine exceptions come
//! back as [`BridgeError::ScriptException`].
pub mod class;
pub mod config;
pub mod context;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod generic;
pub mod group;
pub mod lifecycle;
pub mod object;
mod prelude;
pub mod registry;

pub use class::{ClassDefinition, ClassDescriptor, NativeMethod};
pub use config::GroupConfig;
pub use context::{ExecutionContext, ProtectedValue, Scope};
pub use dispatch::{InvocationKind, InvokedEvent};
pub use error::BridgeError;
pub use generic::GenericValue;
pub use group::ExecutionGroup;
pub use lifecycle::Lifecycle;
pub use object::{LiveObject, PropertyAttributes};
pub use registry::{BackReference, ListenerId, Payload, WrapperId};
