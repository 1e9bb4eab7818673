pub mod bridge;

pub use bridge::{
    BridgeError, ClassDefinition, ClassDescriptor, ExecutionContext, ExecutionGroup,
    GenericValue, GroupConfig, InvocationKind, InvokedEvent, LiveObject, Scope,
};
pub use rquickjs;
