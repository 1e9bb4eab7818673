use thiserror::Error;

/// Error surfaced to the host.
///
/// Every variant maps onto the host error triple of [`BridgeError::domain`],
/// [`BridgeError::code`] and the `Display` text. Script exceptions display as
/// `"<name>: <message>"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The engine returned no handle for a resource.
    #[error("failed to acquire {0}")]
    AcquisitionFailure(&'static str),
    /// The engine raised an exception during compile, call or construct.
    #[error("{name}: {message}")]
    ScriptException { name: String, message: String },
    /// A required argument was missing or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A value has no mapping in the target type system.
    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(String),
    /// The wrapper (or the context it depends on) was already disposed.
    #[error("{0} has been disposed")]
    Disposed(&'static str),
}

impl BridgeError {
    pub const DOMAIN: &'static str = "corebridge-error";

    pub fn script_exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::ScriptException {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn domain(&self) -> &'static str {
        Self::DOMAIN
    }

    /// Stable numeric code per error kind.
    pub fn code(&self) -> u32 {
        match self {
            BridgeError::AcquisitionFailure(_) => 1,
            BridgeError::ScriptException { .. } => 2,
            BridgeError::InvalidArgument(_) => 3,
            BridgeError::UnsupportedConversion(_) => 4,
            BridgeError::Disposed(_) => 5,
        }
    }
}
