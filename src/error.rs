use crate::value::{Operation, RefKind};

/// Errors returned synchronously by the bridge.
///
/// Operational failures (transport errors, body read errors) never show up here: they are
/// delivered to the guest's failure callback as error refs instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The handle was released or never belonged to this realm.
    #[error("invalid ref")]
    InvalidRef,

    #[error("expected a {expected} ref, got {found}")]
    UnexpectedRefKind { expected: RefKind, found: RefKind },

    /// A primitive was passed where a specific value shape is required.
    #[error("expected {expected}, got {found}")]
    UnexpectedValue { expected: &'static str, found: &'static str },

    #[error("unsupported operation `{operation}` for value of kind {kind}")]
    Unsupported { kind: RefKind, operation: Operation },

    #[error("unknown property `{key}` on {kind}")]
    UnknownProperty { kind: RefKind, key: String },

    #[error("unknown method `{method}` on {kind}")]
    UnknownMethod { kind: RefKind, method: String },

    /// A browser member the bridge knows about but does not provide.
    #[error("not implemented: {kind}.{member}")]
    NotImplemented { kind: RefKind, member: &'static str },

    #[error("missing argument {index} for {callee}")]
    MissingArgument { callee: &'static str, index: usize },

    /// `fetch` was invoked without a transport in the execution context. Guests are expected to
    /// check `fetch` on the global object first.
    #[error("no transport installed in the execution context")]
    TransportUnavailable,

    #[error("{kind} already settled")]
    AlreadySettled { kind: RefKind },

    #[error("response body already used")]
    BodyUsed,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The request could not be built from the guest's url and options.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

impl BridgeError {
    /// `NotImplemented` when `key` is one of the browser members listed in `unimplemented`,
    /// `UnknownProperty` otherwise.
    pub(crate) fn unknown_property(kind: RefKind, key: &str, unimplemented: &'static [&'static str]) -> Self {
        match unimplemented.iter().copied().find(|m| *m == key) {
            Some(member) => BridgeError::NotImplemented { kind, member },
            None => BridgeError::UnknownProperty { kind, key: key.to_string() },
        }
    }

    pub(crate) fn unknown_method(kind: RefKind, method: &str, unimplemented: &'static [&'static str]) -> Self {
        match unimplemented.iter().copied().find(|m| *m == method) {
            Some(member) => BridgeError::NotImplemented { kind, member },
            None => BridgeError::UnknownMethod { kind, method: method.to_string() },
        }
    }
}
