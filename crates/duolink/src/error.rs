//! # Error Definitions
//!
//! Everything a caller of the bridge can observe going wrong. Remote failures
//! arrive as `duorpc::Failure` and are translated kind-for-kind into `CallError`.

use duorpc::Failure;
use duorpc::FailureKind;
use duorpc::ObjectRef;

use crate::registry::CallableKind;
use crate::transport::TransportError;

/// Failure of one call, local or remote.
#[derive(Debug, Clone, PartialEq)]
pub enum CallError {
    /// No function, class, method, or object by that name or reference.
    NotFound(String),
    /// Arguments or results did not decode against the expected shapes.
    Decode(String),
    /// Arguments or results could not be encoded.
    Encode(String),
    /// The callable panicked on the serving side.
    InvocationPanic(String),
    /// The callable returned an explicit error, or a constructor produced no instance.
    Raised(String),
    /// The typed accessor asked for a type the result does not have.
    TypeMismatch { expected: String, found: String },
    /// The object reference was already closed on the serving side.
    StaleReference(String),
    /// Method call on a local handle that was already closed; nothing was sent.
    HandleClosed(ObjectRef),
    Transport(TransportError),
    /// A frame broke the envelope rules.
    Protocol(String),
    /// The caller gave up on the result before a reply arrived.
    Cancelled,
    Timeout,
    /// The reply channel was dropped without an answer.
    ChannelClosed,
    /// A blocking read was attempted where it would stall the runtime driving the reply.
    WouldBlock,
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "not found: {}", msg),
            Self::Decode(msg) => write!(f, "decode error: {}", msg),
            Self::Encode(msg) => write!(f, "encode error: {}", msg),
            Self::InvocationPanic(msg) => write!(f, "callable panicked: {}", msg),
            Self::Raised(msg) => write!(f, "callable failed: {}", msg),
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Self::StaleReference(msg) => write!(f, "stale reference: {}", msg),
            Self::HandleClosed(r) => write!(f, "handle for {} is closed", r),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Protocol(msg) => write!(f, "protocol violation: {}", msg),
            Self::Cancelled => write!(f, "call cancelled"),
            Self::Timeout => write!(f, "call timed out"),
            Self::ChannelClosed => write!(f, "reply channel closed"),
            Self::WouldBlock => write!(f, "blocking read inside a current-thread runtime task"),
        }
    }
}

impl std::error::Error for CallError {}

impl From<Failure> for CallError {
    fn from(failure: Failure) -> Self {
        let Failure { kind, message } = failure;
        match kind {
            FailureKind::NotFound => Self::NotFound(message),
            FailureKind::Decode => Self::Decode(message),
            FailureKind::Encode => Self::Encode(message),
            FailureKind::Panic => Self::InvocationPanic(message),
            FailureKind::Raised => Self::Raised(message),
            FailureKind::Stale => Self::StaleReference(message),
            FailureKind::Protocol => Self::Protocol(message),
        }
    }
}

/// Conversion failures on this side surface as type mismatches.
impl From<duorpc::Error> for CallError {
    fn from(e: duorpc::Error) -> Self {
        match e {
            duorpc::Error::TypeMismatch { expected, found } => {
                Self::TypeMismatch { expected, found }
            }
            duorpc::Error::ArityMismatch { expected, found } => Self::TypeMismatch {
                expected: format!("{} values", expected),
                found: format!("{} values", found),
            },
            other => Self::Decode(other.to_string()),
        }
    }
}

impl From<TransportError> for CallError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, CallError>;

/// Registration failures. These happen before any call traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName { kind: CallableKind, name: String },
    DuplicateMethod { class: String, method: String },
    NotFound { kind: CallableKind, name: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateName { kind, name } => {
                write!(f, "{} '{}' is already registered", kind, name)
            }
            Self::DuplicateMethod { class, method } => {
                write!(f, "class '{}' declares method '{}' twice", class, method)
            }
            Self::NotFound { kind, name } => write!(f, "no {} named '{}'", kind, name),
        }
    }
}

impl std::error::Error for RegistryError {}

impl From<RegistryError> for Failure {
    fn from(e: RegistryError) -> Self {
        let kind = match e {
            RegistryError::NotFound { .. } => FailureKind::NotFound,
            RegistryError::DuplicateName { .. } | RegistryError::DuplicateMethod { .. } => {
                FailureKind::Protocol
            }
        };
        Failure::new(kind, e.to_string())
    }
}

/// Failures while assembling a bridge.
#[derive(Debug)]
pub enum BuildError {
    Registry(RegistryError),
    /// No runtime was configured and none is active on this thread.
    NoRuntime,
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry(e) => write!(f, "registry error: {}", e),
            Self::NoRuntime => write!(f, "no tokio runtime configured or active"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<RegistryError> for BuildError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}
