//! # Error Definitions
//!
//! Two families live here. `Error` is this side failing to encode or decode.
//! `Failure` is the description of a call that failed on the *other* side,
//! which travels back inside a Reply frame.

use duopack::Error as PackError;

/// Local codec and framing failures.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// The underlying duopack serialization failed.
    Serialization(PackError),
    /// The wire value did not have the expected shape.
    TypeMismatch { expected: String, found: String },
    /// The number of values did not match the signature.
    ArityMismatch { expected: String, found: usize },
    /// An unknown variant tag was encountered.
    UnknownVariant(String),
    /// The envelope was malformed (e.g., missing sequence header).
    ProtocolViolation(String),
    /// The nested depth of a value exceeded the safety limit.
    RecursionLimitExceeded,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization error: {}", e),
            Self::TypeMismatch { expected, found } => {
                write!(f, "type mismatch: expected {}, found {}", expected, found)
            }
            Self::ArityMismatch { expected, found } => {
                write!(f, "expected {} values, found {}", expected, found)
            }
            Self::UnknownVariant(tag) => write!(f, "unknown variant '{}'", tag),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::RecursionLimitExceeded => write!(f, "value nesting exceeds recursion limit"),
        }
    }
}

impl std::error::Error for Error {}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Serialization(e)
    }
}

/// A specialized Result type for codec operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a remote failure (the "Err" side of a Reply).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No callable, method, or object by that name or reference.
    NotFound,
    /// Arguments did not match the callable's signature.
    Decode,
    /// The callable's results could not be encoded.
    Encode,
    /// The callable panicked; the dispatcher caught it.
    Panic,
    /// The callable returned an explicit error, or a constructor produced no instance.
    Raised,
    /// The object reference was already closed.
    Stale,
    /// The request frame itself was malformed.
    Protocol,
}

impl FailureKind {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::Decode => "Decode",
            Self::Encode => "Encode",
            Self::Panic => "Panic",
            Self::Raised => "Raised",
            Self::Stale => "Stale",
            Self::Protocol => "Protocol",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self> {
        match tag {
            "NotFound" => Ok(Self::NotFound),
            "Decode" => Ok(Self::Decode),
            "Encode" => Ok(Self::Encode),
            "Panic" => Ok(Self::Panic),
            "Raised" => Ok(Self::Raised),
            "Stale" => Ok(Self::Stale),
            "Protocol" => Ok(Self::Protocol),
            other => Err(Error::UnknownVariant(other.to_string())),
        }
    }
}

/// A remote failure: what went wrong and a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn raised(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Raised, message)
    }

    /// Classifies a codec error raised while reading arguments.
    pub fn decode(e: &Error) -> Self {
        Self::new(FailureKind::Decode, e.to_string())
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_tag(), self.message)
    }
}

impl std::error::Error for Failure {}
