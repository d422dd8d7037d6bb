//! # Transport
//!
//! Moves opaque frames between the two runtimes. A transport knows nothing
//! about calls or values; calls and replies share it in both directions and
//! the peer pump tells them apart.

use std::fmt;

pub mod channel;

pub use channel::DuplexChannelTransport;

/// Failures of the pipe itself, as opposed to the calls carried over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The stream ended or the other end went away.
    ConnectionLost(String),
    /// The frame exceeds what this transport will carry.
    PayloadTooLarge,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::PayloadTooLarge => write!(f, "frame exceeds transport limit"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A full-duplex frame pipe, used as `Arc<dyn Transport>`.
///
/// The peer calls `send` from its writer task and `recv` from its pump task,
/// concurrently.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends one whole frame.
    async fn send(&self, payload: &[u8]) -> Result<()>;

    /// Receives the next frame, or `None` once the other side has gone away.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;
}
