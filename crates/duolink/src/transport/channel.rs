//! In-process transport: two endpoints joined by tokio channels.

use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::transport::Result;
use crate::transport::Transport;
use crate::transport::TransportError;

/// One end of an in-process duplex pipe.
///
/// Dropping an end closes the stream for the other: its `recv` yields `None`
/// and its `send` fails with `ConnectionLost`.
pub struct DuplexChannelTransport {
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    max_frame: Option<usize>,
}

impl DuplexChannelTransport {
    pub fn new(
        outbound: mpsc::UnboundedSender<Vec<u8>>,
        inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        Self { outbound, inbound: Mutex::new(inbound), max_frame: None }
    }

    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (to_b, from_a) = mpsc::unbounded_channel();
        let (to_a, from_b) = mpsc::unbounded_channel();
        (Self::new(to_b, from_b), Self::new(to_a, from_a))
    }

    /// Refuses to send frames longer than `limit` bytes.
    pub fn with_max_frame(mut self, limit: usize) -> Self {
        self.max_frame = Some(limit);
        self
    }
}

#[async_trait::async_trait]
impl Transport for DuplexChannelTransport {
    async fn send(&self, payload: &[u8]) -> Result<()> {
        if self.max_frame.is_some_and(|limit| payload.len() > limit) {
            return Err(TransportError::PayloadTooLarge);
        }
        self.outbound
            .send(payload.to_vec())
            .map_err(|_| TransportError::ConnectionLost("other end dropped".into()))
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.inbound.lock().await.recv().await)
    }
}
