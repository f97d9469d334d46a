//! Transport seam for live sessions

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{LinkEvent, OutboundFrame};
use crate::Result;

/// Opens connections to the remote conversational service
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Establish a connection and complete the service handshake
    ///
    /// Returns the outbound half and a receiver of inbound events in
    /// arrival order.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the handshake does not complete
    async fn connect(&self) -> Result<(Box<dyn LiveLink>, mpsc::Receiver<LinkEvent>)>;
}

/// Outbound half of an open connection
#[async_trait]
pub trait LiveLink: Send {
    /// Send one microphone frame
    ///
    /// # Errors
    ///
    /// Returns `TransportSendFailure` if the frame could not be written
    async fn send(&mut self, frame: OutboundFrame) -> Result<()>;

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails
    async fn close(&mut self) -> Result<()>;
}
