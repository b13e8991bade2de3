use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::types::{ClientEvent, InboundEvent};

/// Broadcast stream of inbound events consumed by dispatch bridges.
pub type InboundStream = broadcast::Receiver<InboundEvent>;

/// Errors returned by realtime channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport side stopped reading outbound events.
    #[error("outbound channel is closed")]
    OutboundClosed,
}

/// Connection handle shared between a transport and the dispatch bridge.
///
/// Outbound events flow to the transport over an `mpsc` queue; inbound events
/// fan out to every subscriber over `broadcast`.
#[derive(Clone, Debug)]
pub struct RealtimeChannels {
    outbound_tx: mpsc::Sender<ClientEvent>,
    inbound_tx: broadcast::Sender<InboundEvent>,
}

impl RealtimeChannels {
    /// Create a new channel set and return it with the outbound receiver the
    /// transport drains.
    pub fn new(
        outbound_buffer: usize,
        inbound_buffer: usize,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(outbound_buffer.max(1));
        let (inbound_tx, _) = broadcast::channel(inbound_buffer.max(1));

        (
            Self {
                outbound_tx,
                inbound_tx,
            },
            outbound_rx,
        )
    }

    /// Subscribe to inbound events.
    pub fn subscribe(&self) -> InboundStream {
        self.inbound_tx.subscribe()
    }

    /// Emit one event to the server.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ChannelError> {
        self.outbound_tx
            .send(event)
            .await
            .map_err(|_| ChannelError::OutboundClosed)
    }

    /// Deliver an event received from the server to all subscribers.
    ///
    /// Delivery is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn deliver(&self, event: InboundEvent) {
        let _ = self.inbound_tx.send(event);
    }
}
