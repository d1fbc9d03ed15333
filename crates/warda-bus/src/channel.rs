//! The transport boundary: publishing onto the shared room data channel.
//!
//! Inbound packets reach the bus as a stream of [`DataPacket`]s handed to
//! [`Router::run`](crate::Router::run); this trait only covers the outbound
//! direction and who "we" are in the room.

use async_trait::async_trait;
use tokio::sync::broadcast;
use warda_types::{DataPacket, Participant};

use crate::error::TransportError;

/// Default number of outbound packets a slow loopback subscriber may lag by.
const DEFAULT_LOOPBACK_CAPACITY: usize = 256;

#[async_trait]
pub trait DataChannel: Send + Sync + 'static {
    /// The local peer that authors everything published through this channel.
    fn local_participant(&self) -> &Participant;

    /// Sends `data` to every peer on `topic`, reliably and in order.
    async fn publish_data(&self, topic: &str, data: Vec<u8>) -> Result<(), TransportError>;
}

/// An in-process data channel.
///
/// Published packets are fanned out to every [`subscribe`](Self::subscribe)r,
/// stamped with the local participant. With no subscribers a publish is a
/// no-op, the same as publishing into an empty room.
#[derive(Debug, Clone)]
pub struct LoopbackChannel {
    local: Participant,
    outbound: broadcast::Sender<DataPacket>,
}

impl LoopbackChannel {
    pub fn new(local: Participant) -> Self {
        Self::with_capacity(local, DEFAULT_LOOPBACK_CAPACITY)
    }

    pub fn with_capacity(local: Participant, capacity: usize) -> Self {
        let (outbound, _) = broadcast::channel(capacity);
        Self { local, outbound }
    }

    /// Receives every packet published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DataPacket> {
        self.outbound.subscribe()
    }
}

#[async_trait]
impl DataChannel for LoopbackChannel {
    fn local_participant(&self) -> &Participant {
        &self.local
    }

    async fn publish_data(&self, topic: &str, data: Vec<u8>) -> Result<(), TransportError> {
        let packet = DataPacket::new(topic, data).from_participant(self.local.clone());
        if self.outbound.send(packet).is_err() {
            tracing::trace!(topic, "published with no peers listening");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_packets_reach_subscribers() {
        let channel = LoopbackChannel::new(Participant::new("agent", "Agent"));
        let mut rx = channel.subscribe();

        channel
            .publish_data("topic-a", b"payload".to_vec())
            .await
            .expect("publish should succeed");

        let packet = rx.recv().await.expect("should receive packet");
        assert_eq!(packet.topic, "topic-a");
        assert_eq!(packet.data, b"payload");
        assert_eq!(packet.participant, Some(Participant::new("agent", "Agent")));
    }

    #[tokio::test]
    async fn publishing_without_subscribers_succeeds() {
        let channel = LoopbackChannel::new(Participant::new("agent", "Agent"));
        channel
            .publish_data("topic-a", Vec::new())
            .await
            .expect("empty room is not an error");
    }
}
