//! WebSocket gateway onto the shared data channel.
//!
//! Each socket is one room peer. Its text frames become inbound
//! [`DataPacket`]s for the router; everything the agent publishes is fanned
//! out to every socket.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        ConnectInfo, Extension, Query, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;
use warda_types::{DataPacket, Participant};

use crate::AppState;

/// Per-socket outbound buffer; a client further behind than this loses frames.
const SESSION_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
pub struct WsConnectParams {
    pub identity: Option<String>,
    pub name: Option<String>,
}

/// A packet sent by a peer.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub topic: String,
    /// The packet body, usually an envelope's JSON text.
    pub data: String,
}

/// A packet delivered to peers.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub topic: String,
    pub data: String,
    pub participant: Option<Participant>,
}

impl OutboundFrame {
    fn from_packet(packet: DataPacket) -> Self {
        Self {
            topic: packet.topic,
            data: String::from_utf8_lossy(&packet.data).into_owned(),
            participant: packet.participant,
        }
    }
}

/// Peers connected to the gateway, by session.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Participant>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a peer and returns its session id. The same identity may
    /// hold several sessions.
    pub async fn join(&self, participant: Participant) -> Uuid {
        let session_id = Uuid::new_v4();
        self.sessions.write().await.insert(session_id, participant);
        session_id
    }

    pub async fn leave(&self, session_id: Uuid) -> Option<Participant> {
        self.sessions.write().await.remove(&session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// WebSocket handler: `GET /ws?identity=...&name=...`.
pub async fn ws_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(params): Query<WsConnectParams>,
) -> impl IntoResponse {
    let Some(identity) = params.identity.filter(|id| !id.trim().is_empty()) else {
        tracing::warn!(remote_addr = %addr, "websocket connect missing identity");
        return StatusCode::BAD_REQUEST.into_response();
    };
    let name = params
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| identity.clone());

    tracing::info!(identity = %identity, remote_addr = %addr, "peer connecting");
    let participant = Participant::new(identity, name);
    ws.on_upgrade(move |socket| handle_socket(socket, state, participant))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, participant: Participant) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(SESSION_BUFFER);

    // Subscribe before announcing the join so the config reply is not missed.
    let outbound = state.channel.subscribe();
    let session_id = state.peers.join(participant.clone()).await;

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(AxumMessage::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });
    let relay_task = tokio::spawn(relay_outbound(outbound, tx, participant.identity.clone()));

    if let Err(e) = state.config_service.send_agent_config() {
        tracing::warn!(
            identity = %participant.identity,
            error = %e,
            "could not send agent config to new peer"
        );
    }

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            AxumMessage::Text(text) => match serde_json::from_str::<InboundFrame>(text.as_str()) {
                Ok(frame) => {
                    let packet = DataPacket::new(frame.topic, frame.data.into_bytes())
                        .from_participant(participant.clone());
                    if state.packets.send(packet).await.is_err() {
                        tracing::warn!("router receive loop is gone, closing socket");
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        identity = %participant.identity,
                        error = %e,
                        "failed to parse incoming frame"
                    );
                }
            },
            AxumMessage::Close(_) => break,
            _ => {}
        }
    }

    state.peers.leave(session_id).await;
    relay_task.abort();
    send_task.abort();
    tracing::info!(identity = %participant.identity, session = %session_id, "peer disconnected");
}

/// Forwards agent-published packets to one socket's buffer.
async fn relay_outbound(
    mut outbound: broadcast::Receiver<DataPacket>,
    tx: mpsc::Sender<String>,
    identity: String,
) {
    loop {
        let packet = match outbound.recv().await {
            Ok(packet) => packet,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(identity = %identity, skipped, "peer lagging, packets skipped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let frame = match serde_json::to_string(&OutboundFrame::from_packet(packet)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound frame");
                continue;
            }
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(identity = %identity, "peer send buffer full, frame dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_frame_carries_text_and_sender() {
        let packet = DataPacket::new("agent-config-topic", br#"{"id":"x"}"#.to_vec())
            .from_participant(Participant::new("warda_agent", "Warda"));
        let frame: serde_json::Value =
            serde_json::to_value(OutboundFrame::from_packet(packet)).expect("serializable");
        assert_eq!(frame["topic"], "agent-config-topic");
        assert_eq!(frame["data"], r#"{"id":"x"}"#);
        assert_eq!(frame["participant"]["identity"], "warda_agent");
    }

    #[test]
    fn inbound_frame_requires_topic_and_data() {
        assert!(serde_json::from_str::<InboundFrame>(r#"{"topic": "t", "data": "{}"}"#).is_ok());
        assert!(serde_json::from_str::<InboundFrame>(r#"{"topic": "t"}"#).is_err());
    }

    #[tokio::test]
    async fn peer_registry_tracks_sessions() {
        let peers = PeerRegistry::new();
        let a = peers.join(Participant::new("u1", "One")).await;
        let b = peers.join(Participant::new("u1", "One")).await;
        assert_ne!(a, b);
        assert_eq!(peers.len().await, 2);

        assert_eq!(
            peers.leave(a).await.map(|p| p.identity),
            Some("u1".to_string())
        );
        assert!(peers.leave(a).await.is_none());
        peers.leave(b).await;
        assert!(peers.is_empty().await);
    }

    #[tokio::test]
    async fn relay_stops_when_the_socket_buffer_closes() {
        let (outbound_tx, outbound_rx) = broadcast::channel(4);
        let (tx, mut rx) = mpsc::channel(4);
        let relay = tokio::spawn(relay_outbound(outbound_rx, tx, "u1".to_string()));

        outbound_tx
            .send(DataPacket::new("t", b"hello".to_vec()))
            .expect("relay subscribed");
        let frame = rx.recv().await.expect("relayed frame");
        let decoded: OutboundFrame = serde_json::from_str(&frame).expect("frame json");
        assert_eq!(decoded.data, "hello");
        assert!(decoded.participant.is_none());

        drop(rx);
        outbound_tx
            .send(DataPacket::new("t", b"again".to_vec()))
            .expect("relay subscribed");
        tokio::time::timeout(std::time::Duration::from_secs(1), relay)
            .await
            .expect("relay exits")
            .expect("no panic");
    }
}
