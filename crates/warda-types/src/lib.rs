//! Shared types and constants for the Warda agent.
//!
//! This crate holds the leaf types every other crate agrees on: who sent a
//! packet, what a raw data packet looks like on the shared channel, which
//! topics are claimed by whom, and how opaque identifiers are minted.
//!
//! Nothing here depends on another workspace crate.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Topic claimed by the external chat subsystem for chat messages.
pub const CHAT_TOPIC: &str = "lk-chat-topic";

/// Topic claimed by the external chat subsystem for chat message edits.
pub const CHAT_UPDATE_TOPIC: &str = "lk-chat-update-topic";

/// Topic carrying agent configuration requests and responses.
pub const AGENT_CONFIG_TOPIC: &str = "agent-config-topic";

/// Topics the message bus must leave to the chat subsystem.
pub const RESERVED_TOPICS: [&str; 2] = [CHAT_TOPIC, CHAT_UPDATE_TOPIC];

/// Returns `true` if `topic` belongs to the external chat subsystem.
pub fn is_reserved_topic(topic: &str) -> bool {
    RESERVED_TOPICS.contains(&topic)
}

/// Default length of generated identifiers.
pub const DEFAULT_ID_LEN: usize = 12;

const BASE62_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Generates a random base62 token of `len` characters.
pub fn random_base62(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| BASE62_ALPHABET[rng.gen_range(0..BASE62_ALPHABET.len())] as char)
        .collect()
}

/// Generates a random base62 identifier of the default length.
pub fn generate_id() -> String {
    random_base62(DEFAULT_ID_LEN)
}

/// A peer in the shared room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    /// Unique identity of the peer within the room.
    pub identity: String,
    /// Human-readable display name.
    #[serde(default)]
    pub name: String,
}

impl Participant {
    pub fn new(identity: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
        }
    }
}

/// A raw packet as delivered by the shared data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    /// Topic tag partitioning the shared channel.
    pub topic: String,
    /// Undecoded payload bytes.
    pub data: Vec<u8>,
    /// Originating peer, when the transport knows it.
    pub participant: Option<Participant>,
}

impl DataPacket {
    pub fn new(topic: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            data: data.into(),
            participant: None,
        }
    }

    /// Attaches the originating peer.
    pub fn from_participant(mut self, participant: Participant) -> Self {
        self.participant = Some(participant);
        self
    }
}
