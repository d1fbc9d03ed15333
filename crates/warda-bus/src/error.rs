use thiserror::Error;

/// Errors raised while decoding, routing or publishing envelopes.
#[derive(Debug, Error)]
pub enum BusError {
    /// The packet body is not a valid envelope, or its payload failed to decode.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// No service is registered for the packet's topic.
    #[error("no service registered for topic '{0}'")]
    UnknownTopic(String),

    /// A second service tried to claim a topic.
    #[error("topic '{0}' is already claimed by another service")]
    DuplicateTopic(String),

    /// A publishing operation ran before the service was attached.
    #[error("service for topic '{0}' used before it was attached")]
    NotAttached(String),

    /// Services must be bound to a non-empty topic.
    #[error("service topic must not be empty")]
    EmptyTopic,

    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Errors surfaced by a [`DataChannel`](crate::DataChannel) implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("data channel is closed")]
    Closed,

    #[error("publish failed: {0}")]
    Publish(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The consuming side is gone or the queue was closed.
    #[error("queue is closed")]
    Closed,

    /// A bounded queue is at capacity.
    #[error("queue is full")]
    Full,
}
