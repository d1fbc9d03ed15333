//! Topic-routed message bus over the shared room data channel.
//!
//! Every peer in a room shares one reliable data channel. Packets on it are
//! tagged with a topic; this crate turns that single stream into typed,
//! ordered, per-topic delivery:
//!
//! - [`Envelope`] is the JSON wire wrapper (`id`, `message`, `timestamp`),
//!   decoded with backward-compatible defaults.
//! - [`queue`] provides the FIFO hand-off used to serialize work per topic.
//! - [`Service`] is a unit of behavior bound to exactly one topic.
//! - [`Router`] owns the receive loop, resolves topics to services, attaches
//!   them lazily and contains per-packet failures.
//!
//! The transport ([`DataChannel`]) and the completion engine ([`ChatAgent`])
//! are consumed through narrow traits. [`LoopbackChannel`] implements the
//! transport in-process.

pub mod agent;
pub mod channel;
pub mod envelope;
pub mod error;
pub mod queue;
pub mod router;
pub mod service;

pub use agent::{ChatAgent, SystemPromptAgent};
pub use channel::{DataChannel, LoopbackChannel};
pub use envelope::{Envelope, EnvelopePayload, ServiceMessage};
pub use error::{BusError, QueueError, TransportError};
pub use queue::{QueueReceiver, QueueSender};
pub use router::{Dispatch, Router, RouterStats, ServiceRegistry};
pub use service::{AttachContext, Publisher, Service, ServiceCore, ServiceEndpoint};
