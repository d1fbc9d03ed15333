//! Topic-bound services.
//!
//! A concrete service embeds a [`ServiceCore`] (its topic and, once attached,
//! its runtime context) and implements [`Service`]. The router talks to it
//! through the object-safe [`ServiceEndpoint`], which every `Service` gets for
//! free: decode the envelope for the service's payload type, stamp the sender,
//! hand it to [`Service::on_receive`].

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::runtime::Handle;
use warda_types::Participant;

use crate::agent::ChatAgent;
use crate::channel::DataChannel;
use crate::envelope::{Envelope, EnvelopePayload};
use crate::error::BusError;

/// Runtime dependencies bound to a service on attach.
#[derive(Clone)]
pub struct AttachContext {
    pub channel: Arc<dyn DataChannel>,
    pub chat_agent: Arc<dyn ChatAgent>,
    /// Runtime the service spawns its background work on.
    pub runtime: Handle,
}

impl AttachContext {
    pub fn new(
        channel: Arc<dyn DataChannel>,
        chat_agent: Arc<dyn ChatAgent>,
        runtime: Handle,
    ) -> Self {
        Self {
            channel,
            chat_agent,
            runtime,
        }
    }

    pub fn local_participant(&self) -> &Participant {
        self.channel.local_participant()
    }
}

impl fmt::Debug for AttachContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachContext")
            .field("local_participant", self.local_participant())
            .finish_non_exhaustive()
    }
}

/// Topic and attach state shared by every service implementation.
#[derive(Debug)]
pub struct ServiceCore {
    topic: String,
    ctx: OnceLock<AttachContext>,
}

impl ServiceCore {
    /// # Errors
    ///
    /// Returns [`BusError::EmptyTopic`] for an empty topic.
    pub fn new(topic: impl Into<String>) -> Result<Self, BusError> {
        let topic = topic.into();
        if topic.is_empty() {
            return Err(BusError::EmptyTopic);
        }
        Ok(Self {
            topic,
            ctx: OnceLock::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_attached(&self) -> bool {
        self.ctx.get().is_some()
    }

    /// Binds `ctx`. Returns `false`, leaving the first binding in place, if
    /// the service was already attached.
    fn bind(&self, ctx: AttachContext) -> bool {
        self.ctx.set(ctx).is_ok()
    }

    /// # Errors
    ///
    /// Returns [`BusError::NotAttached`] before the first attach.
    pub fn context(&self) -> Result<&AttachContext, BusError> {
        self.ctx
            .get()
            .ok_or_else(|| BusError::NotAttached(self.topic.clone()))
    }

    /// A detached handle for publishing on this service's topic, suitable
    /// for moving into a worker task.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotAttached`] before the first attach.
    pub fn publisher(&self) -> Result<Publisher, BusError> {
        let ctx = self.context()?;
        Ok(Publisher {
            topic: Arc::from(self.topic.as_str()),
            channel: ctx.channel.clone(),
        })
    }

    /// Publishes `payload` on this service's topic.
    ///
    /// # Errors
    ///
    /// [`BusError::NotAttached`] before attach; otherwise encode or transport
    /// failures.
    pub async fn publish<P: EnvelopePayload>(&self, payload: P) -> Result<Envelope<P>, BusError> {
        self.publisher()?.publish(payload).await
    }
}

/// Publishes envelopes on one topic.
#[derive(Clone)]
pub struct Publisher {
    topic: Arc<str>,
    channel: Arc<dyn DataChannel>,
}

impl Publisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wraps `payload` in a local envelope, sends it, and returns the
    /// envelope with its sender set to the local participant.
    pub async fn publish<P: EnvelopePayload>(&self, payload: P) -> Result<Envelope<P>, BusError> {
        let mut msg = Envelope::local(payload);
        let data = msg.to_bytes()?;
        self.channel.publish_data(&self.topic, data).await?;
        msg.sender = Some(self.channel.local_participant().clone());
        tracing::debug!(topic = %self.topic, id = msg.id(), "published envelope");
        Ok(msg)
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// A unit of behavior bound to one topic.
pub trait Service: Send + Sync + 'static {
    /// What this service expects inside the envelope's `message` field.
    type Payload: EnvelopePayload;

    fn core(&self) -> &ServiceCore;

    /// Runs once, right after the service is first attached.
    fn on_attach(&self, _ctx: &AttachContext) {}

    /// Called by the router for every envelope on this topic, in arrival
    /// order. Must not block; hand slow work to a task.
    fn on_receive(&self, msg: Envelope<Self::Payload>);
}

/// The type-erased face of a [`Service`] the router dispatches to.
pub trait ServiceEndpoint: Send + Sync {
    fn topic(&self) -> &str;

    /// Binds runtime dependencies and fires `on_attach`. A second call is a
    /// no-op and returns `false`.
    fn attach(&self, ctx: &AttachContext) -> bool;

    /// Decodes `data` and delivers it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MalformedEnvelope`] without calling the service
    /// if the data does not decode.
    fn deliver(&self, data: &[u8], sender: Option<Participant>) -> Result<(), BusError>;
}

impl<S: Service> ServiceEndpoint for S {
    fn topic(&self) -> &str {
        self.core().topic()
    }

    fn attach(&self, ctx: &AttachContext) -> bool {
        if !self.core().bind(ctx.clone()) {
            return false;
        }
        tracing::info!(topic = self.core().topic(), "service attached");
        self.on_attach(ctx);
        true
    }

    fn deliver(&self, data: &[u8], sender: Option<Participant>) -> Result<(), BusError> {
        let mut msg = Envelope::<S::Payload>::parse(data)?;
        msg.sender = sender;
        self.on_receive(msg);
        Ok(())
    }
}
