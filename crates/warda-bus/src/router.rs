//! Topic demultiplexing for the shared data channel.
//!
//! The [`Router`] is the only consumer of inbound packets. For each packet it
//! skips the chat subsystem's reserved topics, resolves the registered
//! service, attaches it on first use, decodes the envelope and delivers it.
//! Failures are contained per packet: an unknown topic or a malformed body is
//! logged and counted, and the next packet is processed normally.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use warda_types::{is_reserved_topic, DataPacket};

use crate::error::BusError;
use crate::service::{AttachContext, Service, ServiceEndpoint};

/// Topic to service mapping, built before the router starts.
#[derive(Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn ServiceEndpoint>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under its topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateTopic`] if another service already claimed
    /// the topic.
    pub fn register<S: Service>(&mut self, service: Arc<S>) -> Result<(), BusError> {
        let topic = service.core().topic().to_string();
        if self.services.contains_key(&topic) {
            return Err(BusError::DuplicateTopic(topic));
        }
        tracing::debug!(topic = %topic, "service registered");
        self.services.insert(topic, service);
        Ok(())
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<S: Service>(mut self, service: Arc<S>) -> Result<Self, BusError> {
        self.register(service)?;
        Ok(self)
    }

}

/// What happened to a successfully handled packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Delivered,
    /// Reserved chat topic; left to the chat subsystem.
    Ignored,
}

/// Packet counters since the router was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub delivered: u64,
    pub ignored: u64,
    pub dropped_malformed: u64,
    pub unknown_topic: u64,
}

#[derive(Debug, Default)]
struct Counters {
    delivered: AtomicU64,
    ignored: AtomicU64,
    dropped_malformed: AtomicU64,
    unknown_topic: AtomicU64,
}

struct Route {
    endpoint: Arc<dyn ServiceEndpoint>,
    attach: Once,
}

pub struct Router {
    routes: HashMap<String, Route>,
    ctx: AttachContext,
    counters: Counters,
    stop: Notify,
}

impl Router {
    pub fn new(registry: ServiceRegistry, ctx: AttachContext) -> Self {
        let routes = registry
            .services
            .into_iter()
            .map(|(topic, endpoint)| {
                (
                    topic,
                    Route {
                        endpoint,
                        attach: Once::new(),
                    },
                )
            })
            .collect();
        Self {
            routes,
            ctx,
            counters: Counters::default(),
            stop: Notify::new(),
        }
    }

    /// Handles one inbound packet.
    ///
    /// Errors are logged here; the caller may inspect them but need not.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownTopic`] if no service owns the topic,
    /// [`BusError::MalformedEnvelope`] if the body does not decode.
    pub fn dispatch(&self, packet: DataPacket) -> Result<Dispatch, BusError> {
        if is_reserved_topic(&packet.topic) {
            tracing::trace!(topic = %packet.topic, "reserved topic, ignoring");
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return Ok(Dispatch::Ignored);
        }

        let Some(route) = self.routes.get(&packet.topic) else {
            tracing::error!(
                topic = %packet.topic,
                sender = packet.participant.as_ref().map(|p| p.identity.as_str()),
                "no service registered for topic"
            );
            self.counters.unknown_topic.fetch_add(1, Ordering::Relaxed);
            return Err(BusError::UnknownTopic(packet.topic));
        };

        self.attach_route(route);

        match route.endpoint.deliver(&packet.data, packet.participant) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(Dispatch::Delivered)
            }
            Err(e) => {
                tracing::warn!(topic = %packet.topic, error = %e, "dropping malformed envelope");
                self.counters
                    .dropped_malformed
                    .fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Attaches the service owning `topic` now instead of on its first
    /// packet, so it can publish before any peer has written to it.
    ///
    /// # Errors
    ///
    /// [`BusError::UnknownTopic`] if no service owns the topic.
    pub fn attach(&self, topic: &str) -> Result<(), BusError> {
        let route = self
            .routes
            .get(topic)
            .ok_or_else(|| BusError::UnknownTopic(topic.to_string()))?;
        self.attach_route(route);
        Ok(())
    }

    fn attach_route(&self, route: &Route) {
        route.attach.call_once(|| {
            route.endpoint.attach(&self.ctx);
        });
    }

    /// Dispatches packets in arrival order until the stream ends or
    /// [`stop`](Self::stop) is called.
    pub async fn run(&self, mut packets: mpsc::Receiver<DataPacket>) {
        tracing::info!(topics = self.routes.len(), "router receive loop started");
        loop {
            tokio::select! {
                biased;
                () = self.stop.notified() => break,
                packet = packets.recv() => match packet {
                    Some(packet) => {
                        // Already logged and counted.
                        let _ = self.dispatch(packet);
                    }
                    None => break,
                },
            }
        }
        tracing::info!("router receive loop stopped");
    }

    /// Runs [`run`](Self::run) on a new task.
    pub fn spawn(self: Arc<Self>, packets: mpsc::Receiver<DataPacket>) -> JoinHandle<()> {
        let runtime = self.ctx.runtime.clone();
        runtime.spawn(async move { self.run(packets).await })
    }

    /// Ends the receive loop after the packet currently being dispatched.
    pub fn stop(&self) {
        self.stop.notify_one();
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            dropped_malformed: self.counters.dropped_malformed.load(Ordering::Relaxed),
            unknown_topic: self.counters.unknown_topic.load(Ordering::Relaxed),
        }
    }

    /// Topics with a registered service, in no particular order.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}
