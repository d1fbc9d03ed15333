//! The service that owns the agent-config topic.
//!
//! Inbound envelopes are only queued by [`ConfigService::on_receive`]. A
//! single worker, started on attach, drains the queue in arrival order and
//! is the only writer of agent records, so two updates can never race on
//! the same read-modify-write.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use warda_bus::{
    queue, AttachContext, ChatAgent, Publisher, QueueReceiver, QueueSender, Service, ServiceCore,
};
use warda_types::AGENT_CONFIG_TOPIC;

use crate::error::AgentConfigError;
use crate::model::{AgentConfigMessage, AgentConfigPatch, AgentConfigPayload, AgentKey};
use crate::store::{get_agent_config, update_agent_config, AgentConfigStore};

/// Lifecycle of a [`ConfigService`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigServiceState {
    /// Constructed, not yet bound to a channel.
    Detached,
    /// Bound, with no live worker.
    Attached,
    /// The worker is serving requests or idle on the queue.
    Running,
    /// [`ConfigService::shutdown`] has run; new requests are dropped.
    Stopped,
}

#[derive(Debug)]
enum ConfigRequest {
    Update {
        request_id: String,
        patch: AgentConfigPatch,
    },
    Read(AgentKey),
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct ConfigService {
    core: ServiceCore,
    store: Arc<dyn AgentConfigStore>,
    agent_id: String,
    queue: Mutex<Option<QueueSender<ConfigRequest>>>,
    worker_rx: Mutex<Option<QueueReceiver<ConfigRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigService {
    /// Creates the service for the agent-config topic.
    ///
    /// `agent_id` is the agent updated when a request does not name one.
    pub fn new(
        store: Arc<dyn AgentConfigStore>,
        agent_id: impl Into<String>,
    ) -> Result<Self, AgentConfigError> {
        let (tx, rx) = queue::unbounded();
        Ok(Self {
            core: ServiceCore::new(AGENT_CONFIG_TOPIC)?,
            store,
            agent_id: agent_id.into(),
            queue: Mutex::new(Some(tx)),
            worker_rx: Mutex::new(Some(rx)),
            worker: Mutex::new(None),
        })
    }

    pub fn state(&self) -> ConfigServiceState {
        if lock(&self.queue).is_none() {
            return ConfigServiceState::Stopped;
        }
        if !self.core.is_attached() {
            return ConfigServiceState::Detached;
        }
        match lock(&self.worker).as_ref() {
            Some(worker) if !worker.is_finished() => ConfigServiceState::Running,
            _ => ConfigServiceState::Attached,
        }
    }

    /// Queues a publish of this agent's current configuration, e.g. for a
    /// peer that just joined. The record is looked up by id, which a rename
    /// never changes.
    ///
    /// # Errors
    ///
    /// Fails before attach, or after shutdown.
    pub fn send_agent_config(&self) -> Result<(), AgentConfigError> {
        self.core.context()?;
        self.enqueue(ConfigRequest::Read(AgentKey::Id(self.agent_id.clone())))
    }

    /// Stops accepting requests, waits until every queued request has been
    /// processed, and then waits for the worker to exit.
    pub async fn shutdown(&self) {
        let Some(queue) = lock(&self.queue).take() else {
            return;
        };
        if lock(&self.worker_rx).take().is_some() {
            tracing::debug!("config service shut down before attach");
        }

        let pending = queue.unfinished();
        if pending > 0 {
            tracing::info!(pending, "draining config requests");
        }
        queue.join().await;
        drop(queue);

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "config worker panicked");
            }
        }
    }

    fn enqueue(&self, request: ConfigRequest) -> Result<(), AgentConfigError> {
        let guard = lock(&self.queue);
        let queue = guard.as_ref().ok_or(AgentConfigError::QueueClosed)?;
        queue
            .try_put(request)
            .map_err(|_| AgentConfigError::QueueClosed)
    }
}

impl Service for ConfigService {
    type Payload = AgentConfigPatch;

    fn core(&self) -> &ServiceCore {
        &self.core
    }

    fn on_attach(&self, ctx: &AttachContext) {
        let Some(rx) = lock(&self.worker_rx).take() else {
            tracing::warn!("config service already stopped, worker not started");
            return;
        };
        let publisher = match self.core.publisher() {
            Ok(publisher) => publisher,
            Err(e) => {
                tracing::error!(error = %e, "config worker not started");
                return;
            }
        };
        let worker = Worker {
            rx,
            store: self.store.clone(),
            publisher,
            chat_agent: ctx.chat_agent.clone(),
            default_agent_id: self.agent_id.clone(),
        };
        *lock(&self.worker) = Some(ctx.runtime.spawn(worker.run()));
    }

    fn on_receive(&self, msg: AgentConfigMessage) {
        let request_id = msg.id().to_string();
        let sender = msg.sender.as_ref().map(|p| p.identity.clone());
        let request = match msg.into_payload() {
            Some(patch) => ConfigRequest::Update { request_id, patch },
            None => ConfigRequest::Read(AgentKey::Id(self.agent_id.clone())),
        };
        tracing::debug!(sender = ?sender, request = ?request, "config request queued");
        if let Err(e) = self.enqueue(request) {
            tracing::warn!(error = %e, "config request dropped");
        }
    }
}

struct Worker {
    rx: QueueReceiver<ConfigRequest>,
    store: Arc<dyn AgentConfigStore>,
    publisher: Publisher,
    chat_agent: Arc<dyn ChatAgent>,
    default_agent_id: String,
}

impl Worker {
    async fn run(mut self) {
        tracing::info!(topic = self.publisher.topic(), "config worker started");
        while let Some(request) = self.rx.take().await {
            if let Err(e) = self.handle(request).await {
                tracing::error!(error = %e, "config request failed");
            }
            self.rx.ack();
        }
        tracing::info!(topic = self.publisher.topic(), "config worker stopped");
    }

    async fn handle(&self, request: ConfigRequest) -> Result<(), AgentConfigError> {
        match request {
            ConfigRequest::Update { request_id, patch } => {
                let agent_id = patch
                    .agent_id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| self.default_agent_id.clone());
                tracing::debug!(
                    request_id = %request_id,
                    agent_id = %agent_id,
                    "applying config update"
                );

                let payload = update_agent_config(&*self.store, &agent_id, &patch).await?;
                if let Some(system_message) =
                    patch.system_message.as_deref().filter(|m| !m.is_empty())
                {
                    self.chat_agent.init_agent(system_message);
                }
                self.publish(&payload).await
            }
            ConfigRequest::Read(key) => {
                let payload = get_agent_config(&*self.store, key).await?;
                self.publish(&payload).await
            }
        }
    }

    async fn publish(&self, payload: &AgentConfigPayload) -> Result<(), AgentConfigError> {
        let text = serde_json::to_string(payload)?;
        let sent = self.publisher.publish(text).await?;
        tracing::debug!(id = sent.id(), agent_id = %payload.agent_id, "agent config published");
        Ok(())
    }
}
