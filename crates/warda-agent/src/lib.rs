//! Warda agent process: wires the bus, the config service and the gateway.

pub mod config;
pub mod gateway;

use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use warda_bus::{
    AttachContext, BusError, LoopbackChannel, Router as BusRouter, ServiceRegistry,
    SystemPromptAgent,
};
use warda_config::{
    AgentConfigError, AgentConfigRecord, ConfigService, SqliteAgentStore, StoreError,
};
use warda_db::DbPool;
use warda_types::{DataPacket, Participant, AGENT_CONFIG_TOPIC};

use crate::config::AgentSettings;
use crate::gateway::PeerRegistry;

/// Inbound packets buffered ahead of the router.
const INBOUND_BUFFER: usize = 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The agent's side of the shared data channel.
    pub channel: Arc<LoopbackChannel>,
    /// Feeds the router's receive loop.
    pub packets: mpsc::Sender<DataPacket>,
    pub router: Arc<BusRouter>,
    pub config_service: Arc<ConfigService>,
    pub peers: PeerRegistry,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to provision agent record: {0}")]
    Provision(#[from] StoreError),

    #[error("failed to create config service: {0}")]
    ConfigService(#[from] AgentConfigError),

    #[error("failed to set up the bus: {0}")]
    Bus(#[from] BusError),
}

/// The running bus: router receive loop plus registered services.
pub struct AgentRuntime {
    state: AppState,
    router_task: JoinHandle<()>,
}

impl AgentRuntime {
    /// Provisions the agent record, registers the services and starts the
    /// router on the current runtime.
    pub async fn start(pool: DbPool, settings: &AgentSettings) -> Result<Self, StartupError> {
        let store = SqliteAgentStore::new(pool);
        let record =
            AgentConfigRecord::new(settings.agent_id.clone(), settings.agent_name.clone())
                .with_system_message(settings.system_message.clone());
        if store.insert_if_absent(record).await? {
            tracing::info!(agent_id = %settings.agent_id, "provisioned agent record");
        }

        let config_service = Arc::new(ConfigService::new(
            Arc::new(store),
            settings.agent_id.clone(),
        )?);
        let registry = ServiceRegistry::new().with(config_service.clone())?;

        let channel = Arc::new(LoopbackChannel::new(Participant::new(
            settings.identity.clone(),
            settings.agent_name.clone(),
        )));
        let ctx = AttachContext::new(
            channel.clone(),
            Arc::new(SystemPromptAgent::new(settings.system_message.clone())),
            tokio::runtime::Handle::current(),
        );
        let router = Arc::new(BusRouter::new(registry, ctx));
        // Joining peers are sent the config before anyone writes to its topic.
        router.attach(AGENT_CONFIG_TOPIC)?;

        let (packets, rx) = mpsc::channel(INBOUND_BUFFER);
        let router_task = router.clone().spawn(rx);

        Ok(Self {
            state: AppState {
                channel,
                packets,
                router,
                config_service,
                peers: PeerRegistry::new(),
            },
            router_task,
        })
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Stops the receive loop, then lets the config worker finish every
    /// request already queued.
    pub async fn shutdown(self) {
        self.state.router.stop();
        if let Err(e) = self.router_task.await {
            tracing::error!(error = %e, "router task panicked");
        }
        self.state.config_service.shutdown().await;

        let stats = self.state.router.stats();
        tracing::info!(
            delivered = stats.delivered,
            ignored = stats.ignored,
            dropped_malformed = stats.dropped_malformed,
            unknown_topic = stats.unknown_topic,
            "agent runtime stopped"
        );
    }
}

/// Health check handler.
async fn health(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    let stats = state.router.stats();
    let mut topics: Vec<&str> = state.router.topics().collect();
    topics.sort_unstable();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "peers": state.peers.len().await,
        "topics": topics,
        "packets": {
            "delivered": stats.delivered,
            "ignored": stats.ignored,
            "dropped_malformed": stats.dropped_malformed,
            "unknown_topic": stats.unknown_topic,
        }
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(gateway::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
