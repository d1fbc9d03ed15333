//! Agent configuration synchronization.
//!
//! The agent's configuration exists in two shapes:
//!
//! - [`AgentConfigPayload`]: what peers see on the wire, with camelCase
//!   aliases and sampling parameters flattened to the top level.
//! - [`AgentConfigRecord`]: what the `agent` table stores, with the sampling
//!   parameters JSON-encoded in `model_config` plus storage-only fields
//!   (`model_platform`, raw `memory`).
//!
//! [`mapping`] converts between them and implements merge-patch updates, so
//! a request that names two fields changes exactly those two. The
//! [`ConfigService`] serializes every read and update for an agent through a
//! single worker, which makes it the only writer of the record.

pub mod db;
pub mod error;
pub mod mapping;
pub mod model;
pub mod service;
pub mod store;

pub use error::{AgentConfigError, StoreError};
pub use mapping::{apply_payload, merge_update, to_payload, to_record, RecordUpdate};
pub use model::{
    AgentConfigMessage, AgentConfigPatch, AgentConfigPayload, AgentConfigRecord, AgentKey,
    ModelConfig,
};
pub use service::{ConfigService, ConfigServiceState};
pub use store::{get_agent_config, update_agent_config, AgentConfigStore, SqliteAgentStore};
