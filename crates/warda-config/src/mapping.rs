//! Conversions between the wire payload and the stored record, and the
//! merge-patch rule for updates.

use chrono::Utc;

use crate::model::{AgentConfigPatch, AgentConfigPayload, AgentConfigRecord, ModelConfig};

/// Flattens a stored record into the payload peers see.
///
/// # Errors
///
/// Fails if the record's `model_config` column is not valid JSON.
pub fn to_payload(record: &AgentConfigRecord) -> Result<AgentConfigPayload, serde_json::Error> {
    let model_config = record.model_config()?;
    Ok(AgentConfigPayload {
        agent_id: record.agent_id.clone(),
        agent_name: record.agent_name.clone(),
        system_message: record.system_message.clone(),
        system_message_limit: record.system_message_limit,
        model: record.llm_model.clone(),
        memory_limit: record.memory_limit,
        temperature: model_config.temperature,
        max_tokens: model_config.max_tokens,
        top_p: model_config.top_p,
    })
}

fn model_config_of(payload: &AgentConfigPayload) -> ModelConfig {
    ModelConfig {
        temperature: payload.temperature,
        max_tokens: payload.max_tokens,
        top_p: payload.top_p,
    }
}

/// Builds a fresh record from a payload. Storage-only fields take their
/// storage defaults.
///
/// # Errors
///
/// Fails only if the sampling parameters cannot be JSON-encoded.
pub fn to_record(payload: &AgentConfigPayload) -> Result<AgentConfigRecord, serde_json::Error> {
    apply_payload(
        &AgentConfigRecord::new(payload.agent_id.clone(), payload.agent_name.clone()),
        payload,
    )
}

/// Writes `payload` over `record`, keeping what the payload does not model:
/// `model_platform`, `memory` and `created_at`.
pub fn apply_payload(
    record: &AgentConfigRecord,
    payload: &AgentConfigPayload,
) -> Result<AgentConfigRecord, serde_json::Error> {
    Ok(AgentConfigRecord {
        agent_id: payload.agent_id.clone(),
        agent_name: payload.agent_name.clone(),
        system_message: payload.system_message.clone(),
        system_message_limit: payload.system_message_limit,
        llm_model: payload.model.clone(),
        llm_model_config: model_config_of(payload).to_json()?,
        memory_limit: payload.memory_limit,
        updated_at: Utc::now(),
        ..record.clone()
    })
}

/// Applies an update request to the current configuration.
///
/// Only fields the patch sets are overwritten. The agent id is never taken
/// from the patch, since the patch's id only selects which agent to update.
pub fn merge_update(old: &AgentConfigPayload, patch: &AgentConfigPatch) -> AgentConfigPayload {
    AgentConfigPayload {
        agent_id: old.agent_id.clone(),
        agent_name: patch
            .agent_name
            .clone()
            .unwrap_or_else(|| old.agent_name.clone()),
        system_message: patch
            .system_message
            .clone()
            .or_else(|| old.system_message.clone()),
        system_message_limit: patch.system_message_limit.or(old.system_message_limit),
        model: patch.model.clone().or_else(|| old.model.clone()),
        memory_limit: patch.memory_limit.or(old.memory_limit),
        temperature: patch.temperature.or(old.temperature),
        max_tokens: patch.max_tokens.or(old.max_tokens),
        top_p: patch.top_p.or(old.top_p),
    }
}

/// Column values for an `UPDATE agent` statement. `None` leaves the column
/// as it is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub agent_name: Option<String>,
    pub system_message: Option<String>,
    pub system_message_limit: Option<u32>,
    pub llm_model: Option<String>,
    pub llm_model_config: Option<String>,
    pub memory_limit: Option<u32>,
}

impl RecordUpdate {
    /// Everything the payload models, ready to write back.
    pub fn from_payload(payload: &AgentConfigPayload) -> Result<Self, serde_json::Error> {
        Ok(Self {
            agent_name: Some(payload.agent_name.clone()),
            system_message: payload.system_message.clone(),
            system_message_limit: payload.system_message_limit,
            llm_model: payload.model.clone(),
            llm_model_config: Some(model_config_of(payload).to_json()?),
            memory_limit: payload.memory_limit,
        })
    }
}
