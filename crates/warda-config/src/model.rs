//! Wire and storage shapes of the agent configuration.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warda_bus::{Envelope, EnvelopePayload};
use warda_types::generate_id;

/// A config-topic envelope carrying an update request.
pub type AgentConfigMessage = Envelope<AgentConfigPatch>;

fn default_payload_system_message_limit() -> Option<u32> {
    Some(500)
}

fn default_payload_max_tokens() -> Option<u32> {
    Some(200)
}

fn default_record_max_tokens() -> Option<u32> {
    Some(16)
}

fn default_record_system_message_limit() -> Option<u32> {
    Some(4000)
}

fn default_model_platform() -> Option<String> {
    Some("OpenAI".to_string())
}

fn default_model_config() -> String {
    "{}".to_string()
}

fn default_memory() -> Option<String> {
    Some(String::new())
}

fn default_memory_limit() -> Option<u32> {
    Some(5)
}

fn unit_f64() -> Option<f64> {
    Some(1.0)
}

/// Clients send the configuration as JSON text inside `message`; accept an
/// inline object too.
fn decode_message<T: DeserializeOwned>(value: Value) -> Result<T, serde_json::Error> {
    match value {
        Value::String(text) => serde_json::from_str(&text),
        other => serde_json::from_value(other),
    }
}

/// The configuration as peers see it.
///
/// Unset fields decode to their defaults: fresh random identifiers, a
/// 500-character system message limit, and sampling defaults of
/// temperature 1, 200 output tokens, top-p 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigPayload {
    #[serde(rename = "agentId", default = "generate_id")]
    pub agent_id: String,
    #[serde(rename = "agentName", default = "generate_id")]
    pub agent_name: String,
    #[serde(rename = "systemMessage", default)]
    pub system_message: Option<String>,
    #[serde(
        rename = "systemMessageLimit",
        default = "default_payload_system_message_limit"
    )]
    pub system_message_limit: Option<u32>,
    #[serde(rename = "modelType", default)]
    pub model: Option<String>,
    /// How many dialogue rounds the agent remembers.
    #[serde(rename = "dialogRound", default)]
    pub memory_limit: Option<u32>,
    #[serde(default = "unit_f64")]
    pub temperature: Option<f64>,
    #[serde(rename = "outputLimit", default = "default_payload_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(rename = "topP", default = "unit_f64")]
    pub top_p: Option<f64>,
}

impl Default for AgentConfigPayload {
    fn default() -> Self {
        Self {
            agent_id: generate_id(),
            agent_name: generate_id(),
            system_message: None,
            system_message_limit: default_payload_system_message_limit(),
            model: None,
            memory_limit: None,
            temperature: unit_f64(),
            max_tokens: default_payload_max_tokens(),
            top_p: unit_f64(),
        }
    }
}

impl EnvelopePayload for AgentConfigPayload {
    fn from_message(value: Value) -> Result<Self, serde_json::Error> {
        decode_message(value)
    }
}

/// An update request: only the fields the sender actually set.
///
/// Shares the wire aliases of [`AgentConfigPayload`] but applies no
/// defaults, so an omitted field stays `None` and is left untouched by
/// [`merge_update`](crate::merge_update).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigPatch {
    #[serde(rename = "agentId", default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(rename = "agentName", default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(rename = "systemMessage", default, skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    #[serde(
        rename = "systemMessageLimit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub system_message_limit: Option<u32>,
    #[serde(rename = "modelType", default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "dialogRound", default, skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(rename = "outputLimit", default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(rename = "topP", default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Client-side send time in milliseconds, possibly fractional; not part
    /// of the configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
}

impl AgentConfigPatch {
    /// A patch naming only the target agent.
    pub fn for_agent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id.into()),
            ..Self::default()
        }
    }

    /// `true` if no configuration field is set.
    pub fn is_empty(&self) -> bool {
        self.agent_name.is_none()
            && self.system_message.is_none()
            && self.system_message_limit.is_none()
            && self.model.is_none()
            && self.memory_limit.is_none()
            && self.temperature.is_none()
            && self.max_tokens.is_none()
            && self.top_p.is_none()
    }
}

impl EnvelopePayload for AgentConfigPatch {
    fn from_message(value: Value) -> Result<Self, serde_json::Error> {
        decode_message(value)
    }

    fn embedded_timestamp(&self) -> Option<i64> {
        self.timestamp
            .filter(|ms| ms.is_finite())
            .map(|ms| ms.trunc() as i64)
    }
}

/// Sampling parameters, stored JSON-encoded in the record's `model_config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "unit_f64")]
    pub temperature: Option<f64>,
    #[serde(default = "default_record_max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default = "unit_f64")]
    pub top_p: Option<f64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: unit_f64(),
            max_tokens: default_record_max_tokens(),
            top_p: unit_f64(),
        }
    }
}

impl ModelConfig {
    /// Decodes a `model_config` column. Blank text means all defaults.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A row of the `agent` table.
///
/// Serde names follow the storage columns (`model_platform`, `model_type`,
/// `model_config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfigRecord {
    pub agent_id: String,
    pub agent_name: String,
    #[serde(default)]
    pub system_message: Option<String>,
    #[serde(default = "default_record_system_message_limit")]
    pub system_message_limit: Option<u32>,
    #[serde(rename = "model_platform", default = "default_model_platform")]
    pub llm_model_platform: Option<String>,
    #[serde(rename = "model_type", default)]
    pub llm_model: Option<String>,
    /// JSON-encoded [`ModelConfig`].
    #[serde(rename = "model_config", default = "default_model_config")]
    pub llm_model_config: String,
    /// Raw conversation memory. Not modeled by the payload.
    #[serde(default = "default_memory")]
    pub memory: Option<String>,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: Option<u32>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl AgentConfigRecord {
    /// A record with storage defaults for everything but the identifiers.
    pub fn new(agent_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            system_message: None,
            system_message_limit: default_record_system_message_limit(),
            llm_model_platform: default_model_platform(),
            llm_model: None,
            llm_model_config: default_model_config(),
            memory: default_memory(),
            memory_limit: default_memory_limit(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }

    /// Decodes the nested sampling parameters.
    pub fn model_config(&self) -> Result<ModelConfig, serde_json::Error> {
        ModelConfig::from_json(&self.llm_model_config)
    }
}

/// How to find an agent's record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentKey {
    Id(String),
    Name(String),
}

impl AgentKey {
    /// The `agent` table column this key matches on.
    pub fn column(&self) -> &'static str {
        match self {
            Self::Id(_) => "agent_id",
            Self::Name(_) => "agent_name",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Self::Id(v) | Self::Name(v) => v,
        }
    }
}

impl fmt::Display for AgentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column(), self.value())
    }
}
