//! SQL for the `agent` table.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::StoreError;
use crate::mapping::RecordUpdate;
use crate::model::{AgentConfigRecord, AgentKey};

const AGENT_COLUMNS: &str = "agent_id, agent_name, system_message, system_message_limit,
    model_platform, model_type, model_config, memory, memory_limit, created_at, updated_at";

/// Loads one agent by id or by name.
///
/// # Errors
///
/// [`StoreError::MissingKey`] for an empty key, [`StoreError::NotFound`] if
/// no row matches.
pub fn get_agent_record(conn: &Connection, key: &AgentKey) -> Result<AgentConfigRecord, StoreError> {
    if key.value().is_empty() {
        return Err(StoreError::MissingKey);
    }
    let sql = format!(
        "SELECT {} FROM agent WHERE {} = ?1",
        AGENT_COLUMNS,
        key.column()
    );
    conn.query_row(&sql, [key.value()], map_row_to_record)
        .optional()?
        .ok_or_else(|| StoreError::NotFound(key.to_string()))
}

/// Inserts `record` unless an agent with the same id or name exists.
/// Returns whether a row was written.
pub fn insert_agent_record(conn: &Connection, record: &AgentConfigRecord) -> Result<bool, StoreError> {
    let count = conn.execute(
        "INSERT OR IGNORE INTO agent (
            agent_id, agent_name, system_message, system_message_limit,
            model_platform, model_type, model_config, memory, memory_limit,
            created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.agent_id,
            record.agent_name,
            record.system_message,
            record.system_message_limit,
            record.llm_model_platform,
            record.llm_model,
            record.llm_model_config,
            record.memory,
            record.memory_limit,
            record.created_at,
            record.updated_at,
        ],
    )?;
    Ok(count > 0)
}

/// Writes the set columns of `updates` and bumps `updated_at`, returning
/// the row as stored afterwards.
///
/// # Errors
///
/// [`StoreError::NotFound`] if no agent has `agent_id`.
pub fn update_agent_record(
    conn: &Connection,
    agent_id: &str,
    updates: &RecordUpdate,
) -> Result<AgentConfigRecord, StoreError> {
    let mut set_parts: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut idx = 1usize;

    if let Some(name) = &updates.agent_name {
        set_parts.push(format!("agent_name = ?{}", idx));
        values.push(Box::new(name.clone()));
        idx += 1;
    }
    if let Some(message) = &updates.system_message {
        set_parts.push(format!("system_message = ?{}", idx));
        values.push(Box::new(message.clone()));
        idx += 1;
    }
    if let Some(limit) = updates.system_message_limit {
        set_parts.push(format!("system_message_limit = ?{}", idx));
        values.push(Box::new(limit));
        idx += 1;
    }
    if let Some(model) = &updates.llm_model {
        set_parts.push(format!("model_type = ?{}", idx));
        values.push(Box::new(model.clone()));
        idx += 1;
    }
    if let Some(config) = &updates.llm_model_config {
        set_parts.push(format!("model_config = ?{}", idx));
        values.push(Box::new(config.clone()));
        idx += 1;
    }
    if let Some(limit) = updates.memory_limit {
        set_parts.push(format!("memory_limit = ?{}", idx));
        values.push(Box::new(limit));
        idx += 1;
    }

    set_parts.push(format!("updated_at = ?{}", idx));
    values.push(Box::new(Utc::now()));
    idx += 1;

    let sql = format!(
        "UPDATE agent SET {} WHERE agent_id = ?{} RETURNING {}",
        set_parts.join(", "),
        idx,
        AGENT_COLUMNS
    );
    values.push(Box::new(agent_id.to_string()));

    let params: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    conn.query_row(&sql, params.as_slice(), map_row_to_record)
        .optional()?
        .ok_or_else(|| StoreError::NotFound(AgentKey::Id(agent_id.to_string()).to_string()))
}

fn map_row_to_record(row: &Row) -> rusqlite::Result<AgentConfigRecord> {
    let model_config: Option<String> = row.get(6)?;
    Ok(AgentConfigRecord {
        agent_id: row.get(0)?,
        agent_name: row.get(1)?,
        system_message: row.get(2)?,
        system_message_limit: row.get(3)?,
        llm_model_platform: row.get(4)?,
        llm_model: row.get(5)?,
        llm_model_config: model_config.unwrap_or_else(|| "{}".to_string()),
        memory: row.get(7)?,
        memory_limit: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}
