//! The completion collaborator boundary.

use std::sync::RwLock;

/// The dialogue engine whose system instruction follows the agent config.
pub trait ChatAgent: Send + Sync + 'static {
    /// Restarts the dialogue with a new system instruction.
    fn init_agent(&self, system_message: &str);
}

/// Holds the system instruction for a completion engine that lives outside
/// this process. The dialogue itself is served by the external chat
/// subsystem, which reads the instruction back with
/// [`system_message`](Self::system_message).
#[derive(Debug, Default)]
pub struct SystemPromptAgent {
    system_message: RwLock<String>,
}

impl SystemPromptAgent {
    pub fn new(system_message: impl Into<String>) -> Self {
        Self {
            system_message: RwLock::new(system_message.into()),
        }
    }

    pub fn system_message(&self) -> String {
        match self.system_message.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl ChatAgent for SystemPromptAgent {
    fn init_agent(&self, system_message: &str) {
        let mut guard = match self.system_message.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = system_message.to_string();
        tracing::info!(len = system_message.len(), "chat agent re-initialized");
    }
}
