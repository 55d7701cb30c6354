use crate::shared::time::now_millis;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleLevel {
    Log,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
    pub timestamp: i64,
}

/// Ordered capture of diagnostic output for one execution. Handed to the
/// backend for exactly the duration of a run; entries are returned with the
/// response whether the run succeeded or failed.
#[derive(Debug, Default)]
pub struct ConsoleRecorder {
    entries: Mutex<Vec<ConsoleEntry>>,
}

impl ConsoleRecorder {
    pub fn log(&self, message: &str) {
        self.push(ConsoleLevel::Log, message);
    }

    pub fn warn(&self, message: &str) {
        self.push(ConsoleLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.push(ConsoleLevel::Error, message);
    }

    fn push(&self, level: ConsoleLevel, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(ConsoleEntry {
                level,
                message: message.to_string(),
                timestamp: now_millis(),
            });
        }
    }

    pub fn take(&self) -> Vec<ConsoleEntry> {
        match self.entries.lock() {
            Ok(mut entries) => std::mem::take(&mut *entries),
            Err(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub stack: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: Some(stack.into()),
        }
    }
}

/// What actually runs submitted code. The bus never interprets code itself;
/// each execution context wraps one of these, and a timeout reported by the
/// caller does not stop a run that is already underway.
pub trait ExecutionBackend: Send + Sync {
    fn run(&self, code: &str, console: &ConsoleRecorder) -> Result<Value, ScriptError>;
}
