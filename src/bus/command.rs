use super::BusError;
use crate::bridge::ConsoleEntry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const SNAPSHOT_SCRIPT_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    #[default]
    Execute,
    Action,
}

/// Structured host-API request with explicit fields; replaces the original
/// string-encoded call syntax that was picked apart with a regex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// One unit of work as written by the producer. Immutable once it has been
/// read stable; the bus never re-reads a command after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: CommandKind,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionRequest>,
}

impl Command {
    // Zero is rejected along with absence: a command that could never get a
    // chance to run is producer error, not a real deadline.
    pub fn mandatory_timeout(&self) -> Result<u64, BusError> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .ok_or_else(|| BusError::Validation("mandatory timeout_ms missing or invalid".into()))
    }
}

/// Payload handed to the router once a command has been read stable and
/// validated; carries the dispatch timestamp for execution-time accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedCommand {
    pub id: String,
    pub script: Option<String>,
    pub kind: CommandKind,
    pub timeout_ms: u64,
    pub target: Option<String>,
    pub action: Option<ActionRequest>,
    pub started_at: i64,
}

impl DispatchedCommand {
    pub fn new(command: &Command, timeout_ms: u64, started_at: i64) -> Self {
        Self {
            id: command.id.clone(),
            script: command.script.clone(),
            kind: command.kind,
            timeout_ms,
            target: command.target.clone(),
            action: command.action.clone(),
            started_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Settled outcome of one command, reported by the router and consumed by
/// the completion path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub command_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console: Vec<ConsoleEntry>,
    pub execution_time_ms: i64,
}

/// On-disk record in `results/`; written exactly once per processed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub command_id: String,
    pub status: ExecutionStatus,
    pub timestamp: i64,
    pub execution_time_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub console: Vec<ConsoleEntry>,
}

impl ResultRecord {
    pub fn from_execution(execution: &ExecutionResult, timestamp: i64) -> Self {
        Self {
            command_id: execution.command_id.clone(),
            status: execution.status,
            timestamp,
            execution_time_ms: execution.execution_time_ms,
            result: match execution.status {
                ExecutionStatus::Success => execution.result.clone(),
                _ => None,
            },
            error: match execution.status {
                ExecutionStatus::Success => None,
                _ => Some(execution.error.clone().unwrap_or_else(|| ErrorDetail {
                    name: "Error".to_string(),
                    message: "unknown error".to_string(),
                    stack: None,
                })),
            },
            console: execution.console.clone(),
        }
    }
}

/// Diagnostic duplicate written to `errors/` for non-success outcomes only,
/// with a truncated snapshot of the originating command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub command_id: String,
    pub timestamp: i64,
    pub phase: ExecutionStatus,
    pub error: ErrorDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSnapshot {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
}

impl CommandSnapshot {
    pub fn from_command(command: &Command) -> Self {
        Self {
            kind: command.kind,
            timeout_ms: command.timeout_ms,
            script: command.script.as_ref().map(|script| {
                if script.chars().count() > SNAPSHOT_SCRIPT_LIMIT {
                    let truncated: String = script.chars().take(SNAPSHOT_SCRIPT_LIMIT).collect();
                    format!("{truncated}...")
                } else {
                    script.clone()
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timeout: u64,
}

impl Stats {
    pub fn record(&mut self, status: ExecutionStatus) {
        self.processed += 1;
        match status {
            ExecutionStatus::Success => self.succeeded += 1,
            ExecutionStatus::Error => self.failed += 1,
            ExecutionStatus::Timeout => self.timeout += 1,
        }
    }
}

/// Bus health summary persisted to `status.json`; recomputed every tick but
/// only written when something other than `last_poll` changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub bridge_active: bool,
    pub last_poll: i64,
    pub poll_interval_ms: u64,
    pub processing: bool,
    pub current_command: Option<String>,
    pub commands_processed: u64,
    pub commands_succeeded: u64,
    pub commands_failed: u64,
    pub commands_timeout: u64,
    pub history_size: usize,
}

impl StatusSnapshot {
    pub fn meaningful_eq(&self, other: &Self) -> bool {
        self.bridge_active == other.bridge_active
            && self.poll_interval_ms == other.poll_interval_ms
            && self.processing == other.processing
            && self.current_command == other.current_command
            && self.commands_processed == other.commands_processed
            && self.commands_succeeded == other.commands_succeeded
            && self.commands_failed == other.commands_failed
            && self.commands_timeout == other.commands_timeout
            && self.history_size == other.history_size
    }
}
