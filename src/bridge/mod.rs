pub mod backend;
pub mod context;
pub mod queue;
pub mod rpc;
pub mod shell;

pub use backend::{ConsoleEntry, ConsoleLevel, ConsoleRecorder, ExecutionBackend, ScriptError};
pub use context::{spawn_execution_context, ExecutionContext};
pub use queue::{ChannelQueue, ChannelRegistry, Invocation};
pub use rpc::{BridgeReply, ExecutionBridge, RunRequest, RunResponse};
pub use shell::ShellBackend;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("unknown execution channel `{0}`")]
    UnknownChannel(String),
    #[error("execution context is closed")]
    ContextClosed,
    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("{message}")]
    Remote {
        message: String,
        stack: Option<String>,
        console: Vec<ConsoleEntry>,
    },
    #[error("invocation cancelled before execution")]
    Cancelled,
}
