use crate::bridge::backend::{ConsoleRecorder, ExecutionBackend, ScriptError};
use crate::bridge::context::spawn_execution_context;
use crate::bridge::queue::ChannelRegistry;
use crate::bridge::rpc::{BridgeReply, ExecutionBridge};
use crate::bridge::BridgeError;
use crate::bus::command::{
    ActionRequest, CommandKind, DispatchedCommand, ErrorDetail, ExecutionResult, ExecutionStatus,
};
use crate::shared::ids::ChannelId;
use crate::shared::time::now_millis;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Host-side operations reachable from `action` commands. An external
/// collaborator: the bus only defines the call shape.
pub trait HostApi: Send + Sync {
    fn invoke(&self, request: &ActionRequest) -> Result<Value, ScriptError>;
}

/// Decides where a dispatched command runs and reports the settled outcome.
///
/// Cancellation is cooperative only: when a timeout fires, the router
/// synthesizes a timeout result and moves on, but the underlying computation
/// keeps running to completion and its side effects are not rolled back. The
/// first settlement wins; a late one is discarded.
pub struct CommandRouter {
    host_backend: Arc<dyn ExecutionBackend>,
    host_api: Option<Arc<dyn HostApi>>,
    channels: ChannelRegistry,
    bridges: Mutex<HashMap<ChannelId, Arc<ExecutionBridge>>>,
}

impl CommandRouter {
    pub fn new(host_backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            host_backend,
            host_api: None,
            channels: ChannelRegistry::default(),
            bridges: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_host_api(mut self, host_api: Arc<dyn HostApi>) -> Self {
        self.host_api = Some(host_api);
        self
    }

    /// Wires a new isolated execution context: a dedicated thread around the
    /// backend, a bridge correlating its replies, and a FIFO queue in front.
    pub fn register_channel(&self, id: ChannelId, backend: Arc<dyn ExecutionBackend>) {
        let context = spawn_execution_context(backend);
        let bridge = Arc::new(ExecutionBridge::new(context));
        self.channels.register(id.clone());
        if let Ok(mut bridges) = self.bridges.lock() {
            bridges.insert(id, bridge);
        }
    }

    pub fn channel_depth(&self, id: &str) -> Option<usize> {
        self.channels.depth(id)
    }

    pub fn reset_channel(&self, id: &str) -> Option<usize> {
        self.channels.reset(id)
    }

    pub fn execute(&self, command: &DispatchedCommand) -> ExecutionResult {
        let outcome = match &command.target {
            Some(target) => self.execute_on_channel(target, command),
            None => self.execute_on_host(command),
        };
        settle(command, outcome)
    }

    fn execute_on_channel(
        &self,
        target: &str,
        command: &DispatchedCommand,
    ) -> Result<BridgeReply, BridgeError> {
        let bridge = self
            .bridge_for(target)
            .ok_or_else(|| BridgeError::UnknownChannel(target.to_string()))?;
        let script = command.script.clone().ok_or_else(|| BridgeError::Remote {
            message: "command has no script".to_string(),
            stack: None,
            console: Vec::new(),
        })?;
        let timeout = Duration::from_millis(command.timeout_ms);

        let receiver = self
            .channels
            .enqueue(target, Box::new(move || bridge.call(&script, timeout)))?;
        match receiver.recv() {
            Ok(outcome) => outcome,
            Err(_) => Err(BridgeError::ContextClosed),
        }
    }

    // Trusted-host execution under a timer guard. The guard never preempts
    // the worker thread; an expired call just stops listening, so a late
    // settlement lands in a closed channel and disappears.
    fn execute_on_host(&self, command: &DispatchedCommand) -> Result<BridgeReply, BridgeError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        let backend = Arc::clone(&self.host_backend);
        let host_api = self.host_api.clone();
        let job = command.clone();

        thread::spawn(move || {
            let console = ConsoleRecorder::default();
            let outcome = run_host_command(backend.as_ref(), host_api.as_deref(), &job, &console);
            let reply = match outcome {
                Ok(value) => Ok(BridgeReply {
                    result: value,
                    console: console.take(),
                }),
                Err(err) => Err(BridgeError::Remote {
                    message: err.message,
                    stack: err.stack,
                    console: console.take(),
                }),
            };
            let _ = reply_tx.send(reply);
        });

        match reply_rx.recv_timeout(Duration::from_millis(command.timeout_ms)) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::Timeout {
                timeout_ms: command.timeout_ms,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Remote {
                message: "host execution thread exited without settling".to_string(),
                stack: None,
                console: Vec::new(),
            }),
        }
    }

    fn bridge_for(&self, target: &str) -> Option<Arc<ExecutionBridge>> {
        self.bridges
            .lock()
            .ok()
            .and_then(|bridges| bridges.get(target).cloned())
    }
}

fn run_host_command(
    backend: &dyn ExecutionBackend,
    host_api: Option<&dyn HostApi>,
    command: &DispatchedCommand,
    console: &ConsoleRecorder,
) -> Result<Value, ScriptError> {
    match command.kind {
        CommandKind::Execute => match &command.script {
            Some(script) => backend.run(script, console),
            None => Err(ScriptError::new("command has no script")),
        },
        CommandKind::Action => match (&command.action, host_api) {
            (Some(action), Some(api)) => api.invoke(action),
            (None, _) => Err(ScriptError::new("command has no action request")),
            (_, None) => Err(ScriptError::new("no host api is configured")),
        },
    }
}

fn settle(
    command: &DispatchedCommand,
    outcome: Result<BridgeReply, BridgeError>,
) -> ExecutionResult {
    let execution_time_ms = now_millis().saturating_sub(command.started_at);
    match outcome {
        Ok(reply) => ExecutionResult {
            command_id: command.id.clone(),
            status: ExecutionStatus::Success,
            result: Some(reply.result),
            error: None,
            console: reply.console,
            execution_time_ms,
        },
        Err(BridgeError::Timeout { timeout_ms }) => ExecutionResult {
            command_id: command.id.clone(),
            status: ExecutionStatus::Timeout,
            result: None,
            error: Some(ErrorDetail {
                name: "TimeoutError".to_string(),
                message: format!("execution exceeded {timeout_ms}ms timeout"),
                stack: None,
            }),
            console: Vec::new(),
            execution_time_ms,
        },
        Err(BridgeError::Remote {
            message,
            stack,
            console,
        }) => ExecutionResult {
            command_id: command.id.clone(),
            status: ExecutionStatus::Error,
            result: None,
            error: Some(ErrorDetail {
                name: "Error".to_string(),
                message,
                stack,
            }),
            console,
            execution_time_ms,
        },
        Err(other) => ExecutionResult {
            command_id: command.id.clone(),
            status: ExecutionStatus::Error,
            result: None,
            error: Some(ErrorDetail {
                name: "Error".to_string(),
                message: other.to_string(),
                stack: None,
            }),
            console: Vec::new(),
            execution_time_ms,
        },
    }
}
