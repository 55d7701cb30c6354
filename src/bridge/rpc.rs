use super::backend::ConsoleEntry;
use super::context::ExecutionContext;
use super::BridgeError;
use crate::shared::ids::next_request_id;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRequest {
    pub request_id: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResponse {
    pub request_id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub stack: Option<String>,
    #[serde(default)]
    pub console: Vec<ConsoleEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeReply {
    pub result: Value,
    pub console: Vec<ConsoleEntry>,
}

/// Correlates run requests with their responses across the context boundary.
/// A reply pump thread matches each incoming response against the pending
/// table by request id; an entry removed on timeout leaves any late reply
/// with nothing to match, so it is dropped.
pub struct ExecutionBridge {
    requests: Sender<RunRequest>,
    pending: Arc<Mutex<HashMap<String, Sender<RunResponse>>>>,
}

impl ExecutionBridge {
    pub fn new(context: ExecutionContext) -> Self {
        let pending: Arc<Mutex<HashMap<String, Sender<RunResponse>>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let table = Arc::clone(&pending);
        let responses = context.responses;
        thread::spawn(move || {
            for response in responses {
                let waiter = match table.lock() {
                    Ok(mut entries) => entries.remove(&response.request_id),
                    Err(_) => break,
                };
                if let Some(tx) = waiter {
                    let _ = tx.send(response);
                }
            }
        });

        Self {
            requests: context.requests,
            pending,
        }
    }

    pub fn call(&self, code: &str, timeout: Duration) -> Result<BridgeReply, BridgeError> {
        let request_id = next_request_id();
        let (reply_tx, reply_rx) = mpsc::channel::<RunResponse>();

        if !self.register(&request_id, reply_tx) {
            return Err(BridgeError::ContextClosed);
        }
        let request = RunRequest {
            request_id: request_id.clone(),
            code: code.to_string(),
        };
        if self.requests.send(request).is_err() {
            self.forget(&request_id);
            return Err(BridgeError::ContextClosed);
        }

        match reply_rx.recv_timeout(timeout) {
            Ok(response) => {
                if response.success {
                    Ok(BridgeReply {
                        result: response.result.unwrap_or(Value::Null),
                        console: response.console,
                    })
                } else {
                    Err(BridgeError::Remote {
                        message: response
                            .error
                            .unwrap_or_else(|| "execution failed".to_string()),
                        stack: response.stack,
                        console: response.console,
                    })
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                self.forget(&request_id);
                Err(BridgeError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::ContextClosed),
        }
    }

    fn register(&self, request_id: &str, tx: Sender<RunResponse>) -> bool {
        match self.pending.lock() {
            Ok(mut entries) => {
                entries.insert(request_id.to_string(), tx);
                true
            }
            Err(_) => false,
        }
    }

    fn forget(&self, request_id: &str) {
        if let Ok(mut entries) = self.pending.lock() {
            entries.remove(request_id);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|entries| entries.len()).unwrap_or(0)
    }
}
