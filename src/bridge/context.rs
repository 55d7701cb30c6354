use super::backend::{ConsoleRecorder, ExecutionBackend};
use super::rpc::{RunRequest, RunResponse};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

/// Channel endpoints of one isolated execution context. Requests go in,
/// responses come back carrying the same request id.
#[derive(Debug)]
pub struct ExecutionContext {
    pub requests: Sender<RunRequest>,
    pub responses: Receiver<RunResponse>,
}

/// Spawns a dedicated thread that services run requests serially through the
/// given backend. The thread exits when the request side is dropped.
pub fn spawn_execution_context(backend: Arc<dyn ExecutionBackend>) -> ExecutionContext {
    let (request_tx, request_rx) = mpsc::channel::<RunRequest>();
    let (response_tx, response_rx) = mpsc::channel::<RunResponse>();

    thread::spawn(move || {
        for request in request_rx {
            let response = service_request(backend.as_ref(), &request);
            if response_tx.send(response).is_err() {
                break;
            }
        }
    });

    ExecutionContext {
        requests: request_tx,
        responses: response_rx,
    }
}

fn service_request(backend: &dyn ExecutionBackend, request: &RunRequest) -> RunResponse {
    let console = ConsoleRecorder::default();
    match backend.run(&request.code, &console) {
        Ok(value) => RunResponse {
            request_id: request.request_id.clone(),
            success: true,
            result: Some(value),
            error: None,
            stack: None,
            console: console.take(),
        },
        Err(err) => RunResponse {
            request_id: request.request_id.clone(),
            success: false,
            result: None,
            error: Some(err.message),
            stack: err.stack,
            console: console.take(),
        },
    }
}
