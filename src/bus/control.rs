use super::command::{DispatchedCommand, ExecutionResult, ExecutionStatus, Stats};
use std::path::PathBuf;

/// Host → bus. The poller thread owns all bus state; these messages are the
/// only way to touch it.
#[derive(Debug)]
pub enum ControlMessage {
    SetDirectory(PathBuf),
    StartPolling,
    StopPolling,
    DataActivity,
    GetStats,
    ExecutionResult(ExecutionResult),
    Shutdown,
}

/// Bus → host.
#[derive(Debug, Clone)]
pub enum BusEvent {
    DirectorySet { root: PathBuf },
    PollingStarted,
    PollingStopped,
    PollTick { interval_ms: u64 },
    CommandProcessing { command_id: String },
    Execute(DispatchedCommand),
    CommandComplete {
        command_id: String,
        status: ExecutionStatus,
        stats: Stats,
    },
    Stats(Stats),
    Error { message: String },
    PollError { message: String },
}
