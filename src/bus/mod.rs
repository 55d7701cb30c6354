pub mod command;
pub mod control;
pub mod paths;
pub mod poller;
pub mod results;
pub mod stable_read;

pub use command::{
    ActionRequest, Command, CommandKind, DispatchedCommand, ErrorDetail, ErrorRecord,
    ExecutionResult, ExecutionStatus, ResultRecord, Stats, StatusSnapshot,
};
pub use control::{BusEvent, ControlMessage};
pub use paths::{command_timestamp, is_command_filename, BusPaths};
pub use poller::PollerState;
pub use stable_read::read_stable;

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid command payload in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("command file {path} kept changing across {attempts} read attempts")]
    Unstable { path: String, attempts: u32 },
    #[error("command validation failed: {0}")]
    Validation(String),
}

pub(crate) fn io_err(path: &std::path::Path, source: std::io::Error) -> BusError {
    BusError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn parse_err(path: &std::path::Path, source: serde_json::Error) -> BusError {
    BusError::Parse {
        path: path.display().to_string(),
        source,
    }
}
