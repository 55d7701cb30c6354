use crate::bus::control::{BusEvent, ControlMessage};
use crate::bus::{ExecutionResult, PollerState};
use crate::config::BusConfig;
use crate::routing::CommandRouter;
use crate::shared::errors::RuntimeError;
use crate::shared::time::now_millis;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

enum Flow {
    Continue,
    Stop,
}

/// Dedicated bus thread: owns the poller state outright and reacts to typed
/// control messages. The poll-interval wait doubles as the receive window,
/// so control traffic is handled without waiting out the backoff.
pub fn run_bus_loop(
    mut state: PollerState,
    control: Receiver<ControlMessage>,
    events: Sender<BusEvent>,
) {
    loop {
        loop {
            match control.try_recv() {
                Ok(message) => {
                    if let Flow::Stop = handle_control(&mut state, message, &events) {
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => return,
            }
        }

        if state.is_polling() {
            state.tick(&events);
            match control.recv_timeout(Duration::from_millis(state.poll_interval_ms())) {
                Ok(message) => {
                    if let Flow::Stop = handle_control(&mut state, message, &events) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        } else {
            // Nothing to poll; block until the host says otherwise.
            match control.recv() {
                Ok(message) => {
                    if let Flow::Stop = handle_control(&mut state, message, &events) {
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }
}

fn handle_control(
    state: &mut PollerState,
    message: ControlMessage,
    events: &Sender<BusEvent>,
) -> Flow {
    match message {
        ControlMessage::SetDirectory(root) => match state.set_directory(root.clone()) {
            Ok(()) => {
                let _ = events.send(BusEvent::DirectorySet { root });
            }
            Err(err) => {
                let _ = events.send(BusEvent::Error {
                    message: err.to_string(),
                });
            }
        },
        ControlMessage::StartPolling => {
            state.start_polling();
            let _ = events.send(BusEvent::PollingStarted);
        }
        ControlMessage::StopPolling => {
            state.stop_polling();
            let _ = events.send(BusEvent::PollingStopped);
        }
        ControlMessage::DataActivity => {
            state.note_activity(now_millis());
        }
        ControlMessage::GetStats => {
            let _ = events.send(BusEvent::Stats(state.stats()));
        }
        ControlMessage::ExecutionResult(result) => {
            state.complete_command(events, &result);
        }
        ControlMessage::Shutdown => return Flow::Stop,
    }
    Flow::Continue
}

/// Clonable completion side of the control channel, handed to whatever
/// thread settles a command.
#[derive(Clone)]
pub struct ResultSink {
    control: Sender<ControlMessage>,
}

impl ResultSink {
    pub fn complete(&self, result: ExecutionResult) -> Result<(), RuntimeError> {
        self.control
            .send(ControlMessage::ExecutionResult(result))
            .map_err(|_| RuntimeError::ControlDisconnected)
    }
}

/// Host-side grip on a running bus thread.
pub struct BusHandle {
    control: Sender<ControlMessage>,
    pub events: Receiver<BusEvent>,
    thread: Option<JoinHandle<()>>,
}

impl BusHandle {
    pub fn spawn(config: BusConfig) -> Self {
        let (control_tx, control_rx) = mpsc::channel::<ControlMessage>();
        let (events_tx, events_rx) = mpsc::channel::<BusEvent>();
        let state = PollerState::new(config);
        let thread = thread::spawn(move || run_bus_loop(state, control_rx, events_tx));
        Self {
            control: control_tx,
            events: events_rx,
            thread: Some(thread),
        }
    }

    pub fn set_directory(&self, root: PathBuf) -> Result<(), RuntimeError> {
        self.send(ControlMessage::SetDirectory(root))
    }

    pub fn start_polling(&self) -> Result<(), RuntimeError> {
        self.send(ControlMessage::StartPolling)
    }

    pub fn stop_polling(&self) -> Result<(), RuntimeError> {
        self.send(ControlMessage::StopPolling)
    }

    pub fn data_activity(&self) -> Result<(), RuntimeError> {
        self.send(ControlMessage::DataActivity)
    }

    pub fn get_stats(&self) -> Result<(), RuntimeError> {
        self.send(ControlMessage::GetStats)
    }

    pub fn completer(&self) -> ResultSink {
        ResultSink {
            control: self.control.clone(),
        }
    }

    pub fn shutdown(mut self) -> Result<(), RuntimeError> {
        let _ = self.control.send(ControlMessage::Shutdown);
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| RuntimeError::ThreadPanicked),
            None => Ok(()),
        }
    }

    fn send(&self, message: ControlMessage) -> Result<(), RuntimeError> {
        self.control
            .send(message)
            .map_err(|_| RuntimeError::ControlDisconnected)
    }
}

/// Consumes bus events, running each dispatched command through the router
/// on its own thread and feeding the settled result back. Returns when the
/// bus thread goes away.
pub fn drive<F>(handle: &BusHandle, router: Arc<CommandRouter>, mut on_event: F)
where
    F: FnMut(&BusEvent),
{
    let sink = handle.completer();
    for event in handle.events.iter() {
        on_event(&event);
        if let BusEvent::Execute(command) = event {
            let router = Arc::clone(&router);
            let sink = sink.clone();
            thread::spawn(move || {
                let result = router.execute(&command);
                let _ = sink.complete(result);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::command::ExecutionStatus;
    use std::fs;
    use std::time::Instant;
    use tempfile::tempdir;

    fn test_config() -> BusConfig {
        BusConfig {
            stability_delay_ms: 0,
            ..BusConfig::default()
        }
    }

    fn wait_for<F: FnMut(&BusEvent) -> bool>(
        handle: &BusHandle,
        mut want: F,
        limit: Duration,
    ) -> BusEvent {
        let deadline = Instant::now() + limit;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO);
            match handle.events.recv_timeout(remaining) {
                Ok(event) => {
                    if want(&event) {
                        return event;
                    }
                }
                Err(_) => panic!("expected event did not arrive in {limit:?}"),
            }
        }
    }

    #[test]
    fn control_messages_round_trip_through_the_bus_thread() {
        let dir = tempdir().expect("tempdir");
        let handle = BusHandle::spawn(test_config());

        handle
            .set_directory(dir.path().to_path_buf())
            .expect("set directory");
        wait_for(
            &handle,
            |e| matches!(e, BusEvent::DirectorySet { .. }),
            Duration::from_secs(2),
        );

        handle.start_polling().expect("start");
        wait_for(
            &handle,
            |e| matches!(e, BusEvent::PollingStarted),
            Duration::from_secs(2),
        );
        wait_for(
            &handle,
            |e| matches!(e, BusEvent::PollTick { .. }),
            Duration::from_secs(2),
        );

        handle.get_stats().expect("get stats");
        let stats_event = wait_for(
            &handle,
            |e| matches!(e, BusEvent::Stats(_)),
            Duration::from_secs(2),
        );
        match stats_event {
            BusEvent::Stats(stats) => assert_eq!(stats.processed, 0),
            _ => unreachable!(),
        }

        handle.stop_polling().expect("stop");
        wait_for(
            &handle,
            |e| matches!(e, BusEvent::PollingStopped),
            Duration::from_secs(2),
        );

        handle.shutdown().expect("shutdown");
    }

    #[test]
    fn dispatched_command_flows_back_through_the_sink() {
        let dir = tempdir().expect("tempdir");
        let handle = BusHandle::spawn(test_config());
        handle
            .set_directory(dir.path().to_path_buf())
            .expect("set directory");
        handle.start_polling().expect("start");

        fs::create_dir_all(dir.path().join("commands")).expect("commands dir");
        fs::write(
            dir.path().join("commands/cmd_1000.json"),
            r#"{"id":"c1","script":"noop","timeout_ms":1000}"#,
        )
        .expect("write command");

        let execute = wait_for(
            &handle,
            |e| matches!(e, BusEvent::Execute(_)),
            Duration::from_secs(5),
        );
        let command = match execute {
            BusEvent::Execute(command) => command,
            _ => unreachable!(),
        };

        let sink = handle.completer();
        sink.complete(ExecutionResult {
            command_id: command.id.clone(),
            status: ExecutionStatus::Success,
            result: Some(serde_json::json!("ok")),
            error: None,
            console: Vec::new(),
            execution_time_ms: 1,
        })
        .expect("complete");

        let complete = wait_for(
            &handle,
            |e| matches!(e, BusEvent::CommandComplete { .. }),
            Duration::from_secs(5),
        );
        match complete {
            BusEvent::CommandComplete { command_id, stats, .. } => {
                assert_eq!(command_id, "c1");
                assert_eq!(stats.processed, 1);
                assert_eq!(stats.succeeded, 1);
            }
            _ => unreachable!(),
        }

        assert!(dir.path().join("results/result_c1.json").exists());
        assert!(dir.path().join("history/cmd_1000.json").exists());
        handle.shutdown().expect("shutdown");
    }

    #[test]
    fn shutdown_terminates_an_idle_bus() {
        let handle = BusHandle::spawn(test_config());
        handle.shutdown().expect("shutdown");
    }
}
