use super::command::{
    Command, CommandSnapshot, DispatchedCommand, ErrorDetail, ErrorRecord, ExecutionResult,
    ExecutionStatus, ResultRecord, Stats, StatusSnapshot,
};
use super::control::BusEvent;
use super::paths::{is_command_filename, BusPaths};
use super::{io_err, results, stable_read, BusError};
use crate::config::BusConfig;
use crate::shared::logging::append_bus_log;
use crate::shared::time::now_millis;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

/// All mutable bus state, owned by the poller task and threaded through its
/// loop. Nothing here is shared; the host talks to it via control messages.
#[derive(Debug)]
pub struct PollerState {
    pub(crate) config: BusConfig,
    pub(crate) paths: Option<BusPaths>,
    pub(crate) polling: bool,
    pub(crate) processing: bool,
    pub(crate) current_command: Option<Command>,
    pub(crate) current_filename: Option<String>,
    pub(crate) poll_interval_ms: u64,
    pub(crate) last_activity: i64,
    pub(crate) stats: Stats,
    pub(crate) last_status_written: Option<StatusSnapshot>,
    pub(crate) cached_history_size: usize,
    pub(crate) history_changed: bool,
    pub(crate) cached_has_commands: bool,
    pub(crate) last_commands_check: i64,
}

impl PollerState {
    pub fn new(config: BusConfig) -> Self {
        let poll_interval_ms = config.min_poll_interval_ms;
        Self {
            config,
            paths: None,
            polling: false,
            processing: false,
            current_command: None,
            current_filename: None,
            poll_interval_ms,
            last_activity: now_millis(),
            stats: Stats::default(),
            last_status_written: None,
            cached_history_size: 0,
            history_changed: true,
            cached_has_commands: false,
            last_commands_check: 0,
        }
    }

    pub fn set_directory(&mut self, root: PathBuf) -> Result<(), BusError> {
        let paths = BusPaths::from_root(root);
        paths.bootstrap()?;
        self.paths = Some(paths);
        self.cached_has_commands = false;
        self.last_commands_check = 0;
        self.history_changed = true;
        self.last_status_written = None;
        Ok(())
    }

    pub fn start_polling(&mut self) {
        self.polling = true;
        self.poll_interval_ms = self.config.min_poll_interval_ms;
        self.last_activity = now_millis();
    }

    pub fn stop_polling(&mut self) {
        self.polling = false;
    }

    pub fn note_activity(&mut self, now: i64) {
        self.last_activity = now;
        self.poll_interval_ms = self.config.min_poll_interval_ms;
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Ticking needs both the polling flag and a connected directory.
    pub fn is_polling(&self) -> bool {
        self.polling && self.paths.is_some()
    }

    pub fn poll_interval_ms(&self) -> u64 {
        self.poll_interval_ms
    }

    /// One poll cycle: refresh the command-existence cache, adapt the
    /// interval, dispatch at most one command, publish status. Errors are
    /// reported as events; the loop carries on regardless.
    pub fn tick(&mut self, events: &Sender<BusEvent>) {
        let Some(paths) = self.paths.clone() else {
            return;
        };
        match self.try_tick(&paths, events) {
            Ok(()) => {
                let _ = events.send(BusEvent::PollTick {
                    interval_ms: self.poll_interval_ms,
                });
            }
            Err(err) => {
                let _ = events.send(BusEvent::PollError {
                    message: err.to_string(),
                });
            }
        }
    }

    fn try_tick(&mut self, paths: &BusPaths, events: &Sender<BusEvent>) -> Result<(), BusError> {
        let now = now_millis();
        let has_commands = self.has_command_files(paths, now);

        self.poll_interval_ms = compute_poll_interval(
            has_commands,
            self.processing,
            now,
            self.last_activity,
            &self.config,
        );

        if !self.processing && has_commands {
            self.dispatch_next(paths, events)?;
        }

        self.update_status(paths);
        Ok(())
    }

    // The existence check has its own cadence so fast polling bursts do not
    // enumerate the directory on every tick. A failed scan keeps the cached
    // answer and the cache age.
    fn has_command_files(&mut self, paths: &BusPaths, now: i64) -> bool {
        if now - self.last_commands_check < self.config.commands_check_interval_ms as i64 {
            return self.cached_has_commands;
        }
        match scan_for_commands(&paths.commands) {
            Ok(found) => {
                self.cached_has_commands = found;
                self.last_commands_check = now;
                found
            }
            Err(_) => self.cached_has_commands,
        }
    }

    fn dispatch_next(&mut self, paths: &BusPaths, events: &Sender<BusEvent>) -> Result<(), BusError> {
        let Some((filename, path)) = oldest_command(&paths.commands)? else {
            return Ok(());
        };
        self.current_filename = Some(filename);

        match self.read_command(&path) {
            Ok(command) => {
                let now = now_millis();
                self.current_command = Some(command.clone());
                self.processing = true;
                self.last_activity = now;
                let _ = events.send(BusEvent::CommandProcessing {
                    command_id: command.id.clone(),
                });

                match command.mandatory_timeout() {
                    Ok(timeout_ms) => {
                        let _ = events.send(BusEvent::Execute(DispatchedCommand::new(
                            &command, timeout_ms, now,
                        )));
                    }
                    Err(err) => self.discard_command(paths, &path, &err),
                }
            }
            Err(err) => self.discard_command(paths, &path, &err),
        }
        Ok(())
    }

    fn read_command(&self, path: &Path) -> Result<Command, BusError> {
        let value = stable_read::read_stable(path, &self.config)?;
        serde_json::from_value(value).map_err(|source| super::parse_err(path, source))
    }

    // Malformed commands leave the live directory immediately and never
    // produce a Result. The deletion goes through the bus's own commands
    // path; see DESIGN.md for the originating defect.
    fn discard_command(&mut self, paths: &BusPaths, path: &Path, err: &BusError) {
        let _ = fs::remove_file(path);
        append_bus_log(
            &paths.root,
            "warn",
            "command.discarded",
            &format!("{}: {err}", path.display()),
        );
        self.processing = false;
        self.current_command = None;
        self.current_filename = None;
    }

    /// Completion path: counters, records, archive, prune, cache resets.
    /// Filesystem failures are logged and swallowed; in-memory state always
    /// advances.
    pub fn complete_command(&mut self, events: &Sender<BusEvent>, execution: &ExecutionResult) {
        self.stats.record(execution.status);

        if let Some(paths) = self.paths.clone() {
            let now = now_millis();
            let record = ResultRecord::from_execution(execution, now);
            if let Err(err) = results::write_result(&paths, &record) {
                append_bus_log(&paths.root, "warn", "result.write_failed", &err.to_string());
            }

            if execution.status != ExecutionStatus::Success {
                let error_record = ErrorRecord {
                    command_id: execution.command_id.clone(),
                    timestamp: now,
                    phase: execution.status,
                    error: execution.error.clone().unwrap_or_else(|| ErrorDetail {
                        name: "Error".to_string(),
                        message: "unknown error".to_string(),
                        stack: None,
                    }),
                    command: self.current_command.as_ref().map(CommandSnapshot::from_command),
                };
                if let Err(err) = results::write_error(&paths, &error_record) {
                    append_bus_log(&paths.root, "warn", "error.write_failed", &err.to_string());
                }
            }

            if let Some(filename) = self.current_filename.take() {
                if let Err(err) = results::archive_command(&paths, &filename) {
                    append_bus_log(&paths.root, "warn", "history.archive_failed", &err.to_string());
                }
                if let Err(err) = results::prune_history(&paths, self.config.max_history_size) {
                    append_bus_log(&paths.root, "warn", "history.prune_failed", &err.to_string());
                }
            }
        }

        self.history_changed = true;
        // A finished command may have produced new commands; re-scan on the
        // very next tick.
        self.last_commands_check = 0;
        self.processing = false;
        self.current_command = None;
        self.current_filename = None;
        self.last_activity = now_millis();

        let _ = events.send(BusEvent::CommandComplete {
            command_id: execution.command_id.clone(),
            status: execution.status,
            stats: self.stats,
        });
    }

    fn update_status(&mut self, paths: &BusPaths) {
        if self.history_changed {
            match results::count_history(paths) {
                Ok(count) => {
                    self.cached_history_size = count;
                    self.history_changed = false;
                }
                Err(_) => return,
            }
        }

        let snapshot = StatusSnapshot {
            bridge_active: true,
            last_poll: now_millis(),
            poll_interval_ms: self.poll_interval_ms,
            processing: self.processing,
            current_command: self.current_command.as_ref().map(|c| c.id.clone()),
            commands_processed: self.stats.processed,
            commands_succeeded: self.stats.succeeded,
            commands_failed: self.stats.failed,
            commands_timeout: self.stats.timeout,
            history_size: self.cached_history_size,
        };

        if let Some(last) = &self.last_status_written {
            if last.meaningful_eq(&snapshot) {
                return;
            }
        }
        if results::write_status(paths, &snapshot).is_ok() {
            self.last_status_written = Some(snapshot);
        }
    }
}

/// Interval selection: fast lane whenever work exists or is running, stepped
/// doubling with idle time otherwise.
pub fn compute_poll_interval(
    has_commands: bool,
    processing: bool,
    now: i64,
    last_activity: i64,
    config: &BusConfig,
) -> u64 {
    if has_commands || processing {
        return config.min_poll_interval_ms;
    }
    let idle_ms = now.saturating_sub(last_activity).max(0) as u64;
    let step = (idle_ms / config.step_duration_ms).min(16) as u32;
    config
        .min_poll_interval_ms
        .saturating_mul(1u64 << step)
        .min(config.max_poll_interval_ms)
}

fn scan_for_commands(commands_dir: &Path) -> Result<bool, BusError> {
    let dir = fs::read_dir(commands_dir).map_err(|source| io_err(commands_dir, source))?;
    for entry in dir {
        let entry = entry.map_err(|source| io_err(commands_dir, source))?;
        if !entry.path().is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_command_filename(name) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

fn oldest_command(commands_dir: &Path) -> Result<Option<(String, PathBuf)>, BusError> {
    let mut names = Vec::new();
    let dir = fs::read_dir(commands_dir).map_err(|source| io_err(commands_dir, source))?;
    for entry in dir {
        let entry = entry.map_err(|source| io_err(commands_dir, source))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if is_command_filename(name) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names
        .into_iter()
        .next()
        .map(|name| (name.clone(), commands_dir.join(name))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use tempfile::tempdir;

    fn test_config() -> BusConfig {
        BusConfig {
            stability_delay_ms: 0,
            ..BusConfig::default()
        }
    }

    fn ready_state(root: &Path) -> PollerState {
        let mut state = PollerState::new(test_config());
        state.set_directory(root.to_path_buf()).expect("set directory");
        state.start_polling();
        state
    }

    fn drain(events: &mpsc::Receiver<BusEvent>) -> Vec<BusEvent> {
        let mut collected = Vec::new();
        while let Ok(event) = events.try_recv() {
            collected.push(event);
        }
        collected
    }

    #[test]
    fn idle_backoff_follows_the_doubling_ladder() {
        let config = test_config();
        let t0 = 1_000_000i64;
        let expectations = [
            (0, 100),
            (1_999, 100),
            (2_000, 200),
            (4_000, 400),
            (6_000, 800),
            (8_000, 1600),
            (10_000, 2000),
            (60_000, 2000),
        ];
        for (idle, expected) in expectations {
            assert_eq!(
                compute_poll_interval(false, false, t0 + idle, t0, &config),
                expected,
                "idle {idle}ms"
            );
        }
    }

    #[test]
    fn work_or_processing_pins_the_fast_lane() {
        let config = test_config();
        let t0 = 1_000_000i64;
        assert_eq!(
            compute_poll_interval(true, false, t0 + 60_000, t0, &config),
            100
        );
        assert_eq!(
            compute_poll_interval(false, true, t0 + 60_000, t0, &config),
            100
        );
    }

    #[test]
    fn activity_signal_resets_the_interval() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        state.poll_interval_ms = 1600;
        state.last_activity = now_millis() - 60_000;

        state.note_activity(now_millis());
        assert_eq!(state.poll_interval_ms, 100);

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        drain(&rx);
        assert_eq!(state.poll_interval_ms, 100);
    }

    #[test]
    fn dispatch_emits_processing_then_execute_for_a_valid_command() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");
        fs::write(
            paths.commands.join("cmd_1000.json"),
            r#"{"id":"c1","script":"2+2","timeout_ms":500}"#,
        )
        .expect("write command");

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        let events = drain(&rx);

        assert!(matches!(
            &events[0],
            BusEvent::CommandProcessing { command_id } if command_id == "c1"
        ));
        match &events[1] {
            BusEvent::Execute(dispatched) => {
                assert_eq!(dispatched.id, "c1");
                assert_eq!(dispatched.timeout_ms, 500);
                assert_eq!(dispatched.script.as_deref(), Some("2+2"));
            }
            other => panic!("expected execute event, got {other:?}"),
        }
        assert!(state.processing);
        assert_eq!(state.current_filename.as_deref(), Some("cmd_1000.json"));
    }

    #[test]
    fn only_one_command_is_in_flight_bus_wide() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");
        for ts in [1000, 2000] {
            fs::write(
                paths.commands.join(format!("cmd_{ts}.json")),
                format!(r#"{{"id":"c{ts}","script":"x","timeout_ms":100}}"#),
            )
            .expect("write command");
        }

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        let first = drain(&rx);
        assert_eq!(
            first
                .iter()
                .filter(|e| matches!(e, BusEvent::Execute(_)))
                .count(),
            1
        );

        // Second tick while processing: no further dispatch.
        state.last_commands_check = 0;
        state.tick(&tx);
        let second = drain(&rx);
        assert!(second.iter().all(|e| !matches!(e, BusEvent::Execute(_))));
    }

    #[test]
    fn oldest_filename_wins() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");
        for ts in [3000, 1000, 2000] {
            fs::write(
                paths.commands.join(format!("cmd_{ts}.json")),
                format!(r#"{{"id":"c{ts}","script":"x","timeout_ms":100}}"#),
            )
            .expect("write command");
        }

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        let events = drain(&rx);
        assert!(matches!(
            &events[0],
            BusEvent::CommandProcessing { command_id } if command_id == "c1000"
        ));
    }

    #[test]
    fn command_without_timeout_is_discarded_without_a_result() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");
        let file = paths.commands.join("cmd_1000.json");
        fs::write(&file, r#"{"id":"c1","script":"2+2"}"#).expect("write command");

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        drain(&rx);

        assert!(!file.exists(), "malformed command must leave the live dir");
        assert!(!state.processing);
        assert!(state.current_command.is_none());
        let results: Vec<_> = fs::read_dir(&paths.results)
            .expect("read results")
            .flatten()
            .collect();
        assert!(results.is_empty(), "no result may be written");
    }

    #[test]
    fn unparsable_command_is_discarded() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");
        let file = paths.commands.join("cmd_1000.json");
        fs::write(&file, "{ this is not json").expect("write command");

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        drain(&rx);
        assert!(!file.exists());
        assert!(!state.processing);
    }

    #[test]
    fn completion_writes_result_archives_and_reopens_the_fast_lane() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");
        fs::write(
            paths.commands.join("cmd_1000.json"),
            r#"{"id":"c1","script":"2+2","timeout_ms":500}"#,
        )
        .expect("write command");

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        drain(&rx);

        let execution = ExecutionResult {
            command_id: "c1".to_string(),
            status: ExecutionStatus::Success,
            result: Some(serde_json::json!(4)),
            error: None,
            console: Vec::new(),
            execution_time_ms: 7,
        };
        state.complete_command(&tx, &execution);
        let events = drain(&rx);

        assert!(matches!(
            events.last(),
            Some(BusEvent::CommandComplete { command_id, status: ExecutionStatus::Success, .. })
                if command_id == "c1"
        ));
        assert!(!state.processing);
        assert_eq!(state.last_commands_check, 0);
        assert_eq!(state.stats.processed, 1);
        assert_eq!(state.stats.succeeded, 1);
        assert!(paths.result_file("c1").exists());
        assert!(paths.history.join("cmd_1000.json").exists());
        assert!(!paths.commands.join("cmd_1000.json").exists());
        let errors: Vec<_> = fs::read_dir(&paths.errors).expect("read").flatten().collect();
        assert!(errors.is_empty());
    }

    #[test]
    fn non_success_completion_also_writes_an_error_record() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");
        fs::write(
            paths.commands.join("cmd_1000.json"),
            r#"{"id":"c1","script":"slow","timeout_ms":50}"#,
        )
        .expect("write command");

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        drain(&rx);

        let execution = ExecutionResult {
            command_id: "c1".to_string(),
            status: ExecutionStatus::Timeout,
            result: None,
            error: Some(ErrorDetail {
                name: "TimeoutError".to_string(),
                message: "execution exceeded 50ms timeout".to_string(),
                stack: None,
            }),
            console: Vec::new(),
            execution_time_ms: 51,
        };
        state.complete_command(&tx, &execution);

        let raw = fs::read_to_string(paths.error_file("c1")).expect("read error record");
        let record: ErrorRecord = serde_json::from_str(&raw).expect("parse");
        assert_eq!(record.phase, ExecutionStatus::Timeout);
        assert_eq!(record.error.name, "TimeoutError");
        let snapshot = record.command.expect("command snapshot");
        assert_eq!(snapshot.script.as_deref(), Some("slow"));
        assert_eq!(state.stats.timeout, 1);
    }

    #[test]
    fn status_is_written_once_for_identical_consecutive_ticks() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        drain(&rx);
        assert!(paths.status_file().exists());

        // Remove the file: an unchanged second tick must not recreate it.
        fs::remove_file(paths.status_file()).expect("remove status");
        state.tick(&tx);
        drain(&rx);
        assert!(!paths.status_file().exists());

        // A meaningful change rewrites.
        state.stats.record(ExecutionStatus::Success);
        state.tick(&tx);
        drain(&rx);
        assert!(paths.status_file().exists());
    }

    #[test]
    fn commands_existence_check_honours_its_own_cadence() {
        let dir = tempdir().expect("tempdir");
        let mut state = ready_state(dir.path());
        let paths = state.paths.clone().expect("paths");

        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        drain(&rx);
        assert!(!state.cached_has_commands);

        // A file that appears between checks is not seen while the cache is
        // fresh...
        fs::write(
            paths.commands.join("cmd_1000.json"),
            r#"{"id":"c1","script":"x","timeout_ms":100}"#,
        )
        .expect("write command");
        state.tick(&tx);
        assert!(drain(&rx)
            .iter()
            .all(|e| !matches!(e, BusEvent::Execute(_))));

        // ...and is picked up as soon as the cache is cleared.
        state.last_commands_check = 0;
        state.tick(&tx);
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, BusEvent::Execute(_))));
    }

    #[test]
    fn tick_without_directory_is_a_no_op() {
        let mut state = PollerState::new(test_config());
        state.start_polling();
        let (tx, rx) = mpsc::channel();
        state.tick(&tx);
        assert!(drain(&rx).is_empty());
    }
}
