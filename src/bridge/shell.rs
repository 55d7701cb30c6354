use super::backend::{ConsoleRecorder, ExecutionBackend, ScriptError};
use serde_json::Value;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;

/// Runs submitted code as a shell snippet. This is the trusted-host backend
/// the binary ships with; library users plug in their own engine instead.
/// Standard error lines surface as console entries, the trimmed standard
/// output becomes the result value.
#[derive(Debug, Clone)]
pub struct ShellBackend {
    shell: String,
}

impl Default for ShellBackend {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }
}

impl ShellBackend {
    pub fn with_shell(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl ExecutionBackend for ShellBackend {
    fn run(&self, code: &str, console: &ConsoleRecorder) -> Result<Value, ScriptError> {
        let mut child = Command::new(&self.shell)
            .arg("-c")
            .arg(code)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| ScriptError::new(format!("failed to spawn {}: {err}", self.shell)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScriptError::new("missing stdout pipe"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ScriptError::new("missing stderr pipe"))?;

        let stdout_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut stdout = stdout;
            let _ = stdout.read_to_string(&mut buf);
            buf
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let mut stderr = stderr;
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let status = child
            .wait()
            .map_err(|err| ScriptError::new(format!("failed to wait for child: {err}")))?;
        let stdout = stdout_reader.join().unwrap_or_default();
        let stderr = stderr_reader.join().unwrap_or_default();

        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            console.error(line);
        }

        if !status.success() {
            return Err(ScriptError::new(format!(
                "shell exited with {}: {}",
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(Value::String(stdout.trim_end().to_string()))
    }
}
